//! Error types for the busting engine

use thiserror::Error;

use crate::buster::TaskId;
use crate::world::{Region, VoxelCoord};

/// Main error type for the engine
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    /// A removal log was mutated in the wrong mode.
    #[error("Invalid state: {0}")]
    InvalidState(&'static str),

    /// Nothing left to replay. Signals that a reversal is complete.
    #[error("Removal log is empty")]
    EmptyLog,

    #[error("Region set is empty")]
    EmptyRegionSet,

    #[error("Region {region} is already owned by task {owner:?}")]
    RegionConflict {
        region: Region,
        owner: Option<TaskId>,
    },

    #[error("Cancel refused: {0}")]
    CancelRefused(#[from] CancelRefusal),

    /// A single voxel write failed (e.g. its chunk is not loaded).
    #[error("Transient write failure at {0}")]
    TransientWrite(VoxelCoord),

    #[error("Persistence error: {0}")]
    Persistence(String),
}

/// Why a cancellation request was turned down.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CancelRefusal {
    #[error("buster is already cancelled")]
    AlreadyCancelled,

    #[error("buster has already finished")]
    AlreadyFinished,

    #[error("buster is at level {level}, below the minimum cancel level {minimum}")]
    BelowMinimumLevel { level: i32, minimum: i32 },

    #[error("requester may not cancel another owner's buster")]
    NotPermitted,
}
