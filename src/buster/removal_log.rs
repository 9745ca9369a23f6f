//! Reversible record of removed voxels.
//!
//! Snapshots are appended while demolishing and popped from the tail when
//! reversing, so the last voxel removed is the first one restored. A
//! snapshot is owned by the log until it is popped; after that it belongs
//! to whoever writes it back into the world.

use crate::core::error::Error;
use crate::core::types::Result;
use crate::world::VoxelSnapshot;

/// Which direction the log is being used in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogMode {
    /// Forward demolition: appends allowed
    #[default]
    Recording,
    /// Reversal: appends rejected, entries consumed from the tail
    Replaying,
}

/// Stack of removed-voxel snapshots.
#[derive(Clone, Debug, Default)]
pub struct RemovalLog {
    entries: Vec<VoxelSnapshot>,
    mode: LogMode,
}

impl RemovalLog {
    /// Create an empty log in recording mode.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a log from entries in removal order.
    pub fn from_entries(entries: Vec<VoxelSnapshot>, mode: LogMode) -> Self {
        Self { entries, mode }
    }

    pub fn mode(&self) -> LogMode {
        self.mode
    }

    /// Record a removed voxel. Only valid while recording.
    pub fn append(&mut self, snapshot: VoxelSnapshot) -> Result<()> {
        if self.mode == LogMode::Replaying {
            return Err(Error::InvalidState("append to a removal log that is replaying"));
        }
        self.entries.push(snapshot);
        Ok(())
    }

    /// Switch to replay mode. Idempotent.
    pub fn begin_replay(&mut self) {
        self.mode = LogMode::Replaying;
    }

    /// Remove and return the most recently recorded snapshot.
    ///
    /// [`Error::EmptyLog`] means every snapshot has been restored.
    pub fn pop_last(&mut self) -> Result<VoxelSnapshot> {
        self.entries.pop().ok_or(Error::EmptyLog)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Entries still pending, oldest first
    pub fn entries(&self) -> &[VoxelSnapshot] {
        &self.entries
    }
}
