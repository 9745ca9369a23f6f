//! voxbust - reversible, level-by-level voxel region demolition

pub mod core;
pub mod world;
pub mod buster;
