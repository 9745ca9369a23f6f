//! Per-tick batching of voxel writes.

use crate::world::{BlockData, InventoryRef, VoxelCoord, VoxelSnapshot, WorldAdapter};

/// A queued voxel write
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingWrite {
    pub coord: VoxelCoord,
    pub block: BlockData,
    pub inventory: Option<InventoryRef>,
}

/// Outcome of a commit
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CommitReport {
    /// Writes the world accepted
    pub written: usize,
    /// Writes skipped after a transient failure
    pub failed: usize,
}

/// Collects one tick's writes and applies them in a single pass.
///
/// Nothing touches the world until [`BatchMutator::commit`]. A failing
/// write is logged and skipped; the rest of the batch still lands.
#[derive(Default)]
pub struct BatchMutator {
    writes: Vec<PendingWrite>,
    callbacks: Vec<Box<dyn FnOnce()>>,
}

impl BatchMutator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a batch sized for the per-tick voxel budget.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            writes: Vec::with_capacity(capacity),
            callbacks: Vec::new(),
        }
    }

    /// Queue a plain block write (use [`BlockData::air`] to remove).
    pub fn stage(&mut self, coord: VoxelCoord, block: BlockData) {
        self.writes.push(PendingWrite { coord, block, inventory: None });
    }

    /// Queue a write that restores a removed voxel, container included.
    pub fn stage_snapshot(&mut self, snapshot: VoxelSnapshot) {
        self.writes.push(PendingWrite {
            coord: snapshot.coord,
            block: snapshot.block,
            inventory: snapshot.inventory,
        });
    }

    /// Run `callback` once the batch has been applied.
    pub fn on_committed(&mut self, callback: impl FnOnce() + 'static) {
        self.callbacks.push(Box::new(callback));
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn pending(&self) -> &[PendingWrite] {
        &self.writes
    }

    /// Apply every queued write in staging order, then fire callbacks.
    pub fn commit(self, world: &dyn WorldAdapter) -> CommitReport {
        let mut report = CommitReport::default();

        for write in &self.writes {
            match world.write_voxel(write.coord, &write.block, write.inventory) {
                Ok(()) => report.written += 1,
                Err(e) => {
                    log::warn!("Skipping voxel write: {}", e);
                    report.failed += 1;
                }
            }
        }

        for callback in self.callbacks {
            callback();
        }

        report
    }
}
