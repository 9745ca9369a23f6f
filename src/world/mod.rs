//! Access layer between the busting engine and the host's voxel world.
//!
//! The engine never touches world storage directly; everything goes
//! through [`WorldAdapter`], which a host implements over its own chunk
//! store. [`MemoryWorld`] is a complete in-memory implementation.

pub mod types;
pub mod memory;

pub use types::{
    BlockData, InventoryRef, Material, OwnerId, Region, RegionSnapshot, VoxelCoord,
    VoxelSnapshot, WorldId, REGION_COLUMNS, REGION_SIZE,
};
pub use memory::MemoryWorld;

use crate::core::types::Result;

/// Voxel read/write access used by busting tasks.
///
/// Writes are only issued from the primary execution context. Snapshots
/// must be immutable so they can be scanned on a background thread.
pub trait WorldAdapter: Send + Sync {
    /// Block at `coord`. Voxels that cannot be read (unloaded chunk,
    /// out of vertical range) read as air.
    fn read_voxel(&self, coord: VoxelCoord) -> BlockData;

    /// Container attached to the voxel, if any
    fn attached_inventory(&self, _coord: VoxelCoord) -> Option<InventoryRef> {
        None
    }

    /// Write a block. Fails with [`crate::core::Error::TransientWrite`]
    /// when the voxel cannot be written right now.
    fn write_voxel(
        &self,
        coord: VoxelCoord,
        block: &BlockData,
        inventory: Option<InventoryRef>,
    ) -> Result<()>;

    /// Column heights of a region at this instant
    fn snapshot_region(&self, region: Region) -> RegionSnapshot;

    fn is_inside_world_border(&self, coord: VoxelCoord) -> bool;

    /// Resend lighting and chunk data for a region after bulk edits
    fn refresh_visual_state(&self, region: Region);
}
