//! In-memory world used for simulation, tests and benchmarks.

use std::collections::{HashMap, HashSet};
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

use super::types::{BlockData, InventoryRef, Region, RegionSnapshot, VoxelCoord};
use super::WorldAdapter;
use crate::core::error::Error;
use crate::core::types::Result;

#[derive(Clone, Debug)]
struct StoredVoxel {
    block: BlockData,
    inventory: Option<InventoryRef>,
}

/// Sparse voxel world keyed by coordinate. Air is never stored.
#[derive(Debug, Default)]
pub struct MemoryWorld {
    voxels: RwLock<HashMap<VoxelCoord, StoredVoxel>>,
    /// Square border half-width centred on the origin; `None` = unbounded
    border_radius: RwLock<Option<i32>>,
    /// Regions whose writes fail, simulating unloaded chunks
    unloaded: RwLock<HashSet<Region>>,
    refreshed: Mutex<Vec<Region>>,
    writes: AtomicUsize,
}

impl MemoryWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a world with a square border of the given half-width.
    pub fn with_border(radius: i32) -> Self {
        let world = Self::new();
        world.set_border(Some(radius));
        world
    }

    pub fn set_border(&self, radius: Option<i32>) {
        *self.border_radius.write().unwrap() = radius;
    }

    /// Set a block directly, bypassing write accounting.
    pub fn set_block(&self, coord: VoxelCoord, block: BlockData) {
        let mut voxels = self.voxels.write().unwrap();
        if block.is_air() {
            voxels.remove(&coord);
        } else {
            voxels.insert(coord, StoredVoxel { block, inventory: None });
        }
    }

    /// Attach a container to an existing block. Returns false on air.
    pub fn set_inventory(&self, coord: VoxelCoord, inventory: InventoryRef) -> bool {
        match self.voxels.write().unwrap().get_mut(&coord) {
            Some(stored) => {
                stored.inventory = Some(inventory);
                true
            }
            None => false,
        }
    }

    pub fn block(&self, coord: VoxelCoord) -> BlockData {
        self.voxels
            .read()
            .unwrap()
            .get(&coord)
            .map(|stored| stored.block.clone())
            .unwrap_or_else(BlockData::air)
    }

    pub fn inventory(&self, coord: VoxelCoord) -> Option<InventoryRef> {
        self.voxels.read().unwrap().get(&coord).and_then(|stored| stored.inventory)
    }

    /// Fill every column of a region over a height range.
    pub fn fill(&self, region: Region, heights: RangeInclusive<i32>, block: &BlockData) {
        for y in heights {
            for x in 0..super::REGION_SIZE {
                for z in 0..super::REGION_SIZE {
                    self.set_block(region.voxel(x, y, z), block.clone());
                }
            }
        }
    }

    /// Mark a region as unloaded (writes fail) or loaded again.
    pub fn set_unloaded(&self, region: Region, unloaded: bool) {
        let mut set = self.unloaded.write().unwrap();
        if unloaded {
            set.insert(region);
        } else {
            set.remove(&region);
        }
    }

    /// Non-air voxels inside a region
    pub fn solid_count(&self, region: Region) -> usize {
        self.voxels
            .read()
            .unwrap()
            .keys()
            .filter(|coord| region.contains(**coord))
            .count()
    }

    /// Every stored voxel, sorted by coordinate
    pub fn dump(&self) -> Vec<(VoxelCoord, BlockData)> {
        let mut all: Vec<_> = self
            .voxels
            .read()
            .unwrap()
            .iter()
            .map(|(coord, stored)| (*coord, stored.block.clone()))
            .collect();
        all.sort_by_key(|(coord, _)| *coord);
        all
    }

    /// Regions refreshed so far, in call order
    pub fn refreshed_regions(&self) -> Vec<Region> {
        self.refreshed.lock().unwrap().clone()
    }

    /// Successful writes through [`WorldAdapter::write_voxel`]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }
}

impl WorldAdapter for MemoryWorld {
    fn read_voxel(&self, coord: VoxelCoord) -> BlockData {
        self.block(coord)
    }

    fn attached_inventory(&self, coord: VoxelCoord) -> Option<InventoryRef> {
        self.inventory(coord)
    }

    fn write_voxel(
        &self,
        coord: VoxelCoord,
        block: &BlockData,
        inventory: Option<InventoryRef>,
    ) -> Result<()> {
        if self.unloaded.read().unwrap().contains(&coord.region()) {
            return Err(Error::TransientWrite(coord));
        }

        let mut voxels = self.voxels.write().unwrap();
        if block.is_air() {
            voxels.remove(&coord);
        } else {
            voxels.insert(coord, StoredVoxel { block: block.clone(), inventory });
        }
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn snapshot_region(&self, region: Region) -> RegionSnapshot {
        let (ox, oz) = region.origin();
        let mut snapshot = RegionSnapshot::empty(region);
        for coord in self.voxels.read().unwrap().keys() {
            if region.contains(*coord) {
                snapshot.record_block(coord.pos.x - ox, coord.pos.y, coord.pos.z - oz);
            }
        }
        snapshot
    }

    fn is_inside_world_border(&self, coord: VoxelCoord) -> bool {
        match *self.border_radius.read().unwrap() {
            Some(radius) => coord.pos.x.abs() <= radius && coord.pos.z.abs() <= radius,
            None => true,
        }
    }

    fn refresh_visual_state(&self, region: Region) {
        self.refreshed.lock().unwrap().push(region);
    }
}
