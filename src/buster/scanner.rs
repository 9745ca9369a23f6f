//! Level scanning over region columns.

use rayon::prelude::*;

use crate::world::{BlockData, Region, RegionSnapshot, VoxelCoord, WorldAdapter, REGION_SIZE};

/// A voxel visited by the scanner, with its live block data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub coord: VoxelCoord,
    pub block: BlockData,
}

/// Finds where demolition should start and which voxels sit on the front.
pub struct LevelScanner;

impl LevelScanner {
    /// Highest non-air level across every snapshot, or `None` when all
    /// columns are empty. Runs on the background context; snapshots are
    /// immutable so columns are scanned in parallel.
    pub fn highest_occupied_level(snapshots: &[RegionSnapshot]) -> Option<i32> {
        snapshots.par_iter().filter_map(RegionSnapshot::top).max()
    }

    /// Levels processed by one forward tick: `depth` levels counted down
    /// from `current`, keeping only those at or above `stop`. The window
    /// ends at `i32::MIN`.
    pub fn level_window(current: i32, depth: i32, stop: i32) -> Vec<i32> {
        (0..depth)
            .map_while(|offset| current.checked_sub(offset))
            .take_while(|level| *level >= stop)
            .collect()
    }

    /// Every voxel at the given levels, read live from the world.
    ///
    /// Ordered region-major, then level, then x, then z. Nothing is cached;
    /// calling again re-reads the world.
    pub fn candidates_at_levels<'a>(
        world: &'a dyn WorldAdapter,
        regions: &'a [Region],
        levels: &'a [i32],
    ) -> impl Iterator<Item = Candidate> + 'a {
        regions.iter().flat_map(move |region| {
            levels.iter().flat_map(move |&y| {
                (0..REGION_SIZE).flat_map(move |x| {
                    (0..REGION_SIZE).map(move |z| {
                        let coord = region.voxel(x, y, z);
                        Candidate { coord, block: world.read_voxel(coord) }
                    })
                })
            })
        })
    }
}
