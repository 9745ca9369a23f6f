//! Voxel addressing, block payloads and region snapshots.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;

use glam::IVec3;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Side length of a region (one chunk column) in voxels
pub const REGION_SIZE: i32 = 16;

/// Number of (x, z) columns in a region
pub const REGION_COLUMNS: usize = (REGION_SIZE * REGION_SIZE) as usize;

/// Host-assigned handle for a named world
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorldId(pub u32);

impl fmt::Display for WorldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "world#{}", self.0)
    }
}

/// Identity acting on the world (the owner of a buster, or a requester)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub Uuid);

impl OwnerId {
    /// Fresh random identity
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Integer voxel position within a named world
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VoxelCoord {
    pub world: WorldId,
    pub pos: IVec3,
}

impl VoxelCoord {
    pub fn new(world: WorldId, x: i32, y: i32, z: i32) -> Self {
        Self { world, pos: IVec3::new(x, y, z) }
    }

    pub fn y(&self) -> i32 {
        self.pos.y
    }

    /// The region whose column contains this voxel
    pub fn region(&self) -> Region {
        Region::containing(*self)
    }

    fn sort_key(&self) -> (WorldId, i32, i32, i32) {
        (self.world, self.pos.x, self.pos.y, self.pos.z)
    }
}

impl Ord for VoxelCoord {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl PartialOrd for VoxelCoord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for VoxelCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {}, {})", self.world, self.pos.x, self.pos.y, self.pos.z)
    }
}

/// A 16x16 column spanning the full vertical extent; the unit of ownership.
///
/// `x` and `z` are chunk coordinates, not voxel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Region {
    pub world: WorldId,
    pub x: i32,
    pub z: i32,
}

impl Region {
    pub fn new(world: WorldId, x: i32, z: i32) -> Self {
        Self { world, x, z }
    }

    /// Region containing a voxel
    pub fn containing(coord: VoxelCoord) -> Self {
        Self {
            world: coord.world,
            x: coord.pos.x.div_euclid(REGION_SIZE),
            z: coord.pos.z.div_euclid(REGION_SIZE),
        }
    }

    /// Minimum (x, z) corner in voxel coordinates
    pub fn origin(&self) -> (i32, i32) {
        (self.x * REGION_SIZE, self.z * REGION_SIZE)
    }

    /// Voxel at a column-local (x, z) offset and absolute height
    pub fn voxel(&self, local_x: i32, y: i32, local_z: i32) -> VoxelCoord {
        let (ox, oz) = self.origin();
        VoxelCoord::new(self.world, ox + local_x, y, oz + local_z)
    }

    pub fn contains(&self, coord: VoxelCoord) -> bool {
        Region::containing(coord) == *self
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}, {}]", self.world, self.x, self.z)
    }
}

/// Material name, e.g. `STONE`
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Material(Cow<'static, str>);

impl Material {
    pub const AIR: Material = Material(Cow::Borrowed("AIR"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    pub fn is_air(&self) -> bool {
        *self == Self::AIR
    }
}

impl fmt::Display for Material {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Material plus auxiliary state (orientation, variant, ...)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockData {
    pub material: Material,
    #[serde(default)]
    pub aux: u32,
}

impl BlockData {
    pub fn new(material: Material, aux: u32) -> Self {
        Self { material, aux }
    }

    pub fn air() -> Self {
        Self { material: Material::AIR, aux: 0 }
    }

    pub fn is_air(&self) -> bool {
        self.material.is_air()
    }
}

/// Host handle for a container (chest contents etc.) attached to a voxel
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InventoryRef(pub u64);

/// Pre-removal state of one voxel
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoxelSnapshot {
    pub coord: VoxelCoord,
    pub block: BlockData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inventory: Option<InventoryRef>,
}

/// Immutable top-of-stack heights for every column of a region.
///
/// Columns are indexed `x * 16 + z`; `None` means the column is empty.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegionSnapshot {
    region: Region,
    heights: Vec<Option<i32>>,
}

impl RegionSnapshot {
    /// Snapshot with every column empty
    pub fn empty(region: Region) -> Self {
        Self {
            region,
            heights: vec![None; REGION_COLUMNS],
        }
    }

    pub fn region(&self) -> Region {
        self.region
    }

    /// Raise a column's recorded top to `y` if it is higher than the current one.
    pub fn record_block(&mut self, local_x: i32, y: i32, local_z: i32) {
        let slot = &mut self.heights[column_index(local_x, local_z)];
        *slot = Some(slot.map_or(y, |top| top.max(y)));
    }

    /// Height of the highest non-air voxel in a column
    pub fn highest_block_y(&self, local_x: i32, local_z: i32) -> Option<i32> {
        self.heights[column_index(local_x, local_z)]
    }

    /// Highest non-air voxel across every column
    pub fn top(&self) -> Option<i32> {
        self.heights.iter().flatten().copied().max()
    }
}

fn column_index(local_x: i32, local_z: i32) -> usize {
    debug_assert!((0..REGION_SIZE).contains(&local_x) && (0..REGION_SIZE).contains(&local_z));
    (local_x * REGION_SIZE + local_z) as usize
}
