//! Task persistence across restarts.
//!
//! File layout: 4-byte magic, little-endian `u32` version, then an LZ4
//! size-prepended block holding a JSON array of [`TaskState`].

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::error::Error;
use crate::core::types::Result;
use crate::world::{OwnerId, Region, VoxelSnapshot};

const MAGIC: &[u8; 4] = b"VXBT";
const VERSION: u32 = 1;
const HEADER_LEN: usize = 8;

/// Everything needed to rebuild an unfinished task
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskState {
    pub owner: OwnerId,
    pub buster_kind: String,
    pub regions: Vec<Region>,
    pub current_level: i32,
    pub cancelled: bool,
    #[serde(default = "default_reversible")]
    pub reversible: bool,
    /// Removed voxels, oldest first
    #[serde(default)]
    pub removal_log: Vec<VoxelSnapshot>,
}

fn default_reversible() -> bool {
    true
}

/// Serialize and compress task states.
pub fn encode_states(states: &[TaskState]) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(states)?;
    let compressed = lz4_flex::compress_prepend_size(&json);

    let mut bytes = Vec::with_capacity(HEADER_LEN + compressed.len());
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&VERSION.to_le_bytes());
    bytes.extend_from_slice(&compressed);
    Ok(bytes)
}

/// Decompress and deserialize task states.
pub fn decode_states(bytes: &[u8]) -> Result<Vec<TaskState>> {
    if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
        return Err(Error::Persistence("invalid magic bytes".into()));
    }

    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version != VERSION {
        return Err(Error::Persistence(format!("unsupported version: {}", version)));
    }

    let json = lz4_flex::decompress_size_prepended(&bytes[HEADER_LEN..])
        .map_err(|e| Error::Persistence(format!("LZ4 decompression failed: {}", e)))?;
    Ok(serde_json::from_slice(&json)?)
}

/// Write task states to disk, creating parent directories.
pub async fn save_tasks(path: &Path, states: &[TaskState]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let bytes = encode_states(states)?;
    tokio::fs::write(path, bytes).await?;
    log::info!("Saved {} buster task(s) to {}", states.len(), path.display());
    Ok(())
}

/// Read task states from disk. A missing file yields no tasks.
pub async fn load_tasks(path: &Path) -> Result<Vec<TaskState>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let bytes = tokio::fs::read(path).await?;
    let states = decode_states(&bytes)?;
    log::info!("Loaded {} buster task(s) from {}", states.len(), path.display());
    Ok(states)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{BlockData, InventoryRef, Material, VoxelCoord, WorldId};

    fn sample_state() -> TaskState {
        let w = WorldId(1);
        TaskState {
            owner: OwnerId::random(),
            buster_kind: "deep".to_string(),
            regions: vec![Region::new(w, 0, 0), Region::new(w, -1, 2)],
            current_level: 42,
            cancelled: true,
            reversible: true,
            removal_log: vec![
                VoxelSnapshot {
                    coord: VoxelCoord::new(w, 3, 43, 9),
                    block: BlockData::new(Material::new("STONE"), 0),
                    inventory: None,
                },
                VoxelSnapshot {
                    coord: VoxelCoord::new(w, -5, 42, 40),
                    block: BlockData::new(Material::new("CHEST"), 3),
                    inventory: Some(InventoryRef(12)),
                },
            ],
        }
    }

    #[test]
    fn test_encode_decode_preserves_log_order() {
        let state = sample_state();
        let bytes = encode_states(std::slice::from_ref(&state)).unwrap();
        assert_eq!(&bytes[..4], MAGIC);

        let decoded = decode_states(&bytes).unwrap();
        assert_eq!(decoded, vec![state]);
    }

    #[test]
    fn test_decode_rejects_bad_magic() {
        let mut bytes = encode_states(&[]).unwrap();
        bytes[0] = b'X';
        assert!(matches!(decode_states(&bytes), Err(Error::Persistence(_))));
        assert!(decode_states(b"VX").is_err());
    }

    #[test]
    fn test_decode_rejects_future_version() {
        let mut bytes = encode_states(&[]).unwrap();
        bytes[4..8].copy_from_slice(&99u32.to_le_bytes());
        let err = decode_states(&bytes).unwrap_err();
        assert!(err.to_string().contains("unsupported version"));
    }

    #[test]
    fn test_missing_fields_default() {
        let owner = OwnerId::random();
        let json = format!(
            r#"{{"owner":"{}","buster_kind":"k","regions":[],"current_level":3,"cancelled":false}}"#,
            owner
        );
        let state: TaskState = serde_json::from_str(&json).unwrap();
        assert!(state.reversible);
        assert!(state.removal_log.is_empty());
        assert_eq!(state.owner, owner);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("busters.vxbt");

        assert!(load_tasks(&path).await.unwrap().is_empty());

        let states = vec![sample_state(), sample_state()];
        save_tasks(&path, &states).await.unwrap();
        assert_eq!(load_tasks(&path).await.unwrap(), states);
    }
}
