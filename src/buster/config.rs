//! Busting configuration.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::error::Error;
use crate::core::types::Result;

/// Engine-wide busting options. Missing JSON fields take their defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusterConfig {
    /// Level a new buster starts demolishing from
    pub starting_level: i32,
    /// Lowest level that is ever demolished
    pub stop_level: i32,
    /// Levels processed per forward tick (N)
    pub levels_per_tick: u32,
    /// Period between ticks in milliseconds
    pub tick_interval_ms: u64,
    /// Delay between creation and the first forward tick
    pub start_delay_ms: u64,
    /// Start from the highest occupied level instead of scanning empty sky
    pub skip_empty_air_levels: bool,
    /// Material names that are never removed
    pub blocked_materials: HashSet<String>,
    /// Cancellation is refused once the front is below this level
    pub minimum_cancel_level: i32,
    /// Record removals so a cancelled buster can restore them
    pub reverse_mode_enabled: bool,
    /// Hand the buster item to its owner when demolition completes
    pub give_reward_on_completion: bool,
    /// Hand the buster item back when a cancellation finishes
    pub refund_on_cancel: bool,
    /// New busters become the owner's watched buster
    pub notify_on_start: bool,
}

impl Default for BusterConfig {
    fn default() -> Self {
        Self {
            starting_level: 255,
            stop_level: 1,
            levels_per_tick: 1,
            tick_interval_ms: 1000,
            start_delay_ms: 0,
            skip_empty_air_levels: true,
            blocked_materials: ["BEDROCK".to_string()].into_iter().collect(),
            minimum_cancel_level: 0,
            reverse_mode_enabled: true,
            give_reward_on_completion: false,
            refund_on_cancel: false,
            notify_on_start: true,
        }
    }
}

impl BusterConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn start_delay(&self) -> Duration {
        Duration::from_millis(self.start_delay_ms)
    }

    /// `levels_per_tick` as a level offset, never below 1
    pub fn depth(&self) -> i32 {
        i32::try_from(self.levels_per_tick).unwrap_or(i32::MAX).max(1)
    }

    pub fn is_blocked(&self, material: &str) -> bool {
        self.blocked_materials.contains(material)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.levels_per_tick == 0 {
            return Err(Error::Config("levels_per_tick must be at least 1".into()));
        }
        if i32::try_from(self.levels_per_tick).is_err() {
            return Err(Error::Config(format!("levels_per_tick must be at most {}", i32::MAX)));
        }
        if self.tick_interval_ms == 0 {
            return Err(Error::Config("tick_interval_ms must be positive".into()));
        }
        Ok(())
    }

    /// Load and validate from a JSON file (sync)
    pub fn load_sync(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Save to a JSON file (sync)
    pub fn save_sync(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, json)?;
        Ok(())
    }
}
