//! Collaborators injected into every busting task.

use std::sync::Arc;

use super::config::BusterConfig;
use super::hooks::{AllowAll, LogNotifier, NoRewards, NotificationSink, PermissionOracle, RewardGrantor};
use super::registry::{MemoryRegistry, Registry};
use crate::core::types::Result;
use crate::world::WorldAdapter;

/// Everything a task needs from the outside world, passed explicitly.
#[derive(Clone)]
pub struct BusterContext {
    pub world: Arc<dyn WorldAdapter>,
    pub permissions: Arc<dyn PermissionOracle>,
    pub notifier: Arc<dyn NotificationSink>,
    pub registry: Arc<dyn Registry>,
    pub rewards: Arc<dyn RewardGrantor>,
    pub config: Arc<BusterConfig>,
}

impl BusterContext {
    /// Context with permissive defaults: everything allowed, notifications
    /// logged, a fresh in-memory registry and no rewards.
    ///
    /// Fails with [`crate::core::Error::Config`] when `config` does not
    /// validate.
    pub fn new(world: Arc<dyn WorldAdapter>, config: BusterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            world,
            permissions: Arc::new(AllowAll),
            notifier: Arc::new(LogNotifier),
            registry: Arc::new(MemoryRegistry::new()),
            rewards: Arc::new(NoRewards),
            config: Arc::new(config),
        })
    }

    pub fn with_permissions(mut self, permissions: Arc<dyn PermissionOracle>) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_registry(mut self, registry: Arc<dyn Registry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_rewards(mut self, rewards: Arc<dyn RewardGrantor>) -> Self {
        self.rewards = rewards;
        self
    }
}
