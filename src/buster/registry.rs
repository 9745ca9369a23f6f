//! Region ownership and watched-task lookup.
//!
//! The registry only answers lookups; it never drives a task's lifecycle.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::buster::TaskId;
use crate::world::{OwnerId, Region};

/// Lookup tables shared between the engine and the host.
pub trait Registry: Send + Sync {
    /// Claim every region for `task`, all or nothing. Returns false if any
    /// region is already owned.
    fn reserve_regions(&self, regions: &[Region], owner: OwnerId, task: TaskId) -> bool;

    /// Forget a task: its regions and any watched slot pointing at it.
    fn release(&self, task: TaskId);

    fn lookup_by_region(&self, region: Region) -> Option<TaskId>;

    /// Tasks owned by an identity, in id order
    fn tasks_of(&self, owner: &OwnerId) -> Vec<TaskId>;

    /// The task whose progress the owner currently sees
    fn get_watched(&self, owner: &OwnerId) -> Option<TaskId>;

    /// Last writer wins.
    fn set_watched(&self, owner: OwnerId, task: TaskId);
}

#[derive(Debug, Default)]
struct RegistryState {
    by_region: HashMap<Region, TaskId>,
    by_task: HashMap<TaskId, (OwnerId, Vec<Region>)>,
    watched: HashMap<OwnerId, TaskId>,
}

/// Process-local registry behind a single mutex.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    state: Mutex<RegistryState>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks currently holding regions
    pub fn task_count(&self) -> usize {
        self.state.lock().unwrap().by_task.len()
    }
}

impl Registry for MemoryRegistry {
    fn reserve_regions(&self, regions: &[Region], owner: OwnerId, task: TaskId) -> bool {
        let mut state = self.state.lock().unwrap();
        if regions.iter().any(|region| state.by_region.contains_key(region)) {
            return false;
        }

        for region in regions {
            state.by_region.insert(*region, task);
        }
        state
            .by_task
            .entry(task)
            .or_insert_with(|| (owner, Vec::new()))
            .1
            .extend_from_slice(regions);
        true
    }

    fn release(&self, task: TaskId) {
        let mut state = self.state.lock().unwrap();
        if let Some((_, regions)) = state.by_task.remove(&task) {
            for region in regions {
                state.by_region.remove(&region);
            }
        }
        state.watched.retain(|_, watched| *watched != task);
    }

    fn lookup_by_region(&self, region: Region) -> Option<TaskId> {
        self.state.lock().unwrap().by_region.get(&region).copied()
    }

    fn tasks_of(&self, owner: &OwnerId) -> Vec<TaskId> {
        let state = self.state.lock().unwrap();
        let mut ids: Vec<TaskId> = state
            .by_task
            .iter()
            .filter(|(_, (task_owner, _))| task_owner == owner)
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    fn get_watched(&self, owner: &OwnerId) -> Option<TaskId> {
        self.state.lock().unwrap().watched.get(owner).copied()
    }

    fn set_watched(&self, owner: OwnerId, task: TaskId) {
        self.state.lock().unwrap().watched.insert(owner, task);
    }
}
