//! Host-side collaborators: build permissions, player feedback, rewards.

use std::collections::HashSet;
use std::sync::Mutex;

use crate::world::{OwnerId, VoxelCoord};

/// Decides whether an identity may alter the world.
pub trait PermissionOracle: Send + Sync {
    /// May `owner` break or place the voxel at `coord`?
    fn can_modify(&self, owner: &OwnerId, coord: VoxelCoord) -> bool;

    /// May `requester` cancel busters owned by someone else?
    fn can_cancel_others(&self, _requester: &OwnerId) -> bool {
        false
    }
}

/// Message templates sent to owners
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKey {
    /// Progress while demolishing; carries the level
    BusterProgress,
    /// Progress while reversing; carries the level
    CancelProgress,
    BusterFinished,
    CancelFinished,
    /// Someone other than the owner cancelled the buster
    CancelledByOther,
}

impl MessageKey {
    /// Stable template key for host-side localisation
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKey::BusterProgress => "actionbar-buster-message",
            MessageKey::CancelProgress => "actionbar-cancel-message",
            MessageKey::BusterFinished => "buster-finished",
            MessageKey::CancelFinished => "cancel-finished",
            MessageKey::CancelledByOther => "cancelled-buster-other",
        }
    }
}

/// Delivers cosmetic feedback. Delivery is best effort.
pub trait NotificationSink: Send + Sync {
    fn send_progress(&self, owner: &OwnerId, key: MessageKey, level: i32);

    fn send_message(&self, _owner: &OwnerId, _key: MessageKey) {}
}

/// Hands items to identities.
pub trait RewardGrantor: Send + Sync {
    /// Give `item` to `owner`. Returns false when the owner is not reachable.
    fn grant(&self, item: &str, owner: &OwnerId) -> bool;
}

/// Permits everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAll;

impl PermissionOracle for AllowAll {
    fn can_modify(&self, _owner: &OwnerId, _coord: VoxelCoord) -> bool {
        true
    }

    fn can_cancel_others(&self, _requester: &OwnerId) -> bool {
        true
    }
}

/// Fixed deny list plus a set of identities allowed to cancel for others.
#[derive(Clone, Debug, Default)]
pub struct StaticPermissions {
    denied: HashSet<VoxelCoord>,
    cancel_admins: HashSet<OwnerId>,
}

impl StaticPermissions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deny(mut self, coord: VoxelCoord) -> Self {
        self.denied.insert(coord);
        self
    }

    pub fn cancel_admin(mut self, owner: OwnerId) -> Self {
        self.cancel_admins.insert(owner);
        self
    }
}

impl PermissionOracle for StaticPermissions {
    fn can_modify(&self, _owner: &OwnerId, coord: VoxelCoord) -> bool {
        !self.denied.contains(&coord)
    }

    fn can_cancel_others(&self, requester: &OwnerId) -> bool {
        self.cancel_admins.contains(requester)
    }
}

/// Writes notifications to the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

impl NotificationSink for LogNotifier {
    fn send_progress(&self, owner: &OwnerId, key: MessageKey, level: i32) {
        log::info!("[{}] {} level={}", owner, key.as_str(), level);
    }

    fn send_message(&self, owner: &OwnerId, key: MessageKey) {
        log::info!("[{}] {}", owner, key.as_str());
    }
}

/// A notification captured by [`RecordingNotifier`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notification {
    Progress { owner: OwnerId, key: MessageKey, level: i32 },
    Message { owner: OwnerId, key: MessageKey },
}

/// Keeps every notification in memory.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    /// Levels carried by progress notifications of one kind, in order
    pub fn progress_levels(&self, key: MessageKey) -> Vec<i32> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|n| match n {
                Notification::Progress { key: k, level, .. } if *k == key => Some(*level),
                _ => None,
            })
            .collect()
    }

    pub fn messages(&self) -> Vec<MessageKey> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|n| match n {
                Notification::Message { key, .. } => Some(*key),
                _ => None,
            })
            .collect()
    }
}

impl NotificationSink for RecordingNotifier {
    fn send_progress(&self, owner: &OwnerId, key: MessageKey, level: i32) {
        self.sent.lock().unwrap().push(Notification::Progress { owner: *owner, key, level });
    }

    fn send_message(&self, owner: &OwnerId, key: MessageKey) {
        self.sent.lock().unwrap().push(Notification::Message { owner: *owner, key });
    }
}

/// Never grants anything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoRewards;

impl RewardGrantor for NoRewards {
    fn grant(&self, _item: &str, _owner: &OwnerId) -> bool {
        false
    }
}

/// Records grants; owners listed as offline are unreachable.
#[derive(Debug, Default)]
pub struct RecordingRewards {
    offline: HashSet<OwnerId>,
    granted: Mutex<Vec<(String, OwnerId)>>,
}

impl RecordingRewards {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offline(mut self, owner: OwnerId) -> Self {
        self.offline.insert(owner);
        self
    }

    pub fn granted(&self) -> Vec<(String, OwnerId)> {
        self.granted.lock().unwrap().clone()
    }
}

impl RewardGrantor for RecordingRewards {
    fn grant(&self, item: &str, owner: &OwnerId) -> bool {
        if self.offline.contains(owner) {
            return false;
        }
        self.granted.lock().unwrap().push((item.to_string(), *owner));
        true
    }
}
