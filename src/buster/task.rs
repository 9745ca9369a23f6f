//! The busting task state machine.
//!
//! A task demolishes its regions level by level from the top while
//! recording what it removed, and can be switched into reverse to put
//! everything back in the opposite order.
//!
//! ```text
//!   Forward ──(front below stop level)──────────────▶ Finished(Completed)
//!      │
//!   request_cancel
//!      ▼
//!   Reverse ──(removal log empty)───────────────────▶ Finished(Cancelled)
//! ```
//!
//! [`BusterTask::tick`] is synchronous and does all of one tick's work;
//! timers and lifecycle side effects live in the engine.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::batch::BatchMutator;
use super::config::BusterConfig;
use super::context::BusterContext;
use super::hooks::MessageKey;
use super::persist::TaskState;
use super::removal_log::{LogMode, RemovalLog};
use super::scanner::{Candidate, LevelScanner};
use crate::core::error::CancelRefusal;
use crate::world::{BlockData, OwnerId, Region, VoxelSnapshot, REGION_COLUMNS};

/// Process-local task identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a task ended
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FinishReason {
    /// The front passed the stop level
    Completed,
    /// Cancelled and fully reversed
    Cancelled,
}

/// Where a task is in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskPhase {
    Forward,
    Reverse,
    Finished(FinishReason),
}

/// What the driver should do after a tick
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    Finished(FinishReason),
}

/// Why a scanned voxel was left alone
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SkipReason {
    Air,
    Blocked,
    OutsideBorder,
    PermissionDenied,
}

/// Per-reason skip counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SkipCounts {
    pub air: usize,
    pub blocked: usize,
    pub outside_border: usize,
    pub permission_denied: usize,
}

impl SkipCounts {
    pub fn record(&mut self, reason: SkipReason) {
        match reason {
            SkipReason::Air => self.air += 1,
            SkipReason::Blocked => self.blocked += 1,
            SkipReason::OutsideBorder => self.outside_border += 1,
            SkipReason::PermissionDenied => self.permission_denied += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.air + self.blocked + self.outside_border + self.permission_denied
    }
}

/// Summary of one tick
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TickReport {
    /// Phase the tick ran in
    pub phase: TaskPhase,
    /// Levels scanned (forward only)
    pub levels: Vec<i32>,
    /// Voxels the scanner produced
    pub visited: usize,
    /// Voxels staged for removal
    pub removed: usize,
    /// Voxels staged for restoration
    pub restored: usize,
    pub skipped: SkipCounts,
    /// Writes the world rejected
    pub failed_writes: usize,
    /// Current level after the tick
    pub level: i32,
    pub outcome: TickOutcome,
}

impl TickReport {
    fn new(phase: TaskPhase, level: i32) -> Self {
        Self {
            phase,
            levels: Vec::new(),
            visited: 0,
            removed: 0,
            restored: 0,
            skipped: SkipCounts::default(),
            failed_writes: 0,
            level,
            outcome: TickOutcome::Continue,
        }
    }
}

/// A leveled, reversible demolition over a fixed set of regions.
#[derive(Debug)]
pub struct BusterTask {
    id: TaskId,
    owner: OwnerId,
    kind: String,
    regions: Vec<Region>,
    current_level: i32,
    cancelled: bool,
    finished: Option<FinishReason>,
    reversible: bool,
    log: RemovalLog,
}

impl BusterTask {
    /// Create a task that starts demolishing at `start_level`.
    pub fn new(
        id: TaskId,
        owner: OwnerId,
        kind: impl Into<String>,
        regions: Vec<Region>,
        start_level: i32,
        reversible: bool,
    ) -> Self {
        Self {
            id,
            owner,
            kind: kind.into(),
            regions,
            current_level: start_level,
            cancelled: false,
            finished: None,
            reversible,
            log: RemovalLog::new(),
        }
    }

    /// Rebuild a task from persisted state. A cancelled state resumes in
    /// reverse.
    pub fn from_state(id: TaskId, state: TaskState) -> Self {
        let mode = if state.cancelled { LogMode::Replaying } else { LogMode::Recording };
        Self {
            id,
            owner: state.owner,
            kind: state.buster_kind,
            regions: state.regions,
            current_level: state.current_level,
            cancelled: state.cancelled,
            finished: None,
            reversible: state.reversible,
            log: RemovalLog::from_entries(state.removal_log, mode),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    /// Buster kind, also the reward item name
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn current_level(&self) -> i32 {
        self.current_level
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn is_running(&self) -> bool {
        self.finished.is_none()
    }

    pub fn is_reversible(&self) -> bool {
        self.reversible
    }

    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.finished
    }

    pub fn removal_log(&self) -> &RemovalLog {
        &self.log
    }

    pub fn phase(&self) -> TaskPhase {
        match (self.finished, self.cancelled) {
            (Some(reason), _) => TaskPhase::Finished(reason),
            (None, true) => TaskPhase::Reverse,
            (None, false) => TaskPhase::Forward,
        }
    }

    /// Serializable copy of the task's state
    pub fn snapshot_state(&self) -> TaskState {
        TaskState {
            owner: self.owner,
            buster_kind: self.kind.clone(),
            regions: self.regions.clone(),
            current_level: self.current_level,
            cancelled: self.cancelled,
            reversible: self.reversible,
            removal_log: self.log.entries().to_vec(),
        }
    }

    /// Upper bound on voxels touched per tick: regions x 16 x 16 x N
    pub fn tick_budget(&self, config: &BusterConfig) -> usize {
        (self.regions.len() * REGION_COLUMNS)
            .saturating_mul(config.depth() as usize)
            .max(1)
    }

    /// Lower the front to the highest occupied level. With nothing
    /// occupied, the front drops below `stop_level` so the next tick
    /// completes without touching anything.
    pub fn clamp_to_highest(&mut self, highest: Option<i32>, stop_level: i32) {
        if self.phase() != TaskPhase::Forward {
            return;
        }
        let top = highest.unwrap_or(stop_level.saturating_sub(1));
        if top < self.current_level {
            log::debug!("Task {} skipping empty levels {}..{}", self.id, self.current_level, top + 1);
            self.current_level = top;
        }
    }

    /// Switch into reverse.
    ///
    /// On success the removal log is in replay mode; the caller swaps the
    /// forward timer for a reverse one.
    pub fn request_cancel(
        &mut self,
        requester: &OwnerId,
        ctx: &BusterContext,
    ) -> std::result::Result<(), CancelRefusal> {
        if *requester != self.owner && !ctx.permissions.can_cancel_others(requester) {
            return Err(CancelRefusal::NotPermitted);
        }
        if self.cancelled {
            return Err(CancelRefusal::AlreadyCancelled);
        }
        if self.finished.is_some() {
            return Err(CancelRefusal::AlreadyFinished);
        }

        let minimum = ctx.config.minimum_cancel_level;
        if self.current_level < minimum {
            return Err(CancelRefusal::BelowMinimumLevel {
                level: self.current_level,
                minimum,
            });
        }

        self.cancelled = true;
        self.log.begin_replay();
        Ok(())
    }

    /// Run one tick in the current phase. Ticking a finished task does
    /// nothing.
    pub fn tick(&mut self, ctx: &BusterContext) -> TickReport {
        match self.phase() {
            TaskPhase::Forward => self.tick_forward(ctx),
            TaskPhase::Reverse => self.tick_reverse(ctx),
            TaskPhase::Finished(reason) => {
                let mut report = TickReport::new(self.phase(), self.current_level);
                report.outcome = TickOutcome::Finished(reason);
                report
            }
        }
    }

    fn tick_forward(&mut self, ctx: &BusterContext) -> TickReport {
        let config = &ctx.config;
        let mut report = TickReport::new(TaskPhase::Forward, self.current_level);

        if self.current_level < config.stop_level {
            self.finished = Some(FinishReason::Completed);
            report.outcome = TickOutcome::Finished(FinishReason::Completed);
            return report;
        }

        let depth = config.depth();
        let levels = LevelScanner::level_window(self.current_level, depth, config.stop_level);
        let mut batch = BatchMutator::with_capacity(self.regions.len() * REGION_COLUMNS * levels.len());

        for candidate in LevelScanner::candidates_at_levels(ctx.world.as_ref(), &self.regions, &levels) {
            report.visited += 1;

            if let Some(reason) = veto(&self.owner, ctx, &candidate) {
                report.skipped.record(reason);
                continue;
            }

            if self.reversible {
                let snapshot = VoxelSnapshot {
                    coord: candidate.coord,
                    inventory: ctx.world.attached_inventory(candidate.coord),
                    block: candidate.block,
                };
                if let Err(e) = self.log.append(snapshot) {
                    log::warn!("Task {} not removing {}: {}", self.id, candidate.coord, e);
                    continue;
                }
            }

            batch.stage(candidate.coord, BlockData::air());
            report.removed += 1;
        }

        // None once the front runs off the bottom of the level range
        let next_level = self.current_level.checked_sub(depth);
        let level_after = next_level.unwrap_or(i32::MIN);
        batch.on_committed(progress_callback(
            ctx,
            self.owner,
            self.id,
            MessageKey::BusterProgress,
            level_after,
        ));
        report.failed_writes = batch.commit(ctx.world.as_ref()).failed;

        self.current_level = level_after;
        report.levels = levels;
        report.level = level_after;

        if next_level.is_none() || self.current_level < config.stop_level {
            self.finished = Some(FinishReason::Completed);
            report.outcome = TickOutcome::Finished(FinishReason::Completed);
        }

        log::debug!(
            "Task {} forward tick: levels {:?}, removed {}, skipped {}, level now {}",
            self.id,
            report.levels,
            report.removed,
            report.skipped.total(),
            self.current_level
        );
        report
    }

    fn tick_reverse(&mut self, ctx: &BusterContext) -> TickReport {
        let mut report = TickReport::new(TaskPhase::Reverse, self.current_level);
        let budget = self.tick_budget(&ctx.config);
        let mut batch = BatchMutator::with_capacity(budget.min(self.log.len()));

        for _ in 0..budget {
            match self.log.pop_last() {
                Ok(snapshot) => {
                    self.current_level = snapshot.coord.y();
                    batch.stage_snapshot(snapshot);
                    report.restored += 1;
                }
                Err(_) => {
                    self.finished = Some(FinishReason::Cancelled);
                    report.outcome = TickOutcome::Finished(FinishReason::Cancelled);
                    break;
                }
            }
        }

        batch.on_committed(progress_callback(
            ctx,
            self.owner,
            self.id,
            MessageKey::CancelProgress,
            self.current_level,
        ));
        report.failed_writes = batch.commit(ctx.world.as_ref()).failed;
        report.level = self.current_level;

        log::debug!(
            "Task {} reverse tick: restored {}, {} left, level now {}",
            self.id,
            report.restored,
            self.log.len(),
            self.current_level
        );
        report
    }
}

/// First policy that rejects the voxel, if any. Each check is independent.
fn veto(owner: &OwnerId, ctx: &BusterContext, candidate: &Candidate) -> Option<SkipReason> {
    if candidate.block.is_air() {
        Some(SkipReason::Air)
    } else if ctx.config.is_blocked(candidate.block.material.name()) {
        Some(SkipReason::Blocked)
    } else if !ctx.world.is_inside_world_border(candidate.coord) {
        Some(SkipReason::OutsideBorder)
    } else if !ctx.permissions.can_modify(owner, candidate.coord) {
        Some(SkipReason::PermissionDenied)
    } else {
        None
    }
}

/// Sends a progress notification if the owner is watching this task.
fn progress_callback(
    ctx: &BusterContext,
    owner: OwnerId,
    id: TaskId,
    key: MessageKey,
    level: i32,
) -> impl FnOnce() + 'static {
    let registry = Arc::clone(&ctx.registry);
    let notifier = Arc::clone(&ctx.notifier);
    move || {
        if registry.get_watched(&owner) == Some(id) {
            notifier.send_progress(&owner, key, level);
        }
    }
}
