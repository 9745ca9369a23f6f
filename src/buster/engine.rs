//! Task lifecycle: creation, timers, cancellation and finishing.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;

use super::context::BusterContext;
use super::hooks::MessageKey;
use super::persist::TaskState;
use super::scanner::LevelScanner;
use super::scheduler::{TaskScheduler, TickControl, TimerHandle};
use super::task::{BusterTask, FinishReason, TaskId, TaskPhase, TickOutcome};
use crate::core::error::Error;
use crate::core::types::Result;
use crate::world::{OwnerId, Region, RegionSnapshot};

/// Summary handed to observers when a task ends
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FinishedTask {
    pub id: TaskId,
    pub owner: OwnerId,
    pub kind: String,
    pub regions: Vec<Region>,
    pub reason: FinishReason,
    /// Level the task ended on
    pub level: i32,
}

impl FinishedTask {
    fn from_task(task: &BusterTask, reason: FinishReason) -> Self {
        Self {
            id: task.id(),
            owner: task.owner(),
            kind: task.kind().to_string(),
            regions: task.regions().to_vec(),
            reason,
            level: task.current_level(),
        }
    }
}

/// Told about every task that finishes.
pub trait BusterObserver: Send + Sync {
    fn on_finished(&self, task: &FinishedTask);
}

struct TaskSlot {
    task: BusterTask,
    /// Timer currently driving the task
    timer: Option<TimerHandle>,
}

/// Shared handle to a live task.
///
/// Ticks and cancellation both go through the slot mutex, so a cancel
/// never observes a half-finished tick or a half-swapped timer.
pub struct TaskHandle {
    id: TaskId,
    owner: OwnerId,
    slot: Mutex<TaskSlot>,
    observers: Vec<Arc<dyn BusterObserver>>,
    finished: watch::Sender<Option<FinishReason>>,
}

impl TaskHandle {
    fn new(task: BusterTask, observers: Vec<Arc<dyn BusterObserver>>) -> Self {
        let (finished, _) = watch::channel(None);
        Self {
            id: task.id(),
            owner: task.owner(),
            slot: Mutex::new(TaskSlot { task, timer: None }),
            observers,
            finished,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    pub fn kind(&self) -> String {
        self.slot.lock().unwrap().task.kind().to_string()
    }

    pub fn regions(&self) -> Vec<Region> {
        self.slot.lock().unwrap().task.regions().to_vec()
    }

    pub fn current_level(&self) -> i32 {
        self.slot.lock().unwrap().task.current_level()
    }

    pub fn is_running(&self) -> bool {
        self.slot.lock().unwrap().task.is_running()
    }

    pub fn phase(&self) -> TaskPhase {
        self.slot.lock().unwrap().task.phase()
    }

    /// Number of removed voxels waiting to be restored
    pub fn logged_voxels(&self) -> usize {
        self.slot.lock().unwrap().task.removal_log().len()
    }

    pub fn snapshot_state(&self) -> TaskState {
        self.slot.lock().unwrap().task.snapshot_state()
    }

    /// How the task ended, if it has
    pub fn finish_reason(&self) -> Option<FinishReason> {
        *self.finished.borrow()
    }

    /// Wait until the task finishes.
    pub async fn wait_finished(&self) -> Option<FinishReason> {
        let mut rx = self.finished.subscribe();
        rx.wait_for(Option::is_some).await.ok().and_then(|reason| *reason)
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("finished", &*self.finished.borrow())
            .finish()
    }
}

struct EngineInner {
    ctx: BusterContext,
    scheduler: TaskScheduler,
    tasks: Mutex<HashMap<TaskId, Arc<TaskHandle>>>,
    /// Id of the next task; only advanced by a successful reservation
    next_id: Mutex<u64>,
    observers: Mutex<Vec<Arc<dyn BusterObserver>>>,
}

/// Creates busting tasks and drives them to completion.
#[derive(Clone)]
pub struct BusterEngine {
    inner: Arc<EngineInner>,
}

impl BusterEngine {
    pub fn new(ctx: BusterContext, scheduler: TaskScheduler) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                ctx,
                scheduler,
                tasks: Mutex::new(HashMap::new()),
                next_id: Mutex::new(1),
                observers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn context(&self) -> &BusterContext {
        &self.inner.ctx
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.inner.scheduler
    }

    /// Register an observer for tasks created from now on.
    pub fn add_observer(&self, observer: Arc<dyn BusterObserver>) {
        self.inner.observers.lock().unwrap().push(observer);
    }

    /// Start demolishing `regions` for `owner`.
    ///
    /// Fails with [`Error::EmptyRegionSet`] or [`Error::RegionConflict`];
    /// on failure no task exists and no region is reserved.
    pub fn create(
        &self,
        owner: OwnerId,
        regions: Vec<Region>,
        kind: impl Into<String>,
        start_level: i32,
        reversible: bool,
    ) -> Result<Arc<TaskHandle>> {
        let regions = dedup_regions(regions);
        let id = self.reserve(owner, &regions)?;

        let task = BusterTask::new(id, owner, kind, regions, start_level, reversible);
        log::info!(
            "Task {} created for {}: {} regions from level {}",
            id,
            owner,
            task.regions().len(),
            start_level
        );

        let handle = self.install(task);
        self.start_forward(&handle);
        Ok(handle)
    }

    /// [`BusterEngine::create`] with the configured start level and
    /// reversibility.
    pub fn create_default(
        &self,
        owner: OwnerId,
        regions: Vec<Region>,
        kind: impl Into<String>,
    ) -> Result<Arc<TaskHandle>> {
        let config = &self.inner.ctx.config;
        self.create(owner, regions, kind, config.starting_level, config.reverse_mode_enabled)
    }

    /// Re-create a task from persisted state. Cancelled states resume in
    /// reverse.
    pub fn resume(&self, state: TaskState) -> Result<Arc<TaskHandle>> {
        let mut state = state;
        state.regions = dedup_regions(state.regions);
        let id = self.reserve(state.owner, &state.regions)?;

        let task = BusterTask::from_state(id, state);
        log::info!(
            "Task {} resumed for {} at level {} ({} logged voxels, cancelled: {})",
            id,
            task.owner(),
            task.current_level(),
            task.removal_log().len(),
            task.is_cancelled()
        );

        let cancelled = task.is_cancelled();
        let handle = self.install(task);
        if cancelled {
            let mut slot = handle.slot.lock().unwrap();
            self.arm(&handle, &mut slot, TaskPhase::Reverse, self.inner.ctx.config.start_delay());
        } else {
            self.start_forward(&handle);
        }
        Ok(handle)
    }

    /// Ask a task to stop and undo its work.
    pub fn request_cancel(&self, handle: &Arc<TaskHandle>, requester: &OwnerId) -> Result<()> {
        let mut slot = handle.slot.lock().unwrap();
        slot.task.request_cancel(requester, &self.inner.ctx)?;
        self.arm(handle, &mut slot, TaskPhase::Reverse, self.inner.ctx.config.tick_interval());
        let level = slot.task.current_level();
        drop(slot);

        log::info!("Task {} cancelled by {} at level {}", handle.id, requester, level);
        if *requester != handle.owner {
            self.inner
                .ctx
                .notifier
                .send_message(&handle.owner, MessageKey::CancelledByOther);
        }
        Ok(())
    }

    pub fn task(&self, id: TaskId) -> Option<Arc<TaskHandle>> {
        self.inner.tasks.lock().unwrap().get(&id).cloned()
    }

    /// The live task owning `region`
    pub fn task_for_region(&self, region: Region) -> Option<Arc<TaskHandle>> {
        self.inner
            .ctx
            .registry
            .lookup_by_region(region)
            .and_then(|id| self.task(id))
    }

    pub fn tasks_of(&self, owner: &OwnerId) -> Vec<Arc<TaskHandle>> {
        self.inner
            .ctx
            .registry
            .tasks_of(owner)
            .into_iter()
            .filter_map(|id| self.task(id))
            .collect()
    }

    /// Every live task, in id order
    pub fn tasks(&self) -> Vec<Arc<TaskHandle>> {
        let mut tasks: Vec<_> = self.inner.tasks.lock().unwrap().values().cloned().collect();
        tasks.sort_by_key(|handle| handle.id);
        tasks
    }

    /// Point an owner's progress messages at one of their tasks.
    pub fn set_watched(&self, owner: OwnerId, id: TaskId) -> Result<()> {
        match self.task(id) {
            Some(handle) if handle.owner == owner => {
                self.inner.ctx.registry.set_watched(owner, id);
                Ok(())
            }
            Some(_) => Err(Error::InvalidState("task belongs to another owner")),
            None => Err(Error::InvalidState("no such task")),
        }
    }

    /// Persistable state of every live task
    pub fn snapshot_all(&self) -> Vec<TaskState> {
        self.tasks()
            .iter()
            .filter(|handle| handle.is_running())
            .map(|handle| handle.snapshot_state())
            .collect()
    }

    fn reserve(&self, owner: OwnerId, regions: &[Region]) -> Result<TaskId> {
        if regions.is_empty() {
            return Err(Error::EmptyRegionSet);
        }

        let registry = &self.inner.ctx.registry;
        let mut next_id = self.inner.next_id.lock().unwrap();
        let id = TaskId(*next_id);
        if registry.reserve_regions(regions, owner, id) {
            *next_id += 1;
            return Ok(id);
        }
        drop(next_id);

        let (region, holder) = regions
            .iter()
            .find_map(|region| registry.lookup_by_region(*region).map(|task| (*region, Some(task))))
            .unwrap_or((regions[0], None));
        log::info!("Refusing task for {}: region {} is owned by {:?}", owner, region, holder);
        Err(Error::RegionConflict { region, owner: holder })
    }

    fn install(&self, task: BusterTask) -> Arc<TaskHandle> {
        let observers = self.inner.observers.lock().unwrap().clone();
        let id = task.id();
        let owner = task.owner();
        let handle = Arc::new(TaskHandle::new(task, observers));

        self.inner.tasks.lock().unwrap().insert(id, Arc::clone(&handle));
        if self.inner.ctx.config.notify_on_start {
            self.inner.ctx.registry.set_watched(owner, id);
        }
        handle
    }

    /// Begin the forward pipeline after the start delay.
    fn start_forward(&self, handle: &Arc<TaskHandle>) {
        let config = &self.inner.ctx.config;
        let delay = config.start_delay();
        let mut slot = handle.slot.lock().unwrap();

        if !config.skip_empty_air_levels {
            self.arm(handle, &mut slot, TaskPhase::Forward, delay);
            return;
        }

        let engine = self.clone();
        let scan_handle = Arc::clone(handle);
        let timer = self
            .inner
            .scheduler
            .run_later(delay, move || engine.scan_highest_level(scan_handle));
        slot.timer = Some(timer);
    }

    /// Snapshot the regions on the primary context, find the top of the
    /// occupied volume in the background, then start ticking from there.
    fn scan_highest_level(&self, handle: Arc<TaskHandle>) {
        let regions = {
            let slot = handle.slot.lock().unwrap();
            if slot.task.phase() != TaskPhase::Forward {
                return;
            }
            slot.task.regions().to_vec()
        };

        let world = &self.inner.ctx.world;
        let snapshots: Vec<RegionSnapshot> =
            regions.iter().map(|region| world.snapshot_region(*region)).collect();

        let engine = self.clone();
        self.inner.scheduler.run_background_then(
            move || LevelScanner::highest_occupied_level(&snapshots),
            move |highest| {
                let mut slot = handle.slot.lock().unwrap();
                // cancelled while scanning; the cancel already armed reverse
                if slot.task.phase() != TaskPhase::Forward {
                    return;
                }
                slot.task.clamp_to_highest(highest, engine.inner.ctx.config.stop_level);
                engine.arm(&handle, &mut slot, TaskPhase::Forward, Duration::ZERO);
            },
        );
    }

    /// Replace the slot's timer with one ticking the task in `phase`.
    fn arm(&self, handle: &Arc<TaskHandle>, slot: &mut TaskSlot, phase: TaskPhase, delay: Duration) {
        let engine = self.clone();
        let driven = Arc::clone(handle);
        let timer = self.inner.scheduler.run_periodically(
            delay,
            self.inner.ctx.config.tick_interval(),
            move || engine.drive(&driven, phase),
        );

        if let Some(old) = slot.timer.replace(timer) {
            old.cancel();
        }
    }

    /// One timer tick, on the primary context.
    fn drive(&self, handle: &Arc<TaskHandle>, phase: TaskPhase) -> TickControl {
        let mut slot = handle.slot.lock().unwrap();
        // a timer left over from before a phase change
        if slot.task.phase() != phase {
            return TickControl::Stop;
        }

        let report = slot.task.tick(&self.inner.ctx);
        match report.outcome {
            TickOutcome::Continue => TickControl::Continue,
            TickOutcome::Finished(reason) => {
                if let Some(timer) = slot.timer.take() {
                    timer.cancel();
                }
                let finished = FinishedTask::from_task(&slot.task, reason);
                drop(slot);

                self.finish(handle, finished);
                TickControl::Stop
            }
        }
    }

    fn finish(&self, handle: &TaskHandle, finished: FinishedTask) {
        let ctx = &self.inner.ctx;
        let config = &ctx.config;

        ctx.registry.release(finished.id);
        self.inner.tasks.lock().unwrap().remove(&finished.id);

        let (grant, message) = match finished.reason {
            FinishReason::Completed => (config.give_reward_on_completion, MessageKey::BusterFinished),
            FinishReason::Cancelled => (config.refund_on_cancel, MessageKey::CancelFinished),
        };
        if grant && !ctx.rewards.grant(&finished.kind, &finished.owner) {
            log::info!("Owner {} unreachable, {} not handed out", finished.owner, finished.kind);
        }
        ctx.notifier.send_message(&finished.owner, message);

        // let in-flight commits settle before refreshing
        let world = Arc::clone(&ctx.world);
        let regions = finished.regions.clone();
        self.inner.scheduler.run_later(config.tick_interval(), move || {
            for region in regions {
                world.refresh_visual_state(region);
            }
        });

        log::info!(
            "Task {} finished ({:?}) at level {}",
            finished.id,
            finished.reason,
            finished.level
        );
        for observer in &handle.observers {
            observer.on_finished(&finished);
        }
        handle.finished.send_replace(Some(finished.reason));
    }
}

fn dedup_regions(regions: Vec<Region>) -> Vec<Region> {
    let mut seen = HashSet::new();
    regions.into_iter().filter(|region| seen.insert(*region)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buster::config::BusterConfig;
    use crate::buster::hooks::{RecordingNotifier, RecordingRewards, StaticPermissions};
    use crate::buster::registry::{MemoryRegistry, Registry};
    use crate::buster::scheduler::{PrimaryContext, PrimaryQueue};
    use crate::core::error::CancelRefusal;
    use crate::world::{BlockData, Material, MemoryWorld, WorldId};

    const W: WorldId = WorldId(0);

    struct Fixture {
        engine: BusterEngine,
        world: Arc<MemoryWorld>,
        notifier: Arc<RecordingNotifier>,
        rewards: Arc<RecordingRewards>,
        registry: Arc<MemoryRegistry>,
    }

    fn fixture(config: BusterConfig) -> Fixture {
        fixture_with(config, |ctx| ctx)
    }

    fn fixture_with(config: BusterConfig, customize: impl FnOnce(BusterContext) -> BusterContext) -> Fixture {
        let (primary, queue) = PrimaryContext::channel();
        tokio::spawn(queue.run());
        build(config, customize, primary)
    }

    /// Fixture whose primary queue the test pumps by hand
    fn pumped_fixture(config: BusterConfig) -> (Fixture, PrimaryQueue) {
        let (primary, queue) = PrimaryContext::channel();
        (build(config, |ctx| ctx, primary), queue)
    }

    fn build(
        config: BusterConfig,
        customize: impl FnOnce(BusterContext) -> BusterContext,
        primary: PrimaryContext,
    ) -> Fixture {
        let world = Arc::new(MemoryWorld::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let rewards = Arc::new(RecordingRewards::new());
        let registry = Arc::new(MemoryRegistry::new());
        let ctx = BusterContext::new(world.clone(), config)
            .unwrap()
            .with_notifier(notifier.clone())
            .with_rewards(rewards.clone())
            .with_registry(registry.clone());
        let engine = BusterEngine::new(customize(ctx), TaskScheduler::current(primary));

        Fixture { engine, world, notifier, rewards, registry }
    }

    fn config(start: i32, stop: i32, depth: u32) -> BusterConfig {
        BusterConfig {
            starting_level: start,
            stop_level: stop,
            levels_per_tick: depth,
            tick_interval_ms: 100,
            skip_empty_air_levels: false,
            ..Default::default()
        }
    }

    fn terrain(world: &MemoryWorld, region: Region, top: i32) {
        world.fill(region, 0..=0, &BlockData::new(Material::new("BEDROCK"), 0));
        for y in 1..=top {
            world.fill(region, y..=y, &BlockData::new(Material::new("STONE"), y as u32));
        }
    }

    #[derive(Default)]
    struct Collect(Mutex<Vec<FinishedTask>>);

    impl BusterObserver for Collect {
        fn on_finished(&self, task: &FinishedTask) {
            self.0.lock().unwrap().push(task.clone());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_to_completion() {
        let cfg = BusterConfig { give_reward_on_completion: true, ..config(10, 1, 2) };
        let fx = fixture(cfg);
        let region = Region::new(W, 0, 0);
        terrain(&fx.world, region, 10);
        let observer = Arc::new(Collect::default());
        fx.engine.add_observer(observer.clone());

        let owner = OwnerId::random();
        let handle = fx.engine.create(owner, vec![region], "buster", 10, true).unwrap();
        assert_eq!(fx.engine.task_for_region(region).map(|h| h.id()), Some(handle.id()));

        assert_eq!(handle.wait_finished().await, Some(FinishReason::Completed));
        assert!(!handle.is_running());
        assert_eq!(fx.world.solid_count(region), 256);
        assert_eq!(fx.notifier.progress_levels(MessageKey::BusterProgress), vec![8, 6, 4, 2, 0]);
        assert_eq!(fx.notifier.messages(), vec![MessageKey::BusterFinished]);
        assert_eq!(fx.rewards.granted(), vec![("buster".to_string(), owner)]);

        assert!(fx.engine.tasks().is_empty());
        assert_eq!(fx.registry.task_count(), 0);
        assert_eq!(fx.registry.get_watched(&owner), None);

        let finished = observer.0.lock().unwrap().clone();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].reason, FinishReason::Completed);
        assert_eq!(finished[0].level, 0);

        // visual refresh lands one interval later
        assert!(fx.world.refreshed_regions().is_empty());
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(fx.world.refreshed_regions(), vec![region]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_restores_world() {
        let fx = fixture(BusterConfig { refund_on_cancel: true, ..config(10, 1, 1) });
        let region = Region::new(W, 0, 0);
        terrain(&fx.world, region, 10);
        let before = fx.world.dump();

        let owner = OwnerId::random();
        let handle = fx.engine.create(owner, vec![region], "buster", 10, true).unwrap();
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(handle.current_level() < 10);
        assert!(handle.logged_voxels() > 0);

        fx.engine.request_cancel(&handle, &owner).unwrap();
        assert_eq!(handle.phase(), TaskPhase::Reverse);
        let again = fx.engine.request_cancel(&handle, &owner);
        assert!(matches!(again, Err(Error::CancelRefused(CancelRefusal::AlreadyCancelled))));

        assert_eq!(handle.wait_finished().await, Some(FinishReason::Cancelled));
        assert_eq!(fx.world.dump(), before);
        assert!(fx.notifier.messages().contains(&MessageKey::CancelFinished));
        assert_eq!(fx.rewards.granted(), vec![("buster".to_string(), owner)]);
        assert!(fx.engine.task_for_region(region).is_none());

        let refused = fx.engine.request_cancel(&handle, &owner);
        assert!(matches!(refused, Err(Error::CancelRefused(CancelRefusal::AlreadyCancelled))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_hands_out_nothing_by_default() {
        let fx = fixture(config(10, 1, 1));
        let region = Region::new(W, 0, 0);
        terrain(&fx.world, region, 10);

        let owner = OwnerId::random();
        let handle = fx.engine.create(owner, vec![region], "buster", 10, true).unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        fx.engine.request_cancel(&handle, &owner).unwrap();

        assert_eq!(handle.wait_finished().await, Some(FinishReason::Cancelled));
        assert!(fx.notifier.messages().contains(&MessageKey::CancelFinished));
        assert!(fx.rewards.granted().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_by_other_identity() {
        let admin = OwnerId::random();
        let fx = fixture_with(config(10, 1, 1), |ctx| {
            ctx.with_permissions(Arc::new(StaticPermissions::new().cancel_admin(admin)))
        });
        let region = Region::new(W, 0, 0);
        terrain(&fx.world, region, 10);

        let owner = OwnerId::random();
        let handle = fx.engine.create(owner, vec![region], "buster", 10, true).unwrap();

        let stranger = fx.engine.request_cancel(&handle, &OwnerId::random());
        assert!(matches!(stranger, Err(Error::CancelRefused(CancelRefusal::NotPermitted))));
        assert_eq!(handle.phase(), TaskPhase::Forward);

        fx.engine.request_cancel(&handle, &admin).unwrap();
        assert_eq!(handle.wait_finished().await, Some(FinishReason::Cancelled));
        assert!(fx.notifier.messages().contains(&MessageKey::CancelledByOther));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_refused_below_minimum() {
        let cfg = BusterConfig { minimum_cancel_level: 9, ..config(10, 1, 1) };
        let fx = fixture(cfg);
        let region = Region::new(W, 0, 0);
        terrain(&fx.world, region, 10);

        let owner = OwnerId::random();
        let handle = fx.engine.create(owner, vec![region], "buster", 10, true).unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;

        let refused = fx.engine.request_cancel(&handle, &owner);
        assert!(matches!(
            refused,
            Err(Error::CancelRefused(CancelRefusal::BelowMinimumLevel { minimum: 9, .. }))
        ));
        assert_eq!(handle.wait_finished().await, Some(FinishReason::Completed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_region_conflict_creates_nothing() {
        let fx = fixture(config(10, 1, 1));
        let shared = Region::new(W, 0, 0);
        let free = Region::new(W, 5, 5);

        let first = fx.engine.create(OwnerId::random(), vec![shared], "buster", 10, true).unwrap();
        let second = fx.engine.create(OwnerId::random(), vec![free, shared], "buster", 10, true);

        match second {
            Err(Error::RegionConflict { region, owner }) => {
                assert_eq!(region, shared);
                assert_eq!(owner, Some(first.id()));
            }
            other => panic!("expected a region conflict, got {:?}", other),
        }
        assert_eq!(fx.engine.tasks().len(), 1);
        assert_eq!(fx.registry.lookup_by_region(free), None);

        // refused creations leave no gap in the ids
        let third = fx.engine.create(OwnerId::random(), vec![free], "buster", 10, true).unwrap();
        assert_eq!(third.id(), TaskId(first.id().0 + 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_region_set_is_rejected() {
        let fx = fixture(config(10, 1, 1));
        let result = fx.engine.create(OwnerId::random(), Vec::new(), "buster", 10, true);
        assert!(matches!(result, Err(Error::EmptyRegionSet)));
        assert!(fx.engine.tasks().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_regions_are_merged() {
        let fx = fixture(config(10, 1, 1));
        let region = Region::new(W, 0, 0);
        let handle = fx.engine.create(OwnerId::random(), vec![region, region], "buster", 10, true).unwrap();
        assert_eq!(handle.regions(), vec![region]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_empty_sky_starts_at_terrain_top() {
        let cfg = BusterConfig { skip_empty_air_levels: true, ..config(255, 1, 5) };
        let fx = fixture(cfg);
        let region = Region::new(W, 0, 0);
        terrain(&fx.world, region, 5);

        let owner = OwnerId::random();
        let handle = fx.engine.create(owner, vec![region], "buster", 255, true).unwrap();

        assert_eq!(handle.wait_finished().await, Some(FinishReason::Completed));
        // one tick covers levels 5..=1 after the clamp
        assert_eq!(fx.notifier.progress_levels(MessageKey::BusterProgress), vec![0]);
        assert_eq!(fx.world.solid_count(region), 256);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_start_delay_skips_scan() {
        let cfg = BusterConfig { skip_empty_air_levels: true, start_delay_ms: 500, ..config(255, 1, 1) };
        let fx = fixture(cfg);
        let region = Region::new(W, 0, 0);
        terrain(&fx.world, region, 10);
        let before = fx.world.dump();

        let owner = OwnerId::random();
        let handle = fx.engine.create(owner, vec![region], "buster", 255, true).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        fx.engine.request_cancel(&handle, &owner).unwrap();
        assert_eq!(handle.phase(), TaskPhase::Reverse);

        assert_eq!(handle.wait_finished().await, Some(FinishReason::Cancelled));
        tokio::time::sleep(Duration::from_secs(1)).await;

        // the scan never clamped the front and no forward tick ran
        assert_eq!(handle.current_level(), 255);
        assert_eq!(fx.world.write_count(), 0);
        assert_eq!(fx.world.dump(), before);
        assert!(fx.notifier.progress_levels(MessageKey::BusterProgress).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_scan_in_flight() {
        let cfg = BusterConfig { skip_empty_air_levels: true, start_delay_ms: 200, ..config(255, 1, 1) };
        let (fx, mut queue) = pumped_fixture(cfg);
        let region = Region::new(W, 0, 0);
        terrain(&fx.world, region, 10);
        let before = fx.world.dump();

        let owner = OwnerId::random();
        let handle = fx.engine.create(owner, vec![region], "buster", 255, true).unwrap();

        // start delay elapses; the scan snapshots and goes to the background
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(queue.run_pending(), 1);

        fx.engine.request_cancel(&handle, &owner).unwrap();
        assert_eq!(handle.phase(), TaskPhase::Reverse);

        // the background result lands after the cancel and is dropped
        while queue.run_pending() == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(handle.phase(), TaskPhase::Reverse);
        assert_eq!(handle.current_level(), 255);

        tokio::spawn(queue.run());
        assert_eq!(handle.wait_finished().await, Some(FinishReason::Cancelled));
        assert_eq!(fx.world.write_count(), 0);
        assert_eq!(fx.world.dump(), before);
        assert!(fx.notifier.progress_levels(MessageKey::BusterProgress).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_delay_holds_first_tick() {
        let cfg = BusterConfig { start_delay_ms: 500, ..config(10, 1, 1) };
        let fx = fixture(cfg);
        let region = Region::new(W, 0, 0);
        terrain(&fx.world, region, 10);

        let handle = fx.engine.create(OwnerId::random(), vec![region], "buster", 10, true).unwrap();
        tokio::time::sleep(Duration::from_millis(450)).await;
        assert_eq!(handle.current_level(), 10);
        assert_eq!(fx.world.write_count(), 0);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(handle.current_level(), 9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_cancelled_state_reverses() {
        let fx = fixture(config(10, 1, 2));
        let region = Region::new(W, 0, 0);
        terrain(&fx.world, region, 10);
        let before = fx.world.dump();

        // demolish two ticks' worth outside the engine
        let owner = OwnerId::random();
        let mut task = BusterTask::new(TaskId(99), owner, "buster", vec![region], 10, true);
        task.tick(fx.engine.context());
        task.tick(fx.engine.context());
        assert_eq!(fx.world.solid_count(region), 256 * 7);

        let mut state = task.snapshot_state();
        state.cancelled = true;
        let handle = fx.engine.resume(state).unwrap();
        assert_eq!(handle.phase(), TaskPhase::Reverse);

        assert_eq!(handle.wait_finished().await, Some(FinishReason::Cancelled));
        assert_eq!(fx.world.dump(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookups_and_snapshots() {
        let fx = fixture(config(10, 1, 1));
        let owner = OwnerId::random();
        let other = OwnerId::random();
        let a = fx.engine.create(owner, vec![Region::new(W, 0, 0)], "buster", 10, true).unwrap();
        let b = fx.engine.create(owner, vec![Region::new(W, 1, 0)], "buster", 10, true).unwrap();
        let c = fx.engine.create(other, vec![Region::new(W, 2, 0)], "buster", 10, true).unwrap();

        let mine: Vec<TaskId> = fx.engine.tasks_of(&owner).iter().map(|h| h.id()).collect();
        assert_eq!(mine, vec![a.id(), b.id()]);
        assert_eq!(fx.engine.task(c.id()).map(|h| h.owner()), Some(other));

        // the newest task is watched; switch back to the first one
        assert_eq!(fx.registry.get_watched(&owner), Some(b.id()));
        fx.engine.set_watched(owner, a.id()).unwrap();
        assert_eq!(fx.registry.get_watched(&owner), Some(a.id()));
        assert!(fx.engine.set_watched(owner, c.id()).is_err());

        let states = fx.engine.snapshot_all();
        assert_eq!(states.len(), 3);
        assert!(states.iter().all(|s| !s.cancelled));
    }
}
