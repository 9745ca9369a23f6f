//! Leveled, reversible demolition of voxel regions.

pub mod batch;
pub mod config;
pub mod context;
pub mod engine;
pub mod hooks;
pub mod persist;
pub mod registry;
pub mod removal_log;
pub mod scanner;
pub mod scheduler;
pub mod task;

pub use batch::{BatchMutator, CommitReport};
pub use config::BusterConfig;
pub use context::BusterContext;
pub use engine::{BusterEngine, BusterObserver, FinishedTask, TaskHandle};
pub use hooks::{MessageKey, NotificationSink, PermissionOracle, RewardGrantor};
pub use persist::TaskState;
pub use registry::{MemoryRegistry, Registry};
pub use removal_log::{LogMode, RemovalLog};
pub use scanner::LevelScanner;
pub use scheduler::{PrimaryContext, PrimaryQueue, TaskScheduler, TickControl, TimerHandle};
pub use task::{BusterTask, FinishReason, SkipReason, TaskId, TaskPhase, TickOutcome, TickReport};
