//! A declarative, persistent, single-process cron scheduler.
//!
//! Tasks are registered once at startup with a 5-field cron expression and
//! a retry delay; the engine polls on a fixed interval, never runs two
//! instances of the same task concurrently, and survives process restarts
//! by reconciling against a persisted JSON document on disk.

pub mod config;
pub mod cron;
pub mod error;
pub mod executor;
pub mod observability;
pub mod planner;
pub mod poller;
pub mod registry;
pub mod scheduler;
pub mod state;
pub mod time;

pub use config::SchedulerConfig;
pub use cron::CronExpression;
pub use error::{FieldDiff, Result, SchedulerError, TaskListMismatch};
pub use registry::{Registration, RegistrationList, TaskCallback, TaskDefinition, TaskError, TaskFuture, TaskName};
pub use scheduler::Scheduler;
pub use state::{FileBackend, MemoryBackend, StateBackend};
pub use time::{Clock, Instant, ManualClock, SystemClock, TimeDuration};

/// A `Scheduler` wired to the production clock and disk-backed state
/// store. The constructor most embedding applications want.
pub type FileScheduler = Scheduler<SystemClock, FileBackend>;

impl FileScheduler {
    pub fn open(config: &SchedulerConfig) -> Self {
        Scheduler::new(
            std::sync::Arc::new(SystemClock),
            FileBackend::new(&config.state_path),
            config.poll_interval,
        )
    }
}
