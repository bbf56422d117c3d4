//! Error taxonomy.
//!
//! Every fallible surface in the crate returns `SchedulerError`. Callback
//! failures are the one exception: they never escape the Executor, they are
//! absorbed into the retry state machine and reported through observability
//! events instead.

use thiserror::Error;

/// A single field that disagrees between a persisted task record and the
/// current registration list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDiff {
    pub name: String,
    pub field: String,
    pub expected: String,
    pub actual: String,
}

/// The full diff produced when `initialize` finds the registration list
/// inconsistent with persisted state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskListMismatch {
    /// Names present in persisted state but absent from the registration list.
    pub missing: Vec<String>,
    /// Names present in the registration list but absent from persisted state.
    pub extra: Vec<String>,
    /// Names present in both, with a differing identity field.
    pub differing: Vec<FieldDiff>,
}

impl std::fmt::Display for TaskListMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "missing={:?} extra={:?} differing={:?}",
            self.missing, self.extra, self.differing
        )
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid cron expression '{text}': {reason}")]
    InvalidCronExpression { text: String, reason: String },

    #[error("duplicate task name '{0}' in registration list")]
    ScheduleDuplicateTask(String),

    #[error("invalid task name '{0}': names must be non-empty and contain no whitespace")]
    ScheduleInvalidName(String),

    #[error("malformed registration entry: {0}")]
    RegistrationShape(String),

    #[error("cron calculation for task '{task}' exceeded the one-year search cap")]
    CronCalculationError { task: String },

    #[error("registration list does not match persisted state ({0})")]
    TaskListMismatch(TaskListMismatch),

    #[error("persisted state file is structurally invalid: {0}")]
    RuntimeStateCorrupted(String),

    #[error("persisted state file is not valid JSON: {0}")]
    RuntimeStateFileParseError(String),

    #[error("unsupported persisted state schema version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("persisted task '{0}' is not present in the current registration list")]
    TaskNotInRegistrations(String),

    #[error("failed to persist scheduler state: {0}")]
    StatePersistenceError(String),
}

impl From<std::io::Error> for SchedulerError {
    fn from(err: std::io::Error) -> Self {
        SchedulerError::StatePersistenceError(err.to_string())
    }
}

impl From<TaskListMismatch> for SchedulerError {
    fn from(mismatch: TaskListMismatch) -> Self {
        SchedulerError::TaskListMismatch(mismatch)
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
