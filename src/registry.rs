//! Task identity and the validated registration table.

use crate::cron::CronExpression;
use crate::error::{Result, SchedulerError};
use crate::time::TimeDuration;
use std::collections::BTreeMap;

/// A task's stable identity. Opaque beyond equality and ordering; the
/// scheduler never interprets its contents.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskName(String);

impl TaskName {
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.is_empty() || raw.chars().any(char::is_whitespace) {
            return Err(SchedulerError::ScheduleInvalidName(raw));
        }
        Ok(TaskName(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The raw cron text as supplied at registration time, kept alongside the
/// parsed `CronExpression` so identity checks can compare the exact
/// source text rather than a re-serialized form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronText(String);

impl CronText {
    pub fn new(raw: impl Into<String>) -> Self {
        CronText(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// The callback a task runs. Errors are boxed so arbitrary application
/// error types can flow through without the crate depending on them.
pub type TaskError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The boxed future a callback invocation returns.
pub type TaskFuture = std::pin::Pin<Box<dyn std::future::Future<Output = std::result::Result<(), TaskError>> + Send>>;

/// The callback itself: called fresh on every dispatch, with no arguments
/// beyond whatever the embedding application captured when registering it.
pub type TaskCallback = std::sync::Arc<dyn Fn() -> TaskFuture + Send + Sync>;

/// A task as supplied by the embedding application at startup.
#[derive(Clone)]
pub struct Registration {
    pub name: String,
    pub cron: String,
    pub retry_delay: TimeDuration,
    pub callback: TaskCallback,
}

pub type RegistrationList = Vec<Registration>;

/// A validated, parsed task, ready to be scheduled.
#[derive(Clone)]
pub struct TaskDefinition {
    pub name: TaskName,
    pub cron_text: CronText,
    pub cron: CronExpression,
    pub retry_delay: TimeDuration,
    pub callback: TaskCallback,
}

/// The validated registration table: a name-keyed lookup of every task
/// the embedding application registered, built once at `initialize` time
/// and immutable for the lifetime of the running scheduler.
pub struct Registry {
    tasks: BTreeMap<TaskName, TaskDefinition>,
}

impl Registry {
    /// Validates a raw registration list against the rules: non-empty
    /// names with no whitespace, no duplicate names, parseable cron
    /// expressions, and non-negative retry delays. Warns (does not fail)
    /// when a task's cron cadence is tighter than `poll_interval`, since
    /// such a task can only ever fire once per poll.
    pub fn build(registrations: RegistrationList, poll_interval: TimeDuration) -> Result<Self> {
        let mut tasks = BTreeMap::new();
        for reg in registrations {
            let name = TaskName::new(reg.name.clone())?;
            if tasks.contains_key(&name) {
                return Err(SchedulerError::ScheduleDuplicateTask(reg.name));
            }
            let cron = CronExpression::parse(&reg.cron)?;
            if let Some(min_interval) = cron.min_interval_minutes() {
                let poll_minutes = poll_interval.as_millis() as i64 / 60_000;
                if poll_minutes > 0 && min_interval < poll_minutes {
                    tracing::warn!(
                        task = %name,
                        cron = %reg.cron,
                        min_interval_minutes = min_interval,
                        poll_interval_minutes = poll_minutes,
                        "task cadence is tighter than the poll interval; some fires will be skipped"
                    );
                }
            }
            let definition = TaskDefinition {
                name: name.clone(),
                cron_text: CronText::new(reg.cron.clone()),
                cron,
                retry_delay: reg.retry_delay,
                callback: reg.callback,
            };
            tasks.insert(name, definition);
        }
        Ok(Registry { tasks })
    }

    pub fn get(&self, name: &TaskName) -> Option<&TaskDefinition> {
        self.tasks.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.keys().any(|n| n.as_str() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TaskName, &TaskDefinition)> {
        self.tasks.iter()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// `(cronText, retryDelayMs)` keyed by name, used for the startup
    /// identity check and for detecting a no-op re-`initialize`.
    pub fn identity_set(&self) -> BTreeMap<String, (String, u64)> {
        self.tasks
            .values()
            .map(|t| {
                (
                    t.name.as_str().to_string(),
                    (t.cron_text.as_str().to_string(), t.retry_delay.as_millis()),
                )
            })
            .collect()
    }
}
