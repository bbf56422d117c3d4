//! Persisted state and the transactional store that guards it.

use crate::error::{Result, SchedulerError};
use crate::registry::Registry;
use crate::time::Instant;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

pub const SCHEMA_VERSION: u32 = 2;

/// The durable fields tracked for one task. `isRunning` is deliberately
/// absent here: it only ever exists in the Executor's in-memory running
/// set and is never written to disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskRecord {
    pub name: String,
    #[serde(rename = "cronExpression")]
    pub cron_expression: String,
    #[serde(rename = "retryDelayMs")]
    pub retry_delay_ms: u64,
    #[serde(rename = "lastAttemptTime", skip_serializing_if = "Option::is_none")]
    pub last_attempt_time: Option<i64>,
    #[serde(rename = "lastSuccessTime", skip_serializing_if = "Option::is_none")]
    pub last_success_time: Option<i64>,
    #[serde(rename = "lastFailureTime", skip_serializing_if = "Option::is_none")]
    pub last_failure_time: Option<i64>,
    #[serde(rename = "pendingRetryUntil", skip_serializing_if = "Option::is_none")]
    pub pending_retry_until: Option<i64>,
    #[serde(rename = "lastEvaluatedFire", skip_serializing_if = "Option::is_none")]
    pub last_evaluated_fire: Option<i64>,
}

impl TaskRecord {
    pub fn fresh(name: &str, cron_expression: &str, retry_delay_ms: u64) -> Self {
        TaskRecord {
            name: name.to_string(),
            cron_expression: cron_expression.to_string(),
            retry_delay_ms,
            last_attempt_time: None,
            last_success_time: None,
            last_failure_time: None,
            pending_retry_until: None,
            last_evaluated_fire: None,
        }
    }
}

/// The full persisted document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersistedState {
    pub version: u32,
    #[serde(rename = "startTime")]
    pub start_time: i64,
    pub tasks: Vec<TaskRecord>,
}

impl PersistedState {
    pub fn initial(registry: &Registry, now: Instant) -> Self {
        let tasks = registry
            .iter()
            .map(|(name, def)| {
                TaskRecord::fresh(name.as_str(), def.cron_text.as_str(), def.retry_delay.as_millis())
            })
            .collect();
        PersistedState {
            version: SCHEMA_VERSION,
            start_time: now.millis(),
            tasks,
        }
    }

    pub fn task(&self, name: &str) -> Option<&TaskRecord> {
        self.tasks.iter().find(|t| t.name == name)
    }

    pub fn task_mut(&mut self, name: &str) -> Option<&mut TaskRecord> {
        self.tasks.iter_mut().find(|t| t.name == name)
    }

    fn validate(&self) -> Result<()> {
        if self.version != SCHEMA_VERSION {
            return Err(SchedulerError::UnsupportedVersion {
                found: self.version,
                expected: SCHEMA_VERSION,
            });
        }
        let mut seen = HashMap::new();
        for task in &self.tasks {
            if seen.insert(task.name.clone(), ()).is_some() {
                return Err(SchedulerError::RuntimeStateCorrupted(format!(
                    "duplicate task record '{}'",
                    task.name
                )));
            }
        }
        Ok(())
    }
}

/// Loads and saves the persisted document. Implementations never need to
/// serialize concurrent access themselves; `StateStore` already holds the
/// document behind a mutex and calls the backend while holding it.
#[async_trait::async_trait]
pub trait StateBackend: Send + Sync {
    async fn load(&self) -> Result<Option<PersistedState>>;
    async fn save(&self, state: &PersistedState) -> Result<()>;
}

/// Production backend: JSON on disk, written atomically via a temp file
/// plus rename so a crash mid-write never corrupts the previous state.
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl AsRef<Path>) -> Self {
        FileBackend {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait::async_trait]
impl StateBackend for FileBackend {
    async fn load(&self) -> Result<Option<PersistedState>> {
        let path = self.path.clone();
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let state: PersistedState = serde_json::from_str(&contents)
            .map_err(|e| SchedulerError::RuntimeStateFileParseError(e.to_string()))?;
        state.validate()?;
        Ok(Some(state))
    }

    async fn save(&self, state: &PersistedState) -> Result<()> {
        let json = serde_json::to_string_pretty(state)
            .map_err(|e| SchedulerError::StatePersistenceError(e.to_string()))?;
        let tmp_path = self.path.with_extension("tmp");
        tokio::fs::write(&tmp_path, json).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}

/// In-memory backend used by tests: no filesystem, no temp files.
#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<Option<PersistedState>>,
}

#[async_trait::async_trait]
impl StateBackend for MemoryBackend {
    async fn load(&self) -> Result<Option<PersistedState>> {
        Ok(self.state.lock().await.clone())
    }

    async fn save(&self, state: &PersistedState) -> Result<()> {
        *self.state.lock().await = Some(state.clone());
        Ok(())
    }
}

/// A mutable view of the document handed to a `StateStore::transaction`
/// closure. `existing` is the state as it was when the transaction began;
/// mutating `current` and calling `set_state` (or mutating in place via
/// `task_mut`) marks the transaction dirty so it gets persisted.
pub struct Transaction<'a> {
    existing: &'a Option<PersistedState>,
    current: PersistedState,
    dirty: bool,
}

impl<'a> Transaction<'a> {
    pub fn is_fresh(&self) -> bool {
        self.existing.is_none()
    }

    pub fn existing_state(&self) -> Option<&PersistedState> {
        self.existing.as_ref()
    }

    pub fn current_state(&self) -> &PersistedState {
        &self.current
    }

    pub fn set_state(&mut self, state: PersistedState) {
        self.current = state;
        self.dirty = true;
    }

    pub fn task_mut(&mut self, name: &str) -> Option<&mut TaskRecord> {
        self.dirty = true;
        self.current.task_mut(name)
    }
}

/// Serializes all reads and writes through a single in-process mutex, so
/// the read-modify-write cycle the Planner and Executor depend on is
/// always atomic with respect to other tasks in the same process.
pub struct StateStore<B: StateBackend> {
    backend: Arc<B>,
    cache: Mutex<Option<PersistedState>>,
}

impl<B: StateBackend> StateStore<B> {
    pub fn new(backend: B) -> Self {
        StateStore {
            backend: Arc::new(backend),
            cache: Mutex::new(None),
        }
    }

    /// Runs `f` against the current document, persisting the result if
    /// `f` mutated it. On the very first call the document is loaded from
    /// the backend; on a cold start with nothing persisted yet, `existing`
    /// is `None` and `current` begins as an empty shell the closure is
    /// expected to fill in via `set_state`.
    pub async fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> T,
    {
        let mut guard = self.cache.lock().await;
        if guard.is_none() {
            *guard = self.backend.load().await?;
        }
        let existing = guard.clone();
        let current = existing.clone().unwrap_or(PersistedState {
            version: SCHEMA_VERSION,
            start_time: 0,
            tasks: Vec::new(),
        });
        let mut txn = Transaction {
            existing: &existing,
            current,
            dirty: false,
        };
        let result = f(&mut txn);
        if txn.dirty {
            self.backend.save(&txn.current).await?;
            *guard = Some(txn.current);
        }
        Ok(result)
    }
}
