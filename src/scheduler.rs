//! The public facade: `initialize` and `stop`.

use crate::error::{FieldDiff, Result, SchedulerError, TaskListMismatch};
use crate::executor::Executor;
use crate::observability;
use crate::poller::PollingLoop;
use crate::registry::{Registry, RegistrationList};
use crate::state::{PersistedState, StateBackend, StateStore};
use crate::time::{Clock, TimeDuration};
use std::sync::Arc;
use tokio::sync::Mutex;

struct Running<C: Clock, B: StateBackend> {
    registry: Arc<Registry>,
    executor: Arc<Executor<C, B>>,
    shutdown_tx: tokio::sync::watch::Sender<bool>,
    loop_handle: tokio::task::JoinHandle<()>,
}

/// A single scheduler instance, parameterized over its clock and state
/// backend so production code and tests share the same engine.
pub struct Scheduler<C: Clock, B: StateBackend> {
    clock: Arc<C>,
    store: Arc<StateStore<B>>,
    poll_interval: TimeDuration,
    running: Mutex<Option<Running<C, B>>>,
}

impl<C: Clock + 'static, B: StateBackend + 'static> Scheduler<C, B> {
    pub fn new(clock: Arc<C>, backend: B, poll_interval: TimeDuration) -> Self {
        Scheduler {
            clock,
            store: Arc::new(StateStore::new(backend)),
            poll_interval,
            running: Mutex::new(None),
        }
    }

    /// Validates `registrations`, checks them against persisted state (or
    /// seeds fresh state on a cold start), and starts the polling loop.
    ///
    /// Calling `initialize` again while already running is a no-op if the
    /// registration list is identical to the one already active, and an
    /// error otherwise — this crate never hot-swaps a running task list.
    pub async fn initialize(&self, registrations: RegistrationList) -> Result<()> {
        let mut guard = self.running.lock().await;

        let new_registry = Registry::build(registrations, self.poll_interval)?;

        if let Some(running) = guard.as_ref() {
            if new_registry.identity_set() == running.registry.identity_set() {
                return Ok(());
            }
            return Err(diff_identity(&new_registry, &running.registry).into());
        }

        let registry = Arc::new(new_registry);

        let resumed = self
            .store
            .transaction(|txn| -> Result<bool> {
                if txn.is_fresh() {
                    txn.set_state(PersistedState::initial(&registry, self.clock.now()));
                    Ok(false)
                } else {
                    let existing = txn.existing_state().expect("checked not fresh above");
                    check_consistency(&registry, existing)?;
                    Ok(true)
                }
            })
            .await??;

        observability::startup_validated(registry.len(), resumed);

        let executor = Arc::new(Executor::new(self.clock.clone(), self.store.clone(), registry.clone()));
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let poller = Arc::new(PollingLoop::new(
            self.clock.clone(),
            self.store.clone(),
            registry.clone(),
            executor.clone(),
            self.poll_interval,
        ));
        let loop_handle = tokio::spawn(poller.run(shutdown_rx));

        *guard = Some(Running {
            registry,
            executor,
            shutdown_tx,
            loop_handle,
        });
        Ok(())
    }

    /// Stops the polling loop and waits for every in-flight execution to
    /// reach its terminal transaction before returning. A no-op if the
    /// scheduler was never initialized or has already been stopped.
    pub async fn stop(&self) {
        let mut guard = self.running.lock().await;
        if let Some(running) = guard.take() {
            let _ = running.shutdown_tx.send(true);
            let _ = running.loop_handle.await;
            running.executor.wait_idle().await;
        }
    }
}

fn check_consistency(registry: &Registry, persisted: &PersistedState) -> Result<()> {
    let mut missing = Vec::new();
    let mut extra = Vec::new();
    let mut differing = Vec::new();

    for record in &persisted.tasks {
        if !registry.contains(&record.name) {
            missing.push(record.name.clone());
        }
    }

    for (name, def) in registry.iter() {
        match persisted.task(name.as_str()) {
            None => extra.push(name.as_str().to_string()),
            Some(record) => {
                if record.cron_expression != def.cron_text.as_str() {
                    differing.push(FieldDiff {
                        name: name.as_str().to_string(),
                        field: "cronExpression".to_string(),
                        expected: record.cron_expression.clone(),
                        actual: def.cron_text.as_str().to_string(),
                    });
                }
                if record.retry_delay_ms != def.retry_delay.as_millis() {
                    differing.push(FieldDiff {
                        name: name.as_str().to_string(),
                        field: "retryDelayMs".to_string(),
                        expected: record.retry_delay_ms.to_string(),
                        actual: def.retry_delay.as_millis().to_string(),
                    });
                }
            }
        }
    }

    if missing.is_empty() && extra.is_empty() && differing.is_empty() {
        Ok(())
    } else {
        let mismatch = TaskListMismatch { missing, extra, differing };
        observability::startup_rejected(&mismatch);
        Err(SchedulerError::TaskListMismatch(mismatch))
    }
}

fn diff_identity(new_registry: &Registry, running_registry: &Registry) -> TaskListMismatch {
    let new_set = new_registry.identity_set();
    let running_set = running_registry.identity_set();

    let mut missing = Vec::new();
    let mut extra = Vec::new();
    let mut differing = Vec::new();

    for (name, (cron, delay)) in &running_set {
        match new_set.get(name) {
            None => missing.push(name.clone()),
            Some((new_cron, new_delay)) => {
                if new_cron != cron {
                    differing.push(FieldDiff {
                        name: name.clone(),
                        field: "cronExpression".to_string(),
                        expected: cron.clone(),
                        actual: new_cron.clone(),
                    });
                }
                if new_delay != delay {
                    differing.push(FieldDiff {
                        name: name.clone(),
                        field: "retryDelayMs".to_string(),
                        expected: delay.to_string(),
                        actual: new_delay.to_string(),
                    });
                }
            }
        }
    }
    for name in new_set.keys() {
        if !running_set.contains_key(name) {
            extra.push(name.clone());
        }
    }

    TaskListMismatch { missing, extra, differing }
}
