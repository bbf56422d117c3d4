//! The Executor: dispatches tasks, enforces non-overlap, and records
//! terminal outcomes.

use crate::observability;
use crate::planner::PlanMode;
use crate::registry::{Registry, TaskName};
use crate::state::{StateBackend, StateStore};
use crate::time::{Clock, Instant};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

/// Tracks which tasks currently have an execution in flight and owns the
/// spawned execution futures so `stop` can wait for all of them to
/// finish. This running set is the *only* place `isRunning` lives; it is
/// never written to the persisted document.
pub struct Executor<C: Clock, B: StateBackend> {
    clock: Arc<C>,
    store: Arc<StateStore<B>>,
    registry: Arc<Registry>,
    running: Mutex<HashSet<TaskName>>,
    tasks: Mutex<JoinSet<()>>,
}

impl<C: Clock + 'static, B: StateBackend + 'static> Executor<C, B> {
    pub fn new(clock: Arc<C>, store: Arc<StateStore<B>>, registry: Arc<Registry>) -> Self {
        Executor {
            clock,
            store,
            registry,
            running: Mutex::new(HashSet::new()),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    pub async fn is_running(&self, name: &TaskName) -> bool {
        self.running.lock().await.contains(name)
    }

    /// Attempts to claim `name` for execution and, on success, spawns the
    /// execution. Returns `false` without spawning if the task is already
    /// running — the insert into the running set and this return value
    /// are synchronous with respect to the caller, which is what gives
    /// the non-overlap guarantee: no two polls can both win the claim for
    /// the same task. `fire_time` is the poller's minute-floored tick
    /// time, persisted verbatim as `lastEvaluatedFire` on a cron-mode fire.
    pub async fn try_dispatch(self: &Arc<Self>, name: TaskName, mode: PlanMode, fire_time: Instant) -> bool {
        {
            let mut running = self.running.lock().await;
            if !running.insert(name.clone()) {
                return false;
            }
        }
        let run_id = uuid::Uuid::new_v4();
        observability::task_dispatched(&name, run_id, mode);
        let this = Arc::clone(self);
        let mut tasks = self.tasks.lock().await;
        tasks.spawn(async move {
            this.execute(name, mode, fire_time, run_id).await;
        });
        true
    }

    /// Waits for every execution spawned so far to finish. Called only
    /// after the polling loop has stopped ticking, so no new executions
    /// can start once this begins draining.
    pub async fn wait_idle(&self) {
        let mut tasks = self.tasks.lock().await;
        while tasks.join_next().await.is_some() {}
    }

    async fn finish(&self, name: &TaskName) {
        self.running.lock().await.remove(name);
    }

    async fn execute(self: Arc<Self>, name: TaskName, mode: PlanMode, fire_time: Instant, run_id: uuid::Uuid) {
        let def = match self.registry.get(&name) {
            Some(d) => d.clone(),
            None => {
                // The task was removed from the registry between the plan
                // decision and dispatch, which cannot happen since the
                // registry is immutable for the process lifetime; guard
                // anyway rather than panicking.
                self.finish(&name).await;
                return;
            }
        };

        let start = self.clock.now();
        let dispatch_result = self
            .store
            .transaction(|txn| {
                if let Some(rec) = txn.task_mut(name.as_str()) {
                    rec.last_attempt_time = Some(start.millis());
                    if matches!(mode, PlanMode::Cron) {
                        rec.last_evaluated_fire = Some(fire_time.floor_to_minute().millis());
                    }
                }
            })
            .await;
        if let Err(e) = dispatch_result {
            tracing::error!(task = %name, error = %e, "failed to persist dispatch transaction");
        }

        observability::task_started(&name, run_id, mode);
        let callback_result = (def.callback)().await;
        let end = self.clock.now();

        match callback_result {
            Ok(()) => {
                let persist_result = self
                    .store
                    .transaction(|txn| {
                        if let Some(rec) = txn.task_mut(name.as_str()) {
                            rec.last_success_time = Some(end.millis());
                            rec.last_failure_time = None;
                            rec.pending_retry_until = None;
                        }
                    })
                    .await;
                self.finish(&name).await;
                if let Err(e) = persist_result {
                    tracing::error!(task = %name, error = %e, "failed to persist success transaction");
                }
                observability::task_succeeded(&name, run_id, mode, end.millis() - start.millis());
            }
            Err(callback_err) => {
                let retry_until = end.add(def.retry_delay);
                let persist_result = self
                    .store
                    .transaction(|txn| {
                        if let Some(rec) = txn.task_mut(name.as_str()) {
                            rec.last_failure_time = Some(end.millis());
                            rec.pending_retry_until = Some(retry_until.millis());
                            rec.last_success_time = None;
                        }
                    })
                    .await;
                self.finish(&name).await;
                if let Err(e) = persist_result {
                    tracing::error!(task = %name, error = %e, "failed to persist failure transaction");
                }
                let message = callback_err.to_string();
                observability::task_failed(&name, run_id, mode, &message);
                observability::retry_scheduled(&name, run_id, mode, retry_until);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Registration, RegistrationList, TaskCallback};
    use crate::state::MemoryBackend;
    use crate::time::{ManualClock, Instant as SchedInstant, TimeDuration};

    fn registrations_with(callback: TaskCallback) -> RegistrationList {
        vec![Registration {
            name: "a".to_string(),
            cron: "* * * * *".to_string(),
            retry_delay: TimeDuration::from_secs(60),
            callback,
        }]
    }

    #[tokio::test]
    async fn second_dispatch_is_rejected_while_first_is_in_flight() {
        let (gate_tx, gate_rx) = tokio::sync::watch::channel(false);
        let gate_rx = Arc::new(Mutex::new(gate_rx));
        let callback: TaskCallback = {
            let gate_rx = gate_rx.clone();
            std::sync::Arc::new(move || {
                let gate_rx = gate_rx.clone();
                Box::pin(async move {
                    let mut rx = gate_rx.lock().await.clone();
                    let _ = rx.changed().await;
                    Ok(())
                })
            })
        };

        let regs = registrations_with(callback);
        let registry = Arc::new(Registry::build(regs, TimeDuration::from_secs(60)).unwrap());
        let clock = Arc::new(ManualClock::new(SchedInstant::from_millis(0)));
        let store = Arc::new(StateStore::new(MemoryBackend::default()));
        let executor = Arc::new(Executor::new(clock, store, registry));

        let name = TaskName::new("a").unwrap();
        let now = SchedInstant::from_millis(0);
        let first = executor.try_dispatch(name.clone(), PlanMode::Cron, now).await;
        assert!(first);
        let second = executor.try_dispatch(name.clone(), PlanMode::Cron, now).await;
        assert!(!second, "task already running, second dispatch must be rejected");

        gate_tx.send(true).unwrap();
        executor.wait_idle().await;
        assert!(!executor.is_running(&name).await);
    }
}
