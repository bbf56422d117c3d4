//! The polling loop: wakes on a fixed interval, snapshots runtime state,
//! consults the Planner for every registered task, and fans dispatch out
//! to the Executor.

use crate::executor::Executor;
use crate::observability;
use crate::planner::{plan, PlanOutcome, TaskRuntime};
use crate::registry::Registry;
use crate::state::{StateBackend, StateStore, TaskRecord};
use crate::time::{Clock, Instant, TimeDuration};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct PollingLoop<C: Clock, B: StateBackend> {
    clock: Arc<C>,
    store: Arc<StateStore<B>>,
    registry: Arc<Registry>,
    executor: Arc<Executor<C, B>>,
    poll_interval: TimeDuration,
    ticking: AtomicBool,
}

impl<C: Clock + 'static, B: StateBackend + 'static> PollingLoop<C, B> {
    pub fn new(
        clock: Arc<C>,
        store: Arc<StateStore<B>>,
        registry: Arc<Registry>,
        executor: Arc<Executor<C, B>>,
        poll_interval: TimeDuration,
    ) -> Self {
        PollingLoop {
            clock,
            store,
            registry,
            executor,
            poll_interval,
            ticking: AtomicBool::new(false),
        }
    }

    /// Runs until `shutdown` reports `true`. A tick already in progress
    /// when the interval fires again is simply skipped — the reentrancy
    /// guard means a slow tick never overlaps the next one.
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.poll_interval.as_std());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    async fn tick(&self) {
        if self.ticking.swap(true, Ordering::SeqCst) {
            tracing::debug!("tick already in progress, skipping this interval");
            return;
        }

        let outcome = self.run_tick().await;
        if let Err(e) = outcome {
            tracing::error!(error = %e, "poll tick failed");
        }

        self.ticking.store(false, Ordering::SeqCst);
    }

    async fn run_tick(&self) -> crate::error::Result<()> {
        let now = self.clock.now().floor_to_minute();

        let names: Vec<String> = self.registry.iter().map(|(n, _)| n.as_str().to_string()).collect();
        let records: HashMap<String, Option<TaskRecord>> = self
            .store
            .transaction(|txn| {
                names
                    .iter()
                    .map(|n| (n.clone(), txn.current_state().task(n).cloned()))
                    .collect()
            })
            .await?;

        let mut dispatched = 0usize;
        let mut skipped_running = 0usize;
        let mut skipped_retry = 0usize;
        let mut skipped_not_due = 0usize;

        for (name, def) in self.registry.iter() {
            let is_running = self.executor.is_running(name).await;
            let record = records.get(name.as_str()).cloned().flatten();
            let rt = runtime_from(is_running, record);
            match plan(def, &rt, now) {
                Ok(PlanOutcome::Dispatch { mode }) => {
                    let claimed = self.executor.try_dispatch(name.clone(), mode, now).await;
                    if claimed {
                        dispatched += 1;
                    } else {
                        skipped_running += 1;
                    }
                }
                Ok(PlanOutcome::SkipRunning) => skipped_running += 1,
                Ok(PlanOutcome::SkipRetryPending) => skipped_retry += 1,
                Ok(PlanOutcome::SkipNotDue) => skipped_not_due += 1,
                Err(e) => {
                    tracing::warn!(task = %name, error = %e, "planner could not evaluate task");
                }
            }
        }

        observability::tick_summary(dispatched, skipped_running, skipped_retry, skipped_not_due);
        Ok(())
    }
}

fn runtime_from(is_running: bool, record: Option<TaskRecord>) -> TaskRuntime {
    match record {
        Some(rec) => TaskRuntime {
            is_running,
            last_attempt_time: rec.last_attempt_time.map(Instant::from_millis),
            last_success_time: rec.last_success_time.map(Instant::from_millis),
            last_failure_time: rec.last_failure_time.map(Instant::from_millis),
            pending_retry_until: rec.pending_retry_until.map(Instant::from_millis),
            last_evaluated_fire: rec.last_evaluated_fire.map(Instant::from_millis),
        },
        None => TaskRuntime {
            is_running,
            last_attempt_time: None,
            last_success_time: None,
            last_failure_time: None,
            pending_retry_until: None,
            last_evaluated_fire: None,
        },
    }
}
