//! The Planner: a pure function deciding whether a task should fire.

use crate::error::Result;
use crate::registry::TaskDefinition;
use crate::time::Instant;

/// The runtime view of a task the Planner reasons about. Assembled fresh
/// on every poll tick from persisted fields plus a live lookup of
/// `isRunning` against the Executor's in-memory running set.
#[derive(Debug, Clone, Copy)]
pub struct TaskRuntime {
    pub is_running: bool,
    pub last_attempt_time: Option<Instant>,
    pub last_success_time: Option<Instant>,
    pub last_failure_time: Option<Instant>,
    pub pending_retry_until: Option<Instant>,
    pub last_evaluated_fire: Option<Instant>,
}

/// Why a task was dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanMode {
    /// A cron boundary matched (or was caught up on from the previous poll).
    Cron,
    /// A prior failure's retry delay has elapsed.
    Retry,
}

/// The Planner's verdict for one task at one tick, including why it
/// skipped when it did not dispatch — used only to build the tick
/// summary observability event.
#[derive(Debug, Clone, Copy)]
pub enum PlanOutcome {
    Dispatch { mode: PlanMode },
    SkipRunning,
    SkipRetryPending,
    SkipNotDue,
}

impl PlanOutcome {
    pub fn mode(&self) -> Option<PlanMode> {
        match self {
            PlanOutcome::Dispatch { mode } => Some(*mode),
            _ => None,
        }
    }
}

/// Evaluates the six ordered rules against one task's runtime state at
/// `now` (already floored to a minute boundary):
///
/// 1. If the task is running, skip.
/// 2. If a retry is pending and due, dispatch in retry mode.
/// 3. If the task has never evaluated a cron fire, dispatch in cron mode
///    when `now` matches; otherwise fall through.
/// 4. If `now` matches and is strictly after the last evaluated fire,
///    dispatch in cron mode.
/// 5. Otherwise, if the next match after the last evaluated fire is at or
///    before `now` (a single missed tick caught up on this poll),
///    dispatch in cron mode.
/// 6. Otherwise, do not dispatch.
///
/// Rules 2 and 3-5 do not short-circuit on a false condition: a retry
/// that isn't due yet still allows a cron-mode fire in the same tick.
pub fn plan(def: &TaskDefinition, rt: &TaskRuntime, now: Instant) -> Result<PlanOutcome> {
    if rt.is_running {
        return Ok(PlanOutcome::SkipRunning);
    }

    if let Some(pending) = rt.pending_retry_until {
        if !pending.is_after(now) {
            return Ok(PlanOutcome::Dispatch { mode: PlanMode::Retry });
        }
    }

    let dispatch = match rt.last_evaluated_fire {
        None => def.cron.matches(now),
        Some(last_fire) => {
            if def.cron.matches(now) && now.is_after(last_fire) {
                true
            } else {
                let next = def.cron.next_after_named(last_fire, def.name.as_str())?;
                !next.is_after(now)
            }
        }
    };

    if dispatch {
        return Ok(PlanOutcome::Dispatch { mode: PlanMode::Cron });
    }

    if rt.pending_retry_until.map_or(false, |p| p.is_after(now)) {
        Ok(PlanOutcome::SkipRetryPending)
    } else {
        Ok(PlanOutcome::SkipNotDue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cron::CronExpression;
    use crate::registry::{CronText, TaskName};
    use crate::time::TimeDuration;

    fn def(name: &str, cron: &str) -> TaskDefinition {
        let callback: crate::registry::TaskCallback = std::sync::Arc::new(|| Box::pin(async { Ok(()) }));
        TaskDefinition {
            name: TaskName::new(name).unwrap(),
            cron_text: CronText::new(cron),
            cron: CronExpression::parse(cron).unwrap(),
            retry_delay: TimeDuration::from_secs(60),
            callback,
        }
    }

    fn blank_runtime() -> TaskRuntime {
        TaskRuntime {
            is_running: false,
            last_attempt_time: None,
            last_success_time: None,
            last_failure_time: None,
            pending_retry_until: None,
            last_evaluated_fire: None,
        }
    }

    #[test]
    fn running_task_never_dispatches() {
        let d = def("a", "* * * * *");
        let mut rt = blank_runtime();
        rt.is_running = true;
        let outcome = plan(&d, &rt, Instant::from_millis(0)).unwrap();
        assert!(matches!(outcome, PlanOutcome::SkipRunning));
    }

    #[test]
    fn due_retry_dispatches_in_retry_mode() {
        let d = def("a", "0 0 1 1 *"); // never matches `now` in this test
        let mut rt = blank_runtime();
        rt.pending_retry_until = Some(Instant::from_millis(0));
        let outcome = plan(&d, &rt, Instant::from_millis(60_000)).unwrap();
        assert!(matches!(
            outcome,
            PlanOutcome::Dispatch { mode: PlanMode::Retry }
        ));
    }

    #[test]
    fn first_ever_matching_minute_dispatches_in_cron_mode() {
        let d = def("a", "* * * * *");
        let rt = blank_runtime();
        let outcome = plan(&d, &rt, Instant::from_millis(0)).unwrap();
        assert!(matches!(outcome, PlanOutcome::Dispatch { mode: PlanMode::Cron }));
    }

    #[test]
    fn already_evaluated_minute_does_not_redispatch() {
        let d = def("a", "* * * * *");
        let mut rt = blank_runtime();
        rt.last_evaluated_fire = Some(Instant::from_millis(0));
        let outcome = plan(&d, &rt, Instant::from_millis(0)).unwrap();
        assert!(matches!(outcome, PlanOutcome::SkipNotDue));
    }

    #[test]
    fn single_missed_tick_is_caught_up() {
        let d = def("a", "0 * * * *"); // fires at minute 0 of every hour
        let mut rt = blank_runtime();
        rt.last_evaluated_fire = Some(Instant::from_millis(0));
        // We poll at minute 61 having missed the exact minute-60 boundary.
        let now = Instant::from_millis(61 * 60_000);
        let outcome = plan(&d, &rt, now).unwrap();
        assert!(matches!(outcome, PlanOutcome::Dispatch { mode: PlanMode::Cron }));
    }

    #[test]
    fn retry_not_yet_due_does_not_block_cron_fire() {
        let d = def("a", "* * * * *");
        let mut rt = blank_runtime();
        rt.pending_retry_until = Some(Instant::from_millis(10 * 60_000));
        let outcome = plan(&d, &rt, Instant::from_millis(5 * 60_000)).unwrap();
        assert!(matches!(outcome, PlanOutcome::Dispatch { mode: PlanMode::Cron }));
    }
}
