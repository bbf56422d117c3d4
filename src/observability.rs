//! Structured logging of every named event the engine produces, via
//! `tracing`. No metrics or external reporting: that surface is explicitly
//! out of scope.

use crate::error::TaskListMismatch;
use crate::planner::PlanMode;
use crate::registry::TaskName;
use crate::time::Instant;
use uuid::Uuid;

fn mode_str(mode: PlanMode) -> &'static str {
    match mode {
        PlanMode::Cron => "cron",
        PlanMode::Retry => "retry",
    }
}

pub fn startup_validated(task_count: usize, resumed: bool) {
    tracing::info!(task_count, resumed, "startup_validated");
}

pub fn startup_rejected(mismatch: &TaskListMismatch) {
    tracing::error!(
        missing = ?mismatch.missing,
        extra = ?mismatch.extra,
        differing = ?mismatch.differing,
        "startup_rejected"
    );
}

pub fn task_dispatched(name: &TaskName, run_id: Uuid, mode: PlanMode) {
    tracing::info!(task = %name, run_id = %run_id, mode = mode_str(mode), "task_dispatched");
}

pub fn task_started(name: &TaskName, run_id: Uuid, mode: PlanMode) {
    tracing::info!(task = %name, run_id = %run_id, mode = mode_str(mode), "task_started");
}

pub fn task_succeeded(name: &TaskName, run_id: Uuid, mode: PlanMode, duration_ms: i64) {
    tracing::info!(task = %name, run_id = %run_id, mode = mode_str(mode), duration_ms, "task_succeeded");
}

pub fn task_failed(name: &TaskName, run_id: Uuid, mode: PlanMode, message: &str) {
    tracing::warn!(task = %name, run_id = %run_id, mode = mode_str(mode), error = message, "task_failed");
}

pub fn retry_scheduled(name: &TaskName, run_id: Uuid, mode: PlanMode, retry_at: Instant) {
    tracing::info!(task = %name, run_id = %run_id, mode = mode_str(mode), retry_at = retry_at.millis(), "retry_scheduled");
}

pub fn tick_summary(dispatched: usize, skipped_running: usize, skipped_retry: usize, skipped_not_due: usize) {
    tracing::debug!(
        dispatched,
        skipped_running,
        skipped_retry_pending = skipped_retry,
        skipped_not_due,
        "tick_summary"
    );
}
