//! Environment-driven configuration for the demo binary and any other
//! embedding application that wants a zero-boilerplate default.

use crate::time::TimeDuration;
use anyhow::{Context, Result};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Where the persisted state document lives on disk.
    pub state_path: PathBuf,
    /// How often the polling loop wakes up.
    pub poll_interval: TimeDuration,
    /// Passed straight to `tracing_subscriber::EnvFilter`.
    pub log_filter: String,
}

impl SchedulerConfig {
    pub fn from_env() -> Result<Self> {
        let state_path = std::env::var("TASKWHEEL_STATE_PATH")
            .unwrap_or_else(|_| "taskwheel-state.json".to_string())
            .into();

        let poll_interval_secs: u64 = std::env::var("TASKWHEEL_POLL_INTERVAL_SECS")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .context("TASKWHEEL_POLL_INTERVAL_SECS must be a positive integer")?;

        let log_filter =
            std::env::var("TASKWHEEL_LOG").unwrap_or_else(|_| "taskwheel=info".to_string());

        Ok(SchedulerConfig {
            state_path,
            poll_interval: TimeDuration::from_secs(poll_interval_secs),
            log_filter,
        })
    }
}
