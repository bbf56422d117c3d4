use anyhow::Result;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use taskwheel::{Registration, RegistrationList, SchedulerConfig, TaskCallback, TimeDuration};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = SchedulerConfig::from_env()?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_filter.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("taskwheel demo starting up");
    info!("state file: {}", config.state_path.display());
    info!("poll interval: {}", config.poll_interval);

    let scheduler = taskwheel::FileScheduler::open(&config);

    let heartbeat_count = Arc::new(AtomicU32::new(0));
    let heartbeat_callback: TaskCallback = {
        let heartbeat_count = heartbeat_count.clone();
        Arc::new(move || {
            let heartbeat_count = heartbeat_count.clone();
            Box::pin(async move {
                let n = heartbeat_count.fetch_add(1, Ordering::SeqCst) + 1;
                info!("heartbeat #{n}");
                Ok(())
            })
        })
    };

    let cleanup_attempts = Arc::new(AtomicU32::new(0));
    let cleanup_callback: TaskCallback = {
        let cleanup_attempts = cleanup_attempts.clone();
        Arc::new(move || {
            let cleanup_attempts = cleanup_attempts.clone();
            Box::pin(async move {
                let n = cleanup_attempts.fetch_add(1, Ordering::SeqCst) + 1;
                info!("running hourly cleanup, attempt #{n}");
                if n == 1 {
                    // Simulate a transient failure on the very first attempt
                    // so the demo also exercises the retry path.
                    return Err("cleanup target temporarily unavailable".into());
                }
                Ok(())
            })
        })
    };

    let registrations: RegistrationList = vec![
        Registration {
            name: "heartbeat".to_string(),
            cron: "* * * * *".to_string(),
            retry_delay: TimeDuration::from_secs(30),
            callback: heartbeat_callback,
        },
        Registration {
            name: "hourly-cleanup".to_string(),
            cron: "0 * * * *".to_string(),
            retry_delay: TimeDuration::from_secs(60),
            callback: cleanup_callback,
        },
    ];

    scheduler.initialize(registrations).await?;
    info!("scheduler initialized, polling in the background");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, draining in-flight executions");
    scheduler.stop().await;
    info!("taskwheel demo stopped cleanly");

    Ok(())
}
