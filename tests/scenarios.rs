//! End-to-end scenarios exercising the scheduler through its public
//! facade, driven by paused tokio time and a manual clock so minute-scale
//! behavior can be asserted without real sleeping.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use taskwheel::{
    FieldDiff, ManualClock, MemoryBackend, Registration, RegistrationList, Scheduler,
    SchedulerError, TimeDuration,
};

fn counting_registration(name: &str, cron: &str, retry_delay: TimeDuration, counter: Arc<AtomicU32>) -> Registration {
    Registration {
        name: name.to_string(),
        cron: cron.to_string(),
        retry_delay,
        callback: Arc::new(move || {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }),
    }
}

fn failing_then_counting(name: &str, cron: &str, retry_delay: TimeDuration, counter: Arc<AtomicU32>) -> Registration {
    let fail_once = Arc::new(std::sync::atomic::AtomicBool::new(true));
    Registration {
        name: name.to_string(),
        cron: cron.to_string(),
        retry_delay,
        callback: Arc::new(move || {
            let counter = counter.clone();
            let fail_once = fail_once.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if fail_once.swap(false, Ordering::SeqCst) {
                    Err("boom".into())
                } else {
                    Ok(())
                }
            })
        }),
    }
}

// Scenario 1: every-minute task fires once per new minute boundary, not
// once per poll tick.
#[tokio::test(start_paused = true)]
async fn every_minute_task_fires_on_minute_boundaries() {
    let clock = Arc::new(ManualClock::new(taskwheel::Instant::from_millis(0)));
    let scheduler = Scheduler::new(clock.clone(), MemoryBackend::default(), TimeDuration::from_secs(30));

    let count = Arc::new(AtomicU32::new(0));
    let regs: RegistrationList = vec![counting_registration("tick", "* * * * *", TimeDuration::ZERO, count.clone())];
    scheduler.initialize(regs).await.unwrap();

    for _ in 0..4 {
        clock.advance(TimeDuration::from_secs(30));
        tokio::time::advance(StdDuration::from_secs(30)).await;
        tokio::time::sleep(StdDuration::from_millis(1)).await;
    }

    scheduler.stop().await;
    // Four 30s advances from t=0 cross minute boundaries 0, 1, and 2 (the
    // intervening same-minute ticks at t=30s and t=90s are suppressed by
    // the already-evaluated-this-minute rule), so exactly three fires.
    assert_eq!(count.load(Ordering::SeqCst), 3);
}

// Scenario 2: a failing callback schedules a retry, and cron-mode fires
// stay suppressed until the retry delay elapses.
#[tokio::test(start_paused = true)]
async fn failed_execution_schedules_retry() {
    let clock = Arc::new(ManualClock::new(taskwheel::Instant::from_millis(0)));
    let scheduler = Scheduler::new(clock.clone(), MemoryBackend::default(), TimeDuration::from_secs(30));

    let count = Arc::new(AtomicU32::new(0));
    let regs: RegistrationList = vec![failing_then_counting(
        "x",
        "0 * * * *",
        TimeDuration::from_secs(300),
        count.clone(),
    )];
    scheduler.initialize(regs).await.unwrap();

    // First tick matches the 0th minute and fails.
    tokio::time::advance(StdDuration::from_secs(30)).await;
    tokio::time::sleep(StdDuration::from_millis(1)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);

    // Not yet at the retry delay: no second invocation.
    clock.advance(TimeDuration::from_secs(120));
    tokio::time::advance(StdDuration::from_secs(120)).await;
    tokio::time::sleep(StdDuration::from_millis(1)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);

    // Past the retry delay: retry fires and succeeds.
    clock.advance(TimeDuration::from_secs(200));
    tokio::time::advance(StdDuration::from_secs(200)).await;
    tokio::time::sleep(StdDuration::from_millis(1)).await;

    scheduler.stop().await;
    assert_eq!(count.load(Ordering::SeqCst), 2);
}

// Scenario 4: a startup identity mismatch is reported with a structured
// diff and never silently accepted.
#[tokio::test]
async fn startup_mismatch_reports_differing_field() {
    let clock = Arc::new(ManualClock::new(taskwheel::Instant::from_millis(0)));
    let backend = MemoryBackend::default();
    let scheduler = Scheduler::new(clock.clone(), backend, TimeDuration::from_secs(60));

    let count = Arc::new(AtomicU32::new(0));
    let first: RegistrationList = vec![counting_registration(
        "a",
        "0 * * * *",
        TimeDuration::from_secs(60),
        count.clone(),
    )];
    scheduler.initialize(first).await.unwrap();
    scheduler.stop().await;

    let second: RegistrationList = vec![counting_registration(
        "a",
        "*/5 * * * *",
        TimeDuration::from_secs(60),
        count.clone(),
    )];
    let err = scheduler.initialize(second).await.unwrap_err();
    match err {
        SchedulerError::TaskListMismatch(mismatch) => {
            assert!(mismatch.differing.contains(&FieldDiff {
                name: "a".to_string(),
                field: "cronExpression".to_string(),
                expected: "0 * * * *".to_string(),
                actual: "*/5 * * * *".to_string(),
            }));
        }
        other => panic!("expected TaskListMismatch, got {other:?}"),
    }
}

// Scenario 6: an invalid cron expression is rejected before anything is
// persisted.
#[tokio::test]
async fn invalid_cron_rejected_before_persisting() {
    let clock = Arc::new(ManualClock::new(taskwheel::Instant::from_millis(0)));
    let scheduler = Scheduler::new(clock, MemoryBackend::default(), TimeDuration::from_secs(60));

    let count = Arc::new(AtomicU32::new(0));
    let regs: RegistrationList = vec![counting_registration("bad", "60 * * * *", TimeDuration::ZERO, count)];
    let err = scheduler.initialize(regs).await.unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidCronExpression { .. }));

    // No task was ever started, so a retry on a corrected registration
    // list must succeed as a true cold start.
    let count2 = Arc::new(AtomicU32::new(0));
    let regs2: RegistrationList = vec![counting_registration("bad", "0 * * * *", TimeDuration::ZERO, count2)];
    scheduler.initialize(regs2).await.unwrap();
    scheduler.stop().await;
}
