//! Wall-clock abstraction.
//!
//! The engine never calls `chrono::Utc::now()` or `SystemTime::now()`
//! directly; every instant flows in through a [`Clock`], so tests can swap
//! in a [`ManualClock`] and drive the scheduler minute-by-minute without
//! sleeping.

use chrono::{Datelike, Local, TimeZone, Timelike};
use std::fmt;

const MILLIS_PER_MINUTE: i64 = 60_000;

/// A non-negative duration in milliseconds. Used for retry delays and the
/// poll interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeDuration(u64);

impl TimeDuration {
    pub const ZERO: TimeDuration = TimeDuration(0);

    pub const fn from_millis(millis: u64) -> Self {
        TimeDuration(millis)
    }

    pub const fn from_secs(secs: u64) -> Self {
        TimeDuration(secs * 1000)
    }

    pub const fn as_millis(self) -> u64 {
        self.0
    }

    pub fn as_std(self) -> std::time::Duration {
        std::time::Duration::from_millis(self.0)
    }
}

impl fmt::Display for TimeDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// An immutable point in time, milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct Instant(i64);

impl Instant {
    pub const fn from_millis(millis: i64) -> Self {
        Instant(millis)
    }

    pub const fn millis(self) -> i64 {
        self.0
    }

    /// Floor to the start of the containing minute.
    pub fn floor_to_minute(self) -> Instant {
        Instant(self.0 - self.0.rem_euclid(MILLIS_PER_MINUTE))
    }

    pub fn add(self, d: TimeDuration) -> Instant {
        Instant(self.0 + d.as_millis() as i64)
    }

    pub fn subtract(self, d: TimeDuration) -> Instant {
        Instant(self.0 - d.as_millis() as i64)
    }

    pub fn plus_minutes(self, minutes: i64) -> Instant {
        Instant(self.0 + minutes * MILLIS_PER_MINUTE)
    }

    pub fn is_before(self, other: Instant) -> bool {
        self.0 < other.0
    }

    pub fn is_after(self, other: Instant) -> bool {
        self.0 > other.0
    }

    /// Local wall-clock calendar fields used by the cron matcher.
    /// Weekday numbering follows the cron convention: Sunday = 0.
    pub(crate) fn local_fields(self) -> LocalFields {
        let dt = Local
            .timestamp_millis_opt(self.0)
            .single()
            .unwrap_or_else(|| Local.timestamp_millis_opt(0).single().unwrap());
        LocalFields {
            minute: dt.minute(),
            hour: dt.hour(),
            day: dt.day(),
            month: dt.month(),
            weekday: dt.weekday().num_days_from_sunday(),
        }
    }
}

pub(crate) struct LocalFields {
    pub minute: u32,
    pub hour: u32,
    pub day: u32,
    pub month: u32,
    pub weekday: u32,
}

/// Wall-clock source. The engine treats the clock as monotonically
/// advancing but tolerates forward jumps; backward jumps never cause
/// extra fires because the Planner always compares against
/// `lastEvaluatedFire`, not against the previous `now()` reading.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Production clock backed by the host's local wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::from_millis(chrono::Utc::now().timestamp_millis())
    }
}

/// A deterministic clock for tests: starts at a fixed instant and only
/// moves forward when explicitly told to.
#[derive(Debug)]
pub struct ManualClock {
    now: std::sync::atomic::AtomicI64,
}

impl ManualClock {
    pub fn new(start: Instant) -> Self {
        Self {
            now: std::sync::atomic::AtomicI64::new(start.millis()),
        }
    }

    pub fn set(&self, instant: Instant) {
        self.now.store(instant.millis(), std::sync::atomic::Ordering::SeqCst);
    }

    pub fn advance(&self, d: TimeDuration) {
        self.now
            .fetch_add(d.as_millis() as i64, std::sync::atomic::Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        Instant::from_millis(self.now.load(std::sync::atomic::Ordering::SeqCst))
    }
}
