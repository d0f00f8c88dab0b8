//! Clock abstraction for cache timestamps.
//!
//! Caches stamp every insert and age every entry against an injected
//! clock, so eviction tests can move time forward instead of sleeping.

use crate::Timestamp;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Source of "now" for caches and the sweep task.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Production clock using system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// Settable clock with millisecond resolution.
///
/// Starts at a fixed instant and only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            millis: AtomicI64::new(start.timestamp_millis()),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let delta = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.millis.fetch_add(delta, Ordering::SeqCst);
    }

    pub fn set(&self, to: Timestamp) {
        self.millis.store(to.timestamp_millis(), Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    /// 2024-01-01 00:00:00 UTC
    fn default() -> Self {
        Self {
            millis: AtomicI64::new(1_704_067_200_000),
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).unwrap_or_default()
    }
}

/// Age of `then` as seen from `now`, clamped at zero for future stamps.
pub fn age_of(then: Timestamp, now: Timestamp) -> Duration {
    now.signed_duration_since(then)
        .to_std()
        .unwrap_or(Duration::ZERO)
}

/// `now - age`, saturating at the earliest representable instant.
pub fn cutoff_before(now: Timestamp, age: Duration) -> Timestamp {
    ChronoDuration::from_std(age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
