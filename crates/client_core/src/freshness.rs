use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};

/// Freshness window of the applications collection.
pub const APPLICATIONS_WINDOW: Duration = Duration::minutes(5);
/// Jobs change less often than applications.
pub const JOBS_WINDOW: Duration = Duration::minutes(15);

/// Whether a collection last fetched at `last_fetched` must be refetched at
/// `now`. A collection that was never fetched always must; otherwise only
/// once strictly more than `window` has elapsed.
pub fn should_fetch(
    last_fetched: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    window: Duration,
) -> bool {
    match last_fetched {
        None => true,
        Some(at) => now - at > window,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessPolicy {
    pub window: Duration,
}

impl FreshnessPolicy {
    pub const fn new(window: Duration) -> Self {
        Self { window }
    }

    pub fn should_fetch(&self, last_fetched: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        should_fetch(last_fetched, now, self.window)
    }
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self::new(APPLICATIONS_WINDOW)
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock truncated to millisecond resolution.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        let now = Utc::now();
        DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[path = "tests/freshness_tests.rs"]
mod tests;
