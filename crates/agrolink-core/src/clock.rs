//! # Clock
//!
//! Time source for the engine. Stage durations, pendency resolution and
//! archival timestamps all read `Clock::now()`, so tests can drive time
//! explicitly with [`ManualClock`].

use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;

/// A source of the current UTC time.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    /// Jump to an explicit instant.
    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Whole days elapsed between two instants, floored, never negative.
#[must_use]
pub fn whole_days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> u32 {
    let days = (to - from).num_days().max(0);
    u32::try_from(days).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(t0());
        clock.advance(Duration::hours(30));
        assert_eq!(clock.now(), t0() + Duration::hours(30));
    }

    #[test]
    fn whole_days_floor() {
        assert_eq!(whole_days_between(t0(), t0() + Duration::hours(47)), 1);
        assert_eq!(whole_days_between(t0(), t0() + Duration::hours(48)), 2);
    }

    #[test]
    fn whole_days_never_negative() {
        assert_eq!(whole_days_between(t0(), t0() - Duration::days(3)), 0);
    }
}
