//! Mock clock for testing
//!
//! Time only moves when the test says so.

use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};

use crate::timing::Clock;

/// Manually driven clock
///
/// Optionally auto-advances by a fixed step after every read, which is
/// handy for giving each recorded decision a distinct timestamp.
#[derive(Debug)]
pub struct MockClock {
    current: RwLock<DateTime<Utc>>,
    step: Duration,
}

impl MockClock {
    /// Create a clock frozen at `start`
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: RwLock::new(start),
            step: Duration::zero(),
        }
    }

    /// Create a clock that advances by `step` after every `now()` call
    pub fn ticking(start: DateTime<Utc>, step: Duration) -> Self {
        Self {
            current: RwLock::new(start),
            step,
        }
    }

    /// Jump to an absolute time (may move backwards)
    pub fn set(&self, time: DateTime<Utc>) {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        *current = time;
    }

    /// Move time forward (or backward with a negative duration)
    pub fn advance(&self, by: Duration) {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        *current += by;
    }

    /// Read the current time without ticking
    pub fn peek(&self) -> DateTime<Utc> {
        *self.current.read().unwrap_or_else(|e| e.into_inner())
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        let now = *current;
        *current += self.step;
        now
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 2, 8, 30, 0).unwrap()
    }

    #[test]
    fn test_frozen_clock() {
        let clock = MockClock::new(t0());
        assert_eq!(clock.now(), t0());
        assert_eq!(clock.now(), t0());
    }

    #[test]
    fn test_ticking_clock() {
        let clock = MockClock::ticking(t0(), Duration::milliseconds(10));
        assert_eq!(clock.now(), t0());
        assert_eq!(clock.now(), t0() + Duration::milliseconds(10));
        assert_eq!(clock.peek(), t0() + Duration::milliseconds(20));
    }

    #[test]
    fn test_set_and_advance() {
        let clock = MockClock::new(t0());
        clock.advance(Duration::seconds(5));
        assert_eq!(clock.now(), t0() + Duration::seconds(5));
        clock.set(t0() - Duration::hours(1));
        assert_eq!(clock.now(), t0() - Duration::hours(1));
    }
}
