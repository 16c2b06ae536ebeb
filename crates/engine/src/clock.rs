//! Injected time source.

use std::sync::Mutex;
use std::time::Duration;

use time::OffsetDateTime;

/// Where engine components read "now" from.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> OffsetDateTime;
}

/// Wall-clock UTC time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<OffsetDateTime>,
}

impl ManualClock {
    pub fn new(start: OffsetDateTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, to: OffsetDateTime) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn manual_clock_advances_only_when_told() {
        let clock = ManualClock::new(datetime!(2025-01-01 00:00:00 UTC));
        assert_eq!(clock.now(), datetime!(2025-01-01 00:00:00 UTC));
        clock.advance(Duration::from_millis(1500));
        assert_eq!(clock.now(), datetime!(2025-01-01 00:00:01.5 UTC));
        clock.set(datetime!(2030-06-01 00:00:00 UTC));
        assert_eq!(clock.now(), datetime!(2030-06-01 00:00:00 UTC));
    }
}
