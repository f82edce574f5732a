use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

/// Source of wall-clock time for cooldown math.
///
/// The flow never calls `Utc::now()` directly; everything time-derived goes
/// through this trait so tests can pin the clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to. Intended for tests.
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

    /// Creates a clock pinned to an arbitrary fixed date.
    pub fn fixed() -> Self {
        Self::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.lock().unwrap() = instant;
    }

    pub fn advance(&self, delta: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::from_std(delta).unwrap_or(chrono::Duration::zero());
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
