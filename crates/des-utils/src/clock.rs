//! Clock ports for the DES core.
//!
//! Core logic never reads system time directly. Wall time (audit
//! timestamps, phase `started_at`) goes through [`WallClock`]; elapsed
//! budget tracking goes through [`MonotonicClock`]. Tests substitute the
//! manual implementations to drive threshold crossings deterministically.

use chrono::{DateTime, Utc};
use std::cell::Cell;
use std::time::{Duration, Instant};

/// Source of wall-clock UTC time.
pub trait WallClock {
    fn now(&self) -> DateTime<Utc>;
}

/// Source of monotonic elapsed time since the clock was created.
pub trait MonotonicClock {
    fn elapsed(&self) -> Duration;
}

/// System wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemWallClock;

impl WallClock for SystemWallClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Monotonic clock backed by `std::time::Instant`.
#[derive(Debug, Clone, Copy)]
pub struct SystemMonotonicClock {
    origin: Instant,
}

impl SystemMonotonicClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemMonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock for SystemMonotonicClock {
    fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Manually advanced wall clock for tests.
#[derive(Debug)]
pub struct ManualWallClock {
    now: Cell<DateTime<Utc>>,
}

impl ManualWallClock {
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Cell::new(start),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        self.now.set(now);
    }

    pub fn advance(&self, by: chrono::Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl WallClock for ManualWallClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.get()
    }
}

/// Manually advanced monotonic clock for tests.
#[derive(Debug, Default)]
pub struct ManualMonotonicClock {
    elapsed: Cell<Duration>,
}

impl ManualMonotonicClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.elapsed.set(self.elapsed.get() + by);
    }

    pub fn set(&self, elapsed: Duration) {
        self.elapsed.set(elapsed);
    }
}

impl MonotonicClock for ManualMonotonicClock {
    fn elapsed(&self) -> Duration {
        self.elapsed.get()
    }
}
