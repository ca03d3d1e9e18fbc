//! Time sources for the scheduler.
//!
//! Every delay computation in this crate goes through a [`Clock`], so a test can pin
//! "now" with a [`ManualClock`] and drive ordering decisions deterministically.
use std::{
    fmt::Debug,
    time::{Duration, Instant},
};

use parking_lot::Mutex;

pub mod wall;

/// Source of the current instant.
pub trait Clock: Debug + Send + Sync {
    fn now(&self) -> Instant;
}

/// Reads the monotonic system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl Default for ManualClock {
    fn default() -> Self {
        ManualClock::new()
    }
}

impl ManualClock {
    /// Fixed at the instant of construction.
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(start: Instant) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, instant: Instant) {
        *self.now.lock() = instant;
    }

    /// Move the clock forward by `by`, returning the new reading.
    pub fn advance(&self, by: Duration) -> Instant {
        let mut now = self.now.lock();
        *now += by;
        *now
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}
