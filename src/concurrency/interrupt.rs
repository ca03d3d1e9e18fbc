//! Cooperative cancellation signal shared by a worker pool and the payloads it runs.
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

/// Returned by payloads that gave up because of a forced shutdown.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("interrupted by scheduler shutdown")]
pub struct Interrupted;

#[derive(Debug, Default)]
struct Signal {
    raised: Mutex<bool>,
    wake: Condvar,
}

/// One-way flag: once triggered it stays triggered.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    signal: Arc<Signal>,
}

impl Interrupt {
    pub fn trigger(&self) {
        let mut raised = self.signal.raised.lock();
        *raised = true;
        self.signal.wake.notify_all();
    }

    pub fn is_interrupted(&self) -> bool {
        *self.signal.raised.lock()
    }

    /// `Err(Interrupted)` once triggered, for use with `?` inside a payload.
    pub fn check(&self) -> Result<(), Interrupted> {
        if self.is_interrupted() {
            return Err(Interrupted);
        }
        Ok(())
    }

    /// Sleep for `duration`, waking early if the interrupt fires.
    pub fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        let until = Instant::now().checked_add(duration);
        let mut raised = self.signal.raised.lock();
        while !*raised {
            match until {
                Some(until) => {
                    if self.signal.wake.wait_until(&mut raised, until).timed_out() {
                        break;
                    }
                }
                None => self.signal.wake.wait(&mut raised),
            }
        }
        if *raised {
            return Err(Interrupted);
        }
        Ok(())
    }
}
