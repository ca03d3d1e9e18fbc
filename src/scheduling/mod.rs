//! Deadline-ordered scheduling primitives.
//!
//! `delay_queue` holds the blocking min-heap that worker threads drain, and `task` the
//! single-assignment task record that callers observe through a handle.
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

pub mod delay_queue;
pub mod task;

/// Trait for anything the delay queue can order.
///
/// Items are ordered by `deadline`, then by `sequence`, which must be unique among items
/// sharing one queue.
pub trait Scheduleable {
    fn deadline(&self) -> Instant;
    fn sequence(&self) -> u64;
    /// Time left until the deadline; zero once the item is eligible.
    fn delay(&self) -> Duration;
}

impl<T: Scheduleable + ?Sized> Scheduleable for Arc<T> {
    fn deadline(&self) -> Instant {
        (**self).deadline()
    }
    fn sequence(&self) -> u64 {
        (**self).sequence()
    }
    fn delay(&self) -> Duration {
        (**self).delay()
    }
}
