//! The unit of work the scheduler orders, and the handle callers hold on to.
//!
//! A [`ScheduledTask`] is created `Pending`, owned by the delay queue until a worker takes
//! it, and then driven to exactly one terminal state. The outcome lives in a
//! single-assignment slot: one writer (the worker, or whoever cancels first) and any
//! number of readers blocked in [`TaskHandle::get`].
use std::{
    any::Any,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::{concurrency::interrupt::Interrupt, time::Clock, BoxError, TickError};

use super::{delay_queue::DelayQueue, Scheduleable};

static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Process-wide, strictly increasing tie-breaker for equal deadlines.
fn next_sequence() -> u64 {
    NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed)
}

/// Work the queue hands to a worker, with the result type erased.
pub type Job = Arc<dyn Runnable>;

type Payload<V> = Box<dyn FnOnce(&Interrupt) -> Result<V, BoxError> + Send>;

/// A payload that unwound instead of returning.
#[derive(Debug, Error)]
#[error("operation panicked: {0}")]
pub struct Panicked(pub String);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }
}

enum Outcome<V> {
    Pending,
    Running,
    Completed(V),
    Failed(Arc<dyn std::error::Error + Send + Sync>),
    Cancelled,
}

impl<V> Outcome<V> {
    fn state(&self) -> TaskState {
        match self {
            Outcome::Pending => TaskState::Pending,
            Outcome::Running => TaskState::Running,
            Outcome::Completed(_) => TaskState::Completed,
            Outcome::Failed(_) => TaskState::Failed,
            Outcome::Cancelled => TaskState::Cancelled,
        }
    }
}

/// Something a worker can execute once it comes off the queue.
pub trait Runnable: Scheduleable + fmt::Debug + Send + Sync {
    /// Execute the payload, unless the task already left `Pending`.
    fn run(&self, interrupt: &Interrupt);
    /// Move a `Pending` task straight to `Cancelled`.
    fn cancel(&self) -> bool;
    fn state(&self) -> TaskState;
}

/// Deadline, tie-breaker, payload, and result slot of one scheduled operation.
pub struct ScheduledTask<V> {
    sequence: u64,
    deadline: Instant,
    clock: Arc<dyn Clock>,
    payload: Mutex<Option<Payload<V>>>,
    slot: Mutex<Outcome<V>>,
    done: Condvar,
}

impl<V> ScheduledTask<V> {
    pub fn new<F>(deadline: Instant, clock: Arc<dyn Clock>, payload: F) -> Self
    where
        F: FnOnce(&Interrupt) -> Result<V, BoxError> + Send + 'static,
    {
        Self {
            sequence: next_sequence(),
            deadline,
            clock,
            payload: Mutex::new(Some(Box::new(payload))),
            slot: Mutex::new(Outcome::Pending),
            done: Condvar::new(),
        }
    }

    pub fn state(&self) -> TaskState {
        self.slot.lock().state()
    }

    /// `Pending -> Running`. False if the task was cancelled first.
    fn begin(&self) -> bool {
        let mut slot = self.slot.lock();
        if !matches!(*slot, Outcome::Pending) {
            return false;
        }
        *slot = Outcome::Running;
        true
    }

    /// Write the terminal outcome and wake every reader.
    fn finish(&self, outcome: Outcome<V>) {
        let mut slot = self.slot.lock();
        *slot = outcome;
        self.done.notify_all();
    }

    fn cancel_pending(&self) -> bool {
        let mut slot = self.slot.lock();
        if !matches!(*slot, Outcome::Pending) {
            return false;
        }
        *slot = Outcome::Cancelled;
        self.done.notify_all();
        drop(slot);
        // release whatever the closure captured
        self.payload.lock().take();
        true
    }

    fn execute(&self, interrupt: &Interrupt) {
        if interrupt.is_interrupted() && self.cancel_pending() {
            trace!(sequence = self.sequence, "cancelled task dequeued after interrupt");
            return;
        }
        if !self.begin() {
            trace!(sequence = self.sequence, "skipping task that left pending");
            return;
        }
        let Some(payload) = self.payload.lock().take() else {
            self.finish(Outcome::Cancelled);
            return;
        };
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| payload(interrupt))) {
            Ok(Ok(value)) => Outcome::Completed(value),
            Ok(Err(err)) if interrupt.is_interrupted() => {
                debug!(sequence = self.sequence, %err, "operation stopped by interrupt");
                Outcome::Cancelled
            }
            Ok(Err(err)) => {
                debug!(sequence = self.sequence, %err, "operation failed");
                Outcome::Failed(Arc::from(err))
            }
            Err(panic) => {
                let message = panic_message(panic);
                warn!(sequence = self.sequence, %message, "operation panicked");
                Outcome::Failed(Arc::new(Panicked(message)))
            }
        };
        trace!(sequence = self.sequence, state = ?outcome.state(), "task finished");
        self.finish(outcome);
    }

    fn wait(&self, timeout: Option<Duration>) -> Result<V, TickError>
    where
        V: Clone,
    {
        // a timeout too large to represent waits without one
        let until = timeout.and_then(|timeout| {
            Instant::now()
                .checked_add(timeout)
                .map(|until| (timeout, until))
        });
        let mut slot = self.slot.lock();
        loop {
            match &*slot {
                Outcome::Completed(value) => return Ok(value.clone()),
                Outcome::Failed(err) => return Err(TickError::Operation(Arc::clone(err))),
                Outcome::Cancelled => return Err(TickError::Cancelled),
                Outcome::Pending | Outcome::Running => {}
            }
            match until {
                Some((timeout, until)) => {
                    if self.done.wait_until(&mut slot, until).timed_out()
                        && !slot.state().is_terminal()
                    {
                        return Err(TickError::Timeout(timeout));
                    }
                }
                None => self.done.wait(&mut slot),
            }
        }
    }
}

impl<V> Scheduleable for ScheduledTask<V> {
    fn deadline(&self) -> Instant {
        self.deadline
    }
    fn sequence(&self) -> u64 {
        self.sequence
    }
    fn delay(&self) -> Duration {
        self.deadline.saturating_duration_since(self.clock.now())
    }
}

impl<V: Send> Runnable for ScheduledTask<V> {
    fn run(&self, interrupt: &Interrupt) {
        self.execute(interrupt)
    }

    fn cancel(&self) -> bool {
        self.cancel_pending()
    }

    fn state(&self) -> TaskState {
        ScheduledTask::state(self)
    }
}

impl<V> fmt::Debug for ScheduledTask<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("sequence", &self.sequence)
            .field("deadline", &self.deadline)
            .field("state", &self.state())
            .finish()
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = panic.downcast_ref::<String>() {
        return message.clone();
    }
    "non-string panic payload".to_string()
}

/// Caller-side view of a scheduled operation.
pub struct TaskHandle<V> {
    task: Arc<ScheduledTask<V>>,
    queue: Weak<DelayQueue<Job>>,
}

impl<V> Clone for TaskHandle<V> {
    fn clone(&self) -> Self {
        Self {
            task: Arc::clone(&self.task),
            queue: Weak::clone(&self.queue),
        }
    }
}

impl<V> fmt::Debug for TaskHandle<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TaskHandle").field(&self.task).finish()
    }
}

impl<V: Send + 'static> TaskHandle<V> {
    pub(crate) fn new(task: Arc<ScheduledTask<V>>, queue: &Arc<DelayQueue<Job>>) -> Self {
        Self {
            task,
            queue: Arc::downgrade(queue),
        }
    }

    /// Block until the task reaches a terminal state and return its outcome.
    pub fn get(&self) -> Result<V, TickError>
    where
        V: Clone,
    {
        self.task.wait(None)
    }

    /// Like [`get`](Self::get), but give up after `timeout`. Timing out leaves the task as is.
    pub fn get_timeout(&self, timeout: Duration) -> Result<V, TickError>
    where
        V: Clone,
    {
        self.task.wait(Some(timeout))
    }

    /// Cancel the task if it has not started. Returns false once it is running or done.
    pub fn cancel(&self) -> bool {
        if !self.task.cancel_pending() {
            return false;
        }
        if let Some(queue) = self.queue.upgrade() {
            queue.remove(self.task.sequence);
        }
        true
    }

    pub fn state(&self) -> TaskState {
        self.task.state()
    }

    pub fn is_done(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == TaskState::Cancelled
    }

    pub fn deadline(&self) -> Instant {
        self.task.deadline
    }

    /// Time left until the task becomes eligible, by the scheduler's clock.
    pub fn delay(&self) -> Duration {
        self.task.delay()
    }

    pub fn sequence(&self) -> u64 {
        self.task.sequence
    }
}
