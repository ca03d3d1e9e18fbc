//! The scheduler facade: accepts work for a point in time and owns the queue and the
//! workers that carry it out.
//!
//! [`SchedulerService`] is an owned scheduler with its own threads. [`current`] returns a
//! process-wide instance shared by everyone who asks; see [`shared`].
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{DateTime, NaiveDateTime, TimeZone};
use parking_lot::Mutex;
use tracing::{debug, info, trace};

use crate::{
    concurrency::{interrupt::Interrupt, pool::WorkerPool},
    scheduling::{
        delay_queue::DelayQueue,
        task::{Job, ScheduledTask, TaskHandle},
    },
    time::{wall, Clock},
    BoxError, TickError,
};

pub mod config;
pub mod shared;

pub use config::SchedulerConfig;
pub use shared::current;

/// Where a scheduler is in its life.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    /// Taking new tasks.
    Accepting,
    /// Refusing new tasks; already accepted ones still run.
    Draining,
    /// Refusing new tasks; nothing is left to run.
    Terminated,
}

/// Common surface of every scheduler in this crate.
pub trait Scheduler {
    /// Run `op` once `deadline` has passed. The payload receives the pool's [`Interrupt`]
    /// and may poll it to stop early on a forced shutdown.
    fn schedule_interruptible<V, E, F>(
        &self,
        deadline: Instant,
        op: F,
    ) -> Result<TaskHandle<V>, TickError>
    where
        V: Send + 'static,
        E: Into<BoxError>,
        F: FnOnce(&Interrupt) -> Result<V, E> + Send + 'static;

    /// Clock deadlines are measured against.
    fn clock(&self) -> &dyn Clock;

    /// Stop accepting tasks; those already accepted still run.
    fn shutdown(&self);

    /// Stop accepting tasks, cancel every task that has not started, and interrupt the
    /// running ones. Returns how many pending tasks were cancelled.
    fn shutdown_now(&self) -> usize;

    /// Run `op` once `deadline` has passed. A deadline in the past runs as soon as a
    /// worker is free.
    fn schedule<V, E, F>(&self, deadline: Instant, op: F) -> Result<TaskHandle<V>, TickError>
    where
        V: Send + 'static,
        E: Into<BoxError>,
        F: FnOnce() -> Result<V, E> + Send + 'static,
    {
        self.schedule_interruptible(deadline, move |_| op())
    }

    /// Schedule for a calendar date-time in any time zone.
    fn schedule_at<Tz, V, E, F>(
        &self,
        when: DateTime<Tz>,
        op: F,
    ) -> Result<TaskHandle<V>, TickError>
    where
        Tz: TimeZone,
        V: Send + 'static,
        E: Into<BoxError>,
        F: FnOnce() -> Result<V, E> + Send + 'static,
    {
        let deadline = wall::instant_for(self.clock(), when)?;
        self.schedule(deadline, op)
    }

    /// Schedule for a date-time on the host's local wall clock.
    fn schedule_local<V, E, F>(
        &self,
        when: NaiveDateTime,
        op: F,
    ) -> Result<TaskHandle<V>, TickError>
    where
        V: Send + 'static,
        E: Into<BoxError>,
        F: FnOnce() -> Result<V, E> + Send + 'static,
    {
        let deadline = wall::instant_for_local(self.clock(), when)?;
        self.schedule(deadline, op)
    }
}

/// Runs scheduled operations on a fixed pool of worker threads.
///
/// Dropping the service shuts it down gracefully: tasks already accepted still run on the
/// worker threads, which exit once the queue is empty.
#[derive(Debug)]
pub struct SchedulerService {
    queue: Arc<DelayQueue<Job>>,
    pool: WorkerPool,
    clock: Arc<dyn Clock>,
    state: Mutex<Lifecycle>,
}

impl SchedulerService {
    /// Scheduler with `pool_size` workers.
    pub fn new(pool_size: usize) -> Result<Self, TickError> {
        SchedulerConfig::default().with_pool_size(pool_size).build()
    }

    /// Scheduler with one worker; tasks run strictly one after another in deadline order.
    pub fn single() -> Result<Self, TickError> {
        Self::new(1)
    }

    /// Scheduler with one worker per available CPU.
    pub fn with_default_parallelism() -> Result<Self, TickError> {
        SchedulerConfig::default().build()
    }

    pub fn with_config(config: SchedulerConfig) -> Result<Self, TickError> {
        let queue = Arc::new(DelayQueue::new());
        let pool = WorkerPool::spawn(config.pool_size, &config.thread_name, Arc::clone(&queue))?;
        Ok(Self {
            queue,
            pool,
            clock: config.clock,
            state: Mutex::new(Lifecycle::Accepting),
        })
    }

    /// After a graceful `shutdown` this reports `Terminated` only once every worker has
    /// exited. After `shutdown_now` it reports `Terminated` at once, even while a payload
    /// that ignores its interrupt is still running; use `await_termination` for that.
    pub fn lifecycle(&self) -> Lifecycle {
        match *self.state.lock() {
            Lifecycle::Draining if self.pool.live_workers() == 0 => Lifecycle::Terminated,
            state => state,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool.size()
    }

    /// Tasks waiting for their deadline or for a free worker.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Block until every worker has exited, or `timeout` passes. Returns whether the
    /// workers are gone. Only meaningful after a shutdown; never call it from a payload.
    pub fn await_termination(&self, timeout: Option<Duration>) -> bool {
        self.pool.await_termination(timeout)
    }

    /// Accepting -> Draining. Returns false if the service had already left Accepting.
    fn stop_accepting(&self) -> bool {
        let mut state = self.state.lock();
        if *state != Lifecycle::Accepting {
            return false;
        }
        *state = Lifecycle::Draining;
        true
    }
}

impl Scheduler for SchedulerService {
    fn schedule_interruptible<V, E, F>(
        &self,
        deadline: Instant,
        op: F,
    ) -> Result<TaskHandle<V>, TickError>
    where
        V: Send + 'static,
        E: Into<BoxError>,
        F: FnOnce(&Interrupt) -> Result<V, E> + Send + 'static,
    {
        if *self.state.lock() != Lifecycle::Accepting {
            return Err(TickError::Shutdown);
        }
        let task = Arc::new(ScheduledTask::new(
            deadline,
            Arc::clone(&self.clock),
            move |interrupt: &Interrupt| op(interrupt).map_err(Into::into),
        ));
        let handle = TaskHandle::new(Arc::clone(&task), &self.queue);
        self.queue
            .insert(task as Job)
            .map_err(|_| TickError::Shutdown)?;
        trace!(sequence = handle.sequence(), delay = ?handle.delay(), "task scheduled");
        Ok(handle)
    }

    fn clock(&self) -> &dyn Clock {
        &*self.clock
    }

    fn shutdown(&self) {
        if self.stop_accepting() {
            self.queue.close();
            info!(pending = self.queue.len(), "scheduler draining");
        }
    }

    fn shutdown_now(&self) -> usize {
        self.stop_accepting();
        self.queue.interrupt();
        self.pool.interrupt();
        let cancelled = self
            .queue
            .drain()
            .into_iter()
            .filter(|job| job.cancel())
            .count();
        *self.state.lock() = Lifecycle::Terminated;
        info!(cancelled, "scheduler stopped");
        cancelled
    }
}

impl Drop for SchedulerService {
    fn drop(&mut self) {
        debug!("scheduler dropped");
        self.shutdown();
    }
}
