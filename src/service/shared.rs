//! The process-wide scheduler handed out by [`current`].
//!
//! It is built on first use with one worker per available CPU and lives for the rest of
//! the process. Nobody owns it, so `shutdown` and `shutdown_now` on it do nothing.
use std::{sync::OnceLock, time::Instant};

use tracing::debug;

use crate::{
    concurrency::interrupt::Interrupt, scheduling::task::TaskHandle, time::Clock, BoxError,
    TickError,
};

use super::{Lifecycle, Scheduler, SchedulerService};

static CURRENT: OnceLock<SharedScheduler> = OnceLock::new();

/// Shared scheduler; delegates scheduling, ignores shutdown.
#[derive(Debug)]
pub struct SharedScheduler {
    inner: SchedulerService,
}

impl SharedScheduler {
    pub fn pool_size(&self) -> usize {
        self.inner.pool_size()
    }

    pub fn pending(&self) -> usize {
        self.inner.pending()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.lifecycle()
    }
}

/// The process-wide scheduler, started on first call.
///
/// Fails only if its worker threads cannot be spawned; a later call tries again.
pub fn current() -> Result<&'static SharedScheduler, TickError> {
    if let Some(shared) = CURRENT.get() {
        return Ok(shared);
    }
    let candidate = SharedScheduler {
        inner: SchedulerService::with_default_parallelism()?,
    };
    // losing a race drops `candidate`, which shuts its idle workers down
    Ok(CURRENT.get_or_init(|| candidate))
}

impl Scheduler for SharedScheduler {
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
        self.inner.schedule_interruptible(deadline, op)
    }

    fn clock(&self) -> &dyn Clock {
        self.inner.clock()
    }

    fn shutdown(&self) {
        debug!("ignoring shutdown of the shared scheduler");
    }

    fn shutdown_now(&self) -> usize {
        debug!("ignoring shutdown_now of the shared scheduler");
        0
    }
}
