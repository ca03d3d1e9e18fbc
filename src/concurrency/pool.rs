//! Fixed-size pool of worker threads draining a [`DelayQueue`].
//!
//! Every worker runs the same loop: block in `take`, run what comes out, repeat. A worker
//! only stops when `take` returns `None`, i.e. when the queue is interrupted or has been
//! closed and emptied. Payload failures and panics are absorbed by the task itself and never
//! reach the loop.
use std::{
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::{
    scheduling::{delay_queue::DelayQueue, task::Job, Scheduleable},
    TickError,
};

use super::interrupt::Interrupt;

#[derive(Debug, Default)]
struct Liveness {
    live: Mutex<usize>,
    exited: Condvar,
}

/// Decrements the live count when a worker loop ends, however it ends.
struct ExitGuard(Arc<Liveness>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let mut live = self.0.live.lock();
        *live -= 1;
        self.0.exited.notify_all();
    }
}

#[derive(Debug)]
pub struct WorkerPool {
    size: usize,
    workers: Mutex<Vec<JoinHandle<()>>>,
    interrupt: Interrupt,
    liveness: Arc<Liveness>,
}

impl WorkerPool {
    /// Start `size` workers named `{thread_name}-{index}`, all taking from `queue`.
    ///
    /// If a thread fails to spawn, the queue is interrupted so the workers already started
    /// exit, and the spawn error is returned.
    pub fn spawn(
        size: usize,
        thread_name: &str,
        queue: Arc<DelayQueue<Job>>,
    ) -> Result<Self, TickError> {
        if size == 0 {
            return Err(TickError::InvalidPoolSize);
        }
        let interrupt = Interrupt::default();
        let liveness = Arc::new(Liveness::default());
        let mut workers = Vec::with_capacity(size);

        for index in 0..size {
            *liveness.live.lock() += 1;
            let queue_ref = Arc::clone(&queue);
            let interrupt_ref = interrupt.clone();
            let guard = ExitGuard(Arc::clone(&liveness));
            let spawned = thread::Builder::new()
                .name(format!("{thread_name}-{index}"))
                .spawn(move || work(index, &queue_ref, &interrupt_ref, guard));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    queue.interrupt();
                    return Err(TickError::Spawn(err));
                }
            }
        }
        debug!(size, thread_name, "worker pool started");

        Ok(Self {
            size,
            workers: Mutex::new(workers),
            interrupt,
            liveness,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Workers whose loop has not ended yet.
    pub fn live_workers(&self) -> usize {
        *self.liveness.live.lock()
    }

    /// Signal running payloads to stop. Payloads that never look at their [`Interrupt`]
    /// run to completion regardless.
    pub fn interrupt(&self) {
        self.interrupt.trigger();
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupt.is_interrupted()
    }

    /// Wait for every worker loop to end, up to `timeout` if one is given. Returns whether
    /// all of them did. Must not be called from a worker thread.
    pub fn await_termination(&self, timeout: Option<Duration>) -> bool {
        let until = timeout.and_then(|timeout| Instant::now().checked_add(timeout));
        let mut live = self.liveness.live.lock();
        while *live > 0 {
            match until {
                Some(until) => {
                    if self.liveness.exited.wait_until(&mut live, until).timed_out() {
                        break;
                    }
                }
                None => self.liveness.exited.wait(&mut live),
            }
        }
        let finished = *live == 0;
        drop(live);
        if finished {
            for handle in self.workers.lock().drain(..) {
                let _ = handle.join();
            }
        }
        finished
    }
}

fn work(index: usize, queue: &DelayQueue<Job>, interrupt: &Interrupt, _exit: ExitGuard) {
    debug!(worker = index, "worker started");
    let mut ran = 0_u64;
    while let Some(job) = queue.take() {
        trace!(worker = index, sequence = job.sequence(), "dequeued task");
        job.run(interrupt);
        ran += 1;
    }
    debug!(worker = index, ran, "worker exiting");
}
