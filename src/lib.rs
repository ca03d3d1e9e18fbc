use std::{error::Error as StdError, sync::Arc, time::Duration};

use thiserror::Error;

pub mod concurrency;
pub mod scheduling;
pub mod service;
pub mod time;

pub use concurrency::interrupt::{Interrupt, Interrupted};
pub use scheduling::task::{TaskHandle, TaskState};
pub use service::{
    config::SchedulerConfig,
    current,
    shared::SharedScheduler,
    Lifecycle, Scheduler, SchedulerService,
};
pub use time::{Clock, ManualClock, SystemClock};

/// What payload errors are converted into before they are stored on a task.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Error type for the scheduler and its task handles
#[derive(Debug, Error)]
pub enum TickError {
    #[error("scheduled operation failed: {0}")]
    Operation(Arc<dyn StdError + Send + Sync + 'static>),
    #[error("scheduler is shutting down, no new tasks are accepted")]
    Shutdown,
    #[error("task was cancelled before producing a result")]
    Cancelled,
    #[error("no result within {0:?}")]
    Timeout(Duration),
    #[error("worker pool size must be greater than 0")]
    InvalidPoolSize,
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("invalid deadline: {0}")]
    InvalidDeadline(String),
}
