use std::{num::NonZeroUsize, sync::Arc, thread};

use crate::{
    time::{Clock, SystemClock},
    TickError,
};

use super::SchedulerService;

const DEFAULT_THREAD_NAME: &str = "ticktock-worker";

/// Number of workers used when none is configured: the host's available parallelism,
/// or 1 if that cannot be determined.
pub fn default_parallelism() -> usize {
    thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

/// Settings for building a [`SchedulerService`].
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub pool_size: usize,
    /// Worker threads are named `{thread_name}-{index}`.
    pub thread_name: String,
    pub clock: Arc<dyn Clock>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pool_size: default_parallelism(),
            thread_name: DEFAULT_THREAD_NAME.to_string(),
            clock: Arc::new(SystemClock),
        }
    }
}

impl SchedulerConfig {
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_thread_name(mut self, thread_name: impl Into<String>) -> Self {
        self.thread_name = thread_name.into();
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Start a scheduler with these settings.
    pub fn build(self) -> Result<SchedulerService, TickError> {
        SchedulerService::with_config(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_the_host() {
        let config = SchedulerConfig::default();
        assert_eq!(config.pool_size, default_parallelism());
        assert!(config.pool_size >= 1);
        assert_eq!(config.thread_name, DEFAULT_THREAD_NAME);
    }

    #[test]
    fn zero_pool_size_fails_to_build() {
        let built = SchedulerConfig::default().with_pool_size(0).build();
        assert!(matches!(built, Err(TickError::InvalidPoolSize)));
    }
}
