//! Engine configuration.

use std::time::Duration;

use strand_core::{DEFAULT_MAX_CONCURRENT_TASKS, DEFAULT_QUEUE_CAPACITY};

/// Configuration for an [`Engine`](crate::engine::Engine).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of async step tasks running concurrently.
    pub max_concurrent_tasks: usize,
    /// Async submissions admitted beyond the concurrency limit before
    /// `submit` rejects with a queue-full error.
    pub queue_capacity: usize,
    /// Default timeout for synchronous step invocations. `None` disables.
    pub default_step_timeout: Option<Duration>,
    /// Buffered events per subscriber on the engine's event bus.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: DEFAULT_MAX_CONCURRENT_TASKS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            default_step_timeout: None,
            event_capacity: 256,
        }
    }
}

impl EngineConfig {
    /// Set the async pool concurrency limit.
    #[must_use]
    pub fn with_max_concurrent_tasks(mut self, max: usize) -> Self {
        self.max_concurrent_tasks = max.max(1);
        self
    }

    /// Set the async submission queue capacity.
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the default synchronous step timeout.
    #[must_use]
    pub fn with_default_step_timeout(mut self, timeout: Duration) -> Self {
        self.default_step_timeout = Some(timeout);
        self
    }

    /// Disable the default synchronous step timeout.
    #[must_use]
    pub fn without_step_timeout(mut self) -> Self {
        self.default_step_timeout = None;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_concurrent_tasks, DEFAULT_MAX_CONCURRENT_TASKS);
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert!(config.default_step_timeout.is_none());
    }

    #[test]
    fn builder_methods() {
        let config = EngineConfig::default()
            .with_max_concurrent_tasks(2)
            .with_queue_capacity(10)
            .with_default_step_timeout(Duration::from_secs(5));

        assert_eq!(config.max_concurrent_tasks, 2);
        assert_eq!(config.queue_capacity, 10);
        assert_eq!(config.default_step_timeout, Some(Duration::from_secs(5)));

        let config = config.without_step_timeout();
        assert!(config.default_step_timeout.is_none());
    }

    #[test]
    fn concurrency_floor_is_one() {
        let config = EngineConfig::default().with_max_concurrent_tasks(0);
        assert_eq!(config.max_concurrent_tasks, 1);
    }
}
