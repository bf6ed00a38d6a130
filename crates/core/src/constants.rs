//! Reserved context keys and engine-wide defaults.

/// Context key under which a workflow's terminal result is stored.
pub const FINAL_RESULT: &str = "final_result";

/// Context key that records the task id of a pre-registered async future.
///
/// Futures cannot live inside serialized context, so the key stores the
/// task id; the future itself is handed to the async task manager.
pub const ASYNC_FUTURE: &str = "async_future";

/// Default number of concurrently running async step tasks.
pub const DEFAULT_MAX_CONCURRENT_TASKS: usize = 8;

/// Default capacity of the async submission queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;
