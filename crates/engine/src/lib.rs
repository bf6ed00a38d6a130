#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Strand Engine
//!
//! The execution runtime of the Strand workflow engine:
//!
//! - [`Engine`] — the façade: `execute`, `resume`, `status`,
//!   `current_result`, `cancel`, `shutdown`
//! - [`Execution`] — handle to a running instance, resolving to its
//!   terminal result
//! - [`ProgressTracker`] — per-task progress registry with event fan-out
//! - [`AsyncTaskManager`] — bounded pool running async step work
//! - [`WorkflowRegistry`] — compiled graphs by workflow id
//! - [`EngineConfig`] — pool sizing and timeout configuration
//!
//! Within one instance, step transitions are strictly serialized; across
//! instances, execution is fully parallel up to pool capacity. State is
//! checkpointed between every transition, so an engine built over the
//! same repositories after a restart resumes suspended instances from
//! their persisted state.

pub mod config;
pub mod engine;
pub mod error;
pub mod progress;
pub mod registry;
pub mod result;
pub mod tasks;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::EngineError;
pub use progress::{Progress, ProgressTracker, TaskExecution, TaskProgressReporter};
pub use registry::WorkflowRegistry;
pub use result::{Execution, Status};
pub use tasks::{AsyncTaskManager, RegisteredFuture};
