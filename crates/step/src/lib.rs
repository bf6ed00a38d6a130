#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Strand Step
//!
//! The step-result algebra and handler surface of the Strand workflow
//! engine. This crate defines:
//!
//! - [`StepResult`] — the six tagged outcomes a step can produce
//! - [`StepHandler`] / [`AsyncStepHandler`] — the executable bodies
//!   registered on graph nodes
//! - [`StepContext`] — the read-consistent per-invocation view
//! - [`StepError`] — coded errors driving retry/abort decisions
//! - [`ValueKind`] — runtime type tags for inputs, outputs and resume
//!   payloads
//! - [`RetryContext`] — attempt state handed to handlers on retry

pub mod context;
pub mod error;
pub mod handler;
pub mod kind;
pub mod result;
pub mod retry;

pub use context::StepContext;
pub use error::{StepError, codes};
pub use handler::{
    AsyncFnHandler, AsyncOutput, AsyncStepHandler, FnHandler, ProgressHandle, StepHandler,
    async_handler_fn, handler_fn,
};
pub use kind::ValueKind;
pub use result::{AsyncRequest, BranchEvent, StepResult, SuspendRequest};
pub use retry::{AttemptRecord, RetryContext};
