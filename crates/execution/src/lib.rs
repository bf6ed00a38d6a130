#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Strand Execution
//!
//! Durable execution state for the Strand workflow engine. This crate
//! models what gets persisted between steps — it does NOT contain the
//! engine orchestrator. It defines:
//!
//! - [`InstanceStatus`] — the instance-level state machine
//! - [`WorkflowInstance`] — the durable record of one execution
//! - [`WorkflowContext`] — ordered step outputs + typed key-value store
//! - [`SuspensionData`] — everything needed to resume a paused instance
//! - [`AsyncStepState`] — durable state of async step tasks
//! - [`JournalEntry`] — audit log of execution events
//! - Transition validation in the [`transition`] module

pub mod async_state;
pub mod context;
pub mod error;
pub mod instance;
pub mod journal;
pub mod status;
pub mod suspension;
pub mod transition;

pub use async_state::{AsyncStepState, AsyncTaskState};
pub use context::WorkflowContext;
pub use error::ExecutionError;
pub use instance::{ErrorInfo, WorkflowInstance};
pub use journal::JournalEntry;
pub use status::InstanceStatus;
pub use suspension::SuspensionData;
pub use transition::{can_transition, validate_transition};
