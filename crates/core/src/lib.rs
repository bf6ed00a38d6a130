#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Strand Core
//!
//! Core identifier types and shared constants for the Strand workflow
//! engine. This crate provides the fundamental building blocks used by all
//! other Strand crates.
//!
//! ## Key Components
//!
//! - **Identifiers**: [`InstanceId`] — UUID-typed per-execution identity
//! - **Keys**: [`WorkflowKey`], [`StepKey`], [`TaskKey`] — validated string
//!   names assigned by workflow authors
//! - **Constants**: reserved context keys ([`FINAL_RESULT`],
//!   [`ASYNC_FUTURE`]) and pool-sizing defaults

pub mod constants;
pub mod id;
pub mod keys;

pub use constants::*;
pub use id::*;
pub use keys::*;
