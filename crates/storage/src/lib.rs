#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Strand Storage
//!
//! Durable state repositories for the Strand workflow engine:
//!
//! - [`StateRepository`] — workflow instances, with per-record atomicity
//!   and optimistic concurrency (version counter)
//! - [`AsyncStateRepository`] — async step task records
//! - [`InMemoryStateRepository`] / [`InMemoryAsyncStateRepository`] —
//!   default backends for tests and single-process deployments
//!
//! Production backends plug in behind the same traits.

pub mod error;
pub mod memory;
pub mod repository;

pub use error::StorageError;
pub use memory::{InMemoryAsyncStateRepository, InMemoryStateRepository};
pub use repository::{AsyncStateRepository, StateRepository};
