#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Strand Workflow
//!
//! Workflow graphs for the Strand engine:
//!
//! - [`StepNode`] — a step with its handler, declared value kinds and
//!   per-step failure policies
//! - [`Edge`] — ordered, optionally conditional transitions
//! - [`WorkflowGraph`] — the immutable compiled graph
//! - [`GraphBuilder`] — fluent construction with build-time validation
//!
//! Graphs are compiled once and shared; all mutable state lives in
//! workflow instances.

pub mod builder;
pub mod edge;
pub mod error;
pub mod graph;
pub mod node;

pub use builder::GraphBuilder;
pub use edge::{Edge, EdgePredicate};
pub use error::GraphError;
pub use graph::WorkflowGraph;
pub use node::StepNode;
