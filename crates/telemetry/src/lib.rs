#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Strand Telemetry
//!
//! Observability primitives for the Strand workflow engine:
//!
//! - [`EventBus`] / [`ExecutionEvent`] — broadcast fan-out of execution
//!   lifecycle events, ordered per publisher
//! - [`MetricsRegistry`] — named counters and histograms with
//!   non-blocking recording

pub mod event;
pub mod metrics;

pub use event::{EventBus, EventSubscriber, ExecutionEvent};
pub use metrics::{Counter, Histogram, HistogramSnapshot, MetricsRegistry};
