#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Strand Resilience
//!
//! Failure policies for the Strand workflow engine:
//!
//! - [`RetryPolicy`] — per-step attempt budget with exponential backoff,
//!   retry/abort code lists and optional jitter
//! - [`CircuitBreaker`] — consecutive-failure guard that short-circuits
//!   invocations while open and probes before closing again
//!
//! The crate is dependency-light on purpose: policies match on string
//! error codes so any layer can consult them without pulling in the rest
//! of the engine.

pub mod circuit_breaker;
pub mod error;
pub mod retry;

pub use circuit_breaker::{BreakerState, BreakerStats, CircuitBreaker, CircuitBreakerConfig};
pub use error::ResilienceError;
pub use retry::{AbortReason, RetryDecision, RetryPolicy};

/// Serde helper for `Duration` serialized as integer milliseconds.
pub(crate) mod serde_duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    /// Serialize a `Duration` as an integer of milliseconds.
    pub fn serialize<S: Serializer>(duration: &Duration, s: S) -> Result<S::Ok, S::Error> {
        (duration.as_millis() as u64).serialize(s)
    }

    /// Deserialize an integer of milliseconds into a `Duration`.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(Duration::from_millis(ms))
    }
}
