//! Resilience error types.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by the resilience layer.
#[derive(Debug, Clone, Error)]
pub enum ResilienceError {
    /// An operation exceeded its time budget.
    #[error("operation timed out after {duration:?}")]
    Timeout {
        /// The budget that was exceeded.
        duration: Duration,
    },

    /// A circuit breaker refused the operation.
    #[error("circuit breaker open")]
    CircuitOpen {
        /// Time until the breaker transitions to half-open, if known.
        retry_after: Option<Duration>,
    },

    /// A retry policy ran out of attempts.
    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    AttemptsExhausted {
        /// How many attempts were made.
        attempts: u32,
        /// The final failure's message.
        last_error: String,
    },

    /// A configuration value failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ResilienceError {
    /// Stable machine-readable code for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::AttemptsExhausted { .. } => "retry_exhausted",
            Self::InvalidConfig(_) => "invalid_config",
        }
    }
}
