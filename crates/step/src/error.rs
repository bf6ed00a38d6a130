//! Step error type and well-known error codes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Well-known step error codes.
///
/// Retry policies and circuit breakers match on these strings, so handlers
/// that want standard treatment should reuse them. Custom codes are allowed
/// and treated as retryable unless a policy says otherwise.
pub mod codes {
    /// A handler returned an error or panicked.
    pub const HANDLER: &str = "handler";
    /// An invocation or async task exceeded its time budget.
    pub const TIMEOUT: &str = "timeout";
    /// The instance was cancelled while the step was in flight.
    pub const CANCELLED: &str = "cancelled";
    /// No route for the produced result (missing edge or branch target).
    pub const ROUTING: &str = "routing";
    /// A circuit breaker short-circuited the invocation.
    pub const CIRCUIT_OPEN: &str = "circuit_open";
    /// A resume payload did not match the declared input type.
    pub const RESUME_TYPE: &str = "resume_type";
    /// A typed context read found a value of the wrong shape.
    pub const TYPE_MISMATCH: &str = "type_mismatch";
}

/// Error produced by (or on behalf of) a step invocation.
///
/// Carries a stable machine-readable `code` alongside the human-readable
/// message. The code drives retry/abort decisions.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct StepError {
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable description.
    pub message: String,
}

impl StepError {
    /// Create an error with an explicit code.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// A handler-originated failure.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::new(codes::HANDLER, message)
    }

    /// A step or async task exceeded its time budget.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(codes::TIMEOUT, message)
    }

    /// The instance was cancelled mid-invocation.
    pub fn cancelled() -> Self {
        Self::new(codes::CANCELLED, "step cancelled")
    }

    /// No route exists for the produced result.
    pub fn routing(message: impl Into<String>) -> Self {
        Self::new(codes::ROUTING, message)
    }

    /// A circuit breaker refused the invocation.
    pub fn circuit_open(message: impl Into<String>) -> Self {
        Self::new(codes::CIRCUIT_OPEN, message)
    }

    /// The error code.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Returns `true` if this error carries the given code.
    #[must_use]
    pub fn is(&self, code: &str) -> bool {
        self.code == code
    }
}
