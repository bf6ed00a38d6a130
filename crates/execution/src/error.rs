//! Execution error types.

use thiserror::Error;

use crate::status::InstanceStatus;

/// Errors that can occur while manipulating durable instance state.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// A state transition is not valid for the current status.
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        /// Current status.
        from: String,
        /// Attempted target status.
        to: String,
    },

    /// A resume-related operation found the instance not suspended.
    #[error("instance is not suspended (status: {status})")]
    NotSuspended {
        /// The instance's actual status.
        status: InstanceStatus,
    },

    /// A typed context read found a value of the wrong shape.
    #[error("context value '{key}' has the wrong shape: {message}")]
    TypeMismatch {
        /// The context key that was read.
        key: String,
        /// What went wrong.
        message: String,
    },

    /// A serialization or deserialization error.
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_transition_display() {
        let err = ExecutionError::InvalidTransition {
            from: "completed".into(),
            to: "running".into(),
        };
        assert_eq!(err.to_string(), "invalid transition from completed to running");
    }

    #[test]
    fn not_suspended_display() {
        let err = ExecutionError::NotSuspended {
            status: InstanceStatus::Running,
        };
        assert!(err.to_string().contains("not suspended"));
        assert!(err.to_string().contains("running"));
    }

    #[test]
    fn type_mismatch_display() {
        let err = ExecutionError::TypeMismatch {
            key: "count".into(),
            message: "expected u32".into(),
        };
        assert!(err.to_string().contains("count"));
    }

    #[test]
    fn from_serde_error() {
        let serde_err = serde_json::from_str::<String>("not valid json").unwrap_err();
        let err = ExecutionError::from(serde_err);
        assert!(err.to_string().starts_with("serialization:"));
    }
}
