//! Engine error taxonomy.

use std::time::Duration;

use strand_core::{InstanceId, WorkflowKey};
use strand_execution::{ExecutionError, InstanceStatus};
use strand_step::ValueKind;
use strand_storage::StorageError;

/// Errors surfaced by the engine façade.
///
/// Every variant has a stable [`code`](EngineError::code) callers can
/// match on without parsing messages.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// No workflow registered under the given id.
    #[error("workflow not found: {workflow_id}")]
    WorkflowNotFound {
        /// The missing workflow id.
        workflow_id: WorkflowKey,
    },

    /// No instance with the given id.
    #[error("instance not found: {instance_id}")]
    InstanceNotFound {
        /// The missing instance id.
        instance_id: InstanceId,
    },

    /// The instance is terminal and rejects further operations.
    #[error("instance is terminal ({status})")]
    Terminal {
        /// The instance's terminal status.
        status: InstanceStatus,
    },

    /// Resume was called on an instance that is not suspended.
    #[error("instance is not suspended ({status})")]
    NotSuspended {
        /// The instance's actual status.
        status: InstanceStatus,
    },

    /// No route for a produced result (missing edge or branch target,
    /// or a suspended step that no longer exists).
    #[error("routing: {message}")]
    Routing {
        /// What failed to route.
        message: String,
    },

    /// A resume payload did not satisfy the declared input kind.
    #[error("resume payload kind {actual} does not satisfy expected kind {expected}")]
    ResumeType {
        /// The kind the suspension requires.
        expected: ValueKind,
        /// The kind of the supplied payload.
        actual: ValueKind,
    },

    /// The instance failed; carries the step failure's stable code.
    #[error("step failed ({code}): {message}")]
    StepFailed {
        /// The step error's code (e.g. `timeout`, `circuit_open`).
        code: String,
        /// Human-readable description.
        message: String,
    },

    /// The instance was cancelled.
    #[error("execution cancelled")]
    Cancelled,

    /// `result_timeout` elapsed before the instance became terminal.
    #[error("result not available within {0:?}")]
    ResultTimeout(Duration),

    /// The async submission queue is full.
    #[error("async task queue is full")]
    QueueFull,

    /// A repository operation failed.
    #[error("persistence: {0}")]
    Persistence(StorageError),

    /// Invalid durable-state manipulation.
    #[error("execution state: {0}")]
    Execution(#[from] ExecutionError),

    /// An internal invariant was violated.
    #[error("internal: {0}")]
    Internal(String),
}

impl EngineError {
    /// Stable machine-readable code for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::WorkflowNotFound { .. } => "workflow_not_found",
            Self::InstanceNotFound { .. } => "instance_not_found",
            Self::Terminal { .. } => "terminal",
            Self::NotSuspended { .. } => "not_suspended",
            Self::Routing { .. } => "routing",
            Self::ResumeType { .. } => "resume_type",
            Self::StepFailed { .. } => "step_failed",
            Self::Cancelled => "cancelled",
            Self::ResultTimeout(_) => "result_timeout",
            Self::QueueFull => "queue_full",
            Self::Persistence(_) => "persistence",
            Self::Execution(_) => "execution",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<StorageError> for EngineError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InstanceNotFound(instance_id) => Self::InstanceNotFound { instance_id },
            other => Self::Persistence(other),
        }
    }
}
