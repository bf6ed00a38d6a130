//! Execution handles and status snapshots.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use strand_core::{InstanceId, WorkflowKey};
use strand_execution::{ErrorInfo, InstanceStatus};
use strand_telemetry::ExecutionEvent;
use tokio::sync::watch;

use crate::engine::EngineInner;
use crate::error::EngineError;

/// Terminal-state signal published per instance.
#[derive(Debug, Clone)]
pub(crate) enum Completion {
    /// The instance is executing.
    Pending,
    /// The instance is durably suspended.
    Suspended,
    /// The instance completed with a result.
    Completed(Value),
    /// The instance failed.
    Failed(ErrorInfo),
    /// The instance was cancelled.
    Cancelled,
}

/// Handle to a running (or finished) workflow instance.
///
/// Returned by `execute` and `resume`. The handle never exposes the
/// engine's concurrency primitives; it resolves through the instance's
/// completion channel.
#[derive(Debug, Clone)]
pub struct Execution {
    instance_id: InstanceId,
    workflow_id: WorkflowKey,
    is_async: bool,
    engine: Arc<EngineInner>,
    receiver: watch::Receiver<Completion>,
}

impl Execution {
    pub(crate) fn new(
        instance_id: InstanceId,
        workflow_id: WorkflowKey,
        is_async: bool,
        engine: Arc<EngineInner>,
        receiver: watch::Receiver<Completion>,
    ) -> Self {
        Self {
            instance_id,
            workflow_id,
            is_async,
            engine,
            receiver,
        }
    }

    /// The instance this handle refers to.
    #[must_use]
    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    /// The workflow being executed.
    #[must_use]
    pub fn workflow_id(&self) -> &WorkflowKey {
        &self.workflow_id
    }

    /// Returns `true` if the run continued on the async pool.
    #[must_use]
    pub fn is_async(&self) -> bool {
        self.is_async
    }

    /// Wait for the instance to reach a terminal state and return its
    /// final result.
    ///
    /// A suspended instance keeps waiting (a later `resume` finishes it).
    /// Failure and cancellation surface as errors with stable codes.
    pub async fn result(&self) -> Result<Value, EngineError> {
        let mut receiver = self.receiver.clone();
        loop {
            let current = receiver.borrow_and_update().clone();
            match current {
                Completion::Completed(value) => return Ok(value),
                Completion::Failed(error) => {
                    return Err(EngineError::StepFailed {
                        code: error.code,
                        message: error.message,
                    });
                }
                Completion::Cancelled => return Err(EngineError::Cancelled),
                Completion::Pending | Completion::Suspended => {}
            }
            if receiver.changed().await.is_err() {
                return Err(EngineError::Internal("engine shut down".into()));
            }
        }
    }

    /// Like [`result`](Self::result), bounded by a timeout.
    pub async fn result_timeout(&self, timeout: Duration) -> Result<Value, EngineError> {
        tokio::time::timeout(timeout, self.result())
            .await
            .map_err(|_| EngineError::ResultTimeout(timeout))?
    }

    /// Cancel the instance. Returns `true` the first time, `false` once
    /// the instance is already terminal.
    pub async fn cancel(&self) -> Result<bool, EngineError> {
        self.engine.cancel_instance(self.instance_id).await
    }
}

/// Point-in-time status snapshot of an instance.
#[derive(Debug, Clone)]
pub struct Status {
    /// The instance's durable status.
    pub state: InstanceStatus,
    /// Percent complete of the latest async task, if one exists.
    pub percent: Option<u8>,
    /// Message of the latest async task progress report.
    pub message: Option<String>,
    /// The most recent event published for the latest async task.
    pub last_event: Option<ExecutionEvent>,
    /// Failure details, present when the instance failed.
    pub error: Option<ErrorInfo>,
}
