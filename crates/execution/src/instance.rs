//! Durable workflow instances.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strand_core::{InstanceId, StepKey, WorkflowKey};

use crate::context::WorkflowContext;
use crate::error::ExecutionError;
use crate::journal::JournalEntry;
use crate::status::InstanceStatus;
use crate::suspension::SuspensionData;
use crate::transition::validate_transition;

/// Failure details recorded on a failed instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable machine-readable code.
    pub code: String,
    /// Human-readable description.
    pub message: String,
    /// The step the failure is attributed to, if any.
    #[serde(default)]
    pub step: Option<StepKey>,
}

impl ErrorInfo {
    /// Create failure details.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            step: None,
        }
    }

    /// Attribute the failure to a step.
    #[must_use]
    pub fn at_step(mut self, step: StepKey) -> Self {
        self.step = Some(step);
        self
    }
}

/// The durable state of one workflow execution.
///
/// Invariants maintained by the mutating methods:
/// - `status == Suspended` exactly when `suspension` is set
/// - status changes are validated and bump `version`/`updated_at`
/// - terminal instances reject all further transitions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInstance {
    /// Unique identifier of this execution.
    pub instance_id: InstanceId,
    /// The workflow being executed.
    pub workflow_id: WorkflowKey,
    /// Current status.
    pub status: InstanceStatus,
    /// The step the engine will invoke (or is invoking) next.
    pub current_step: StepKey,
    /// Durable context: step outputs, typed values, trigger data.
    pub context: WorkflowContext,
    /// Suspension state; set exactly while `status == Suspended`.
    #[serde(default)]
    pub suspension: Option<SuspensionData>,
    /// Failure details; set when `status == Failed`.
    #[serde(default)]
    pub error: Option<ErrorInfo>,
    /// Audit journal of execution events.
    #[serde(default)]
    pub journal: Vec<JournalEntry>,
    /// Optimistic concurrency version (bumped on each state change).
    pub version: u64,
    /// When the instance was created.
    pub created_at: DateTime<Utc>,
    /// When the instance was last updated.
    pub updated_at: DateTime<Utc>,
}

impl WorkflowInstance {
    /// Create a new running instance positioned at the initial step.
    #[must_use]
    pub fn new(
        instance_id: InstanceId,
        workflow_id: WorkflowKey,
        initial_step: StepKey,
        trigger_data: Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            instance_id,
            workflow_id,
            status: InstanceStatus::Running,
            current_step: initial_step,
            context: WorkflowContext::new(trigger_data),
            suspension: None,
            error: None,
            journal: Vec::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns `true` if the instance has reached a final state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move the cursor to the next step.
    pub fn advance_to(&mut self, step: StepKey) {
        self.current_step = step;
        self.touch();
    }

    /// Append a journal entry.
    pub fn record(&mut self, entry: JournalEntry) {
        self.journal.push(entry);
    }

    /// Suspend the instance with the given suspension data.
    pub fn suspend(&mut self, data: SuspensionData) -> Result<(), ExecutionError> {
        self.transition_status(InstanceStatus::Suspended)?;
        self.suspension = Some(data);
        Ok(())
    }

    /// Clear the suspension and return to `Running`, handing back the
    /// suspension data for re-entry.
    pub fn resume_to_running(&mut self) -> Result<SuspensionData, ExecutionError> {
        if self.status != InstanceStatus::Suspended {
            return Err(ExecutionError::NotSuspended {
                status: self.status,
            });
        }
        let data = self
            .suspension
            .take()
            .ok_or(ExecutionError::NotSuspended {
                status: self.status,
            })?;
        self.transition_status(InstanceStatus::Running)?;
        Ok(data)
    }

    /// Complete the instance with a terminal result.
    pub fn complete(&mut self, result: Value) -> Result<(), ExecutionError> {
        self.transition_status(InstanceStatus::Completed)?;
        self.context.set_final_result(result);
        Ok(())
    }

    /// Fail the instance with the given details.
    pub fn fail(&mut self, error: ErrorInfo) -> Result<(), ExecutionError> {
        self.transition_status(InstanceStatus::Failed)?;
        self.error = Some(error);
        Ok(())
    }

    /// Cancel the instance.
    pub fn cancel(&mut self) -> Result<(), ExecutionError> {
        self.transition_status(InstanceStatus::Cancelled)?;
        Ok(())
    }

    /// Validate and apply a status change, bumping the version.
    ///
    /// Leaving `Suspended` through any transition clears the suspension
    /// data, preserving the status⇔suspension invariant.
    pub fn transition_status(&mut self, new_status: InstanceStatus) -> Result<(), ExecutionError> {
        validate_transition(self.status, new_status)?;
        if self.status == InstanceStatus::Suspended && new_status != InstanceStatus::Suspended {
            self.suspension = None;
        }
        self.status = new_status;
        self.touch();
        Ok(())
    }

    /// Bump the version and updated-at timestamp.
    ///
    /// Status transitions do this automatically; the engine calls it
    /// before checkpoints that only touched the context or journal.
    pub fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }
}
