//! State machine transition validation for workflow instances.

use crate::error::ExecutionError;
use crate::status::InstanceStatus;

/// Returns `true` if the transition from `from` to `to` is valid.
///
/// Terminal states admit nothing. A suspended instance may resume, or be
/// failed (fatal resume errors) or cancelled without resuming first.
#[must_use]
pub fn can_transition(from: InstanceStatus, to: InstanceStatus) -> bool {
    matches!(
        (from, to),
        (InstanceStatus::Running, InstanceStatus::Suspended)
            | (InstanceStatus::Running, InstanceStatus::Completed)
            | (InstanceStatus::Running, InstanceStatus::Failed)
            | (InstanceStatus::Running, InstanceStatus::Cancelled)
            | (InstanceStatus::Suspended, InstanceStatus::Running)
            | (InstanceStatus::Suspended, InstanceStatus::Failed)
            | (InstanceStatus::Suspended, InstanceStatus::Cancelled)
    )
}

/// Validate a transition, returning an error if invalid.
pub fn validate_transition(
    from: InstanceStatus,
    to: InstanceStatus,
) -> Result<(), ExecutionError> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(ExecutionError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
