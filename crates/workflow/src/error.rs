//! Graph construction errors.

use strand_core::StepKey;
use thiserror::Error;

/// Errors raised while building a workflow graph.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Two steps were registered under the same id.
    #[error("duplicate step id: {0}")]
    DuplicateStep(StepKey),

    /// An edge or branch target references a step that does not exist.
    #[error("unknown step '{step}' referenced by {referenced_by}")]
    UnknownStep {
        /// The missing step id.
        step: StepKey,
        /// What referenced it ("edge from …", "branch target …", "initial step").
        referenced_by: String,
    },

    /// No initial step was declared.
    #[error("no initial step declared")]
    MissingInitialStep,

    /// A default (unconditional) edge is followed by further edges.
    #[error("default edge from '{step}' must be declared last")]
    DefaultEdgeNotLast {
        /// The step whose edge list is malformed.
        step: StepKey,
    },

    /// A step cannot be reached from the initial step.
    #[error("step '{0}' is unreachable from the initial step")]
    UnreachableStep(StepKey),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_step_display() {
        let err = GraphError::DuplicateStep(StepKey::new("double").unwrap());
        assert_eq!(err.to_string(), "duplicate step id: double");
    }

    #[test]
    fn unknown_step_display() {
        let err = GraphError::UnknownStep {
            step: StepKey::new("ghost").unwrap(),
            referenced_by: "edge from 'start'".into(),
        };
        assert!(err.to_string().contains("ghost"));
        assert!(err.to_string().contains("edge from 'start'"));
    }

    #[test]
    fn unreachable_step_display() {
        let err = GraphError::UnreachableStep(StepKey::new("island").unwrap());
        assert!(err.to_string().contains("unreachable"));
    }
}
