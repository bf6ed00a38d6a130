//! Durable suspension state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strand_core::StepKey;
use strand_step::ValueKind;

/// Everything needed to resume a suspended instance.
///
/// Suspension is data, not a captured call stack: the suspended step is
/// re-invoked by name with the resume payload, and the upstream input it
/// originally received is preserved here so re-entry sees the same data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspensionData {
    /// The step that suspended; resume re-enters it.
    pub suspended_step: StepKey,
    /// Prompt surfaced to whoever supplies the resume input.
    pub prompt: String,
    /// Arbitrary metadata recorded at suspension time.
    pub metadata: Value,
    /// The upstream input the step received before suspending.
    pub original_input: Value,
    /// Runtime kind of `original_input`.
    pub original_input_kind: ValueKind,
    /// Runtime kind the resume payload must satisfy.
    pub resume_input_kind: ValueKind,
    /// When the instance suspended.
    pub suspended_at: DateTime<Utc>,
}

impl SuspensionData {
    /// Create suspension data for a step.
    #[must_use]
    pub fn new(
        suspended_step: StepKey,
        prompt: impl Into<String>,
        original_input: Value,
        resume_input_kind: ValueKind,
    ) -> Self {
        let original_input_kind = ValueKind::of(&original_input);
        Self {
            suspended_step,
            prompt: prompt.into(),
            metadata: Value::Null,
            original_input,
            original_input_kind,
            resume_input_kind,
            suspended_at: Utc::now(),
        }
    }

    /// Attach metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Returns `true` if `payload` satisfies the declared resume kind.
    #[must_use]
    pub fn accepts_resume_input(&self, payload: &Value) -> bool {
        self.resume_input_kind.matches(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data() -> SuspensionData {
        SuspensionData::new(
            StepKey::new("ask").unwrap(),
            "name?",
            json!(42),
            ValueKind::String,
        )
    }

    #[test]
    fn records_original_input_and_kind() {
        let suspension = data();
        assert_eq!(suspension.original_input, json!(42));
        assert_eq!(suspension.original_input_kind, ValueKind::Integer);
        assert_eq!(suspension.prompt, "name?");
    }

    #[test]
    fn accepts_matching_resume_input() {
        let suspension = data();
        assert!(suspension.accepts_resume_input(&json!("Ada")));
        assert!(!suspension.accepts_resume_input(&json!(7)));
        assert!(!suspension.accepts_resume_input(&json!(null)));
    }

    #[test]
    fn metadata_builder() {
        let suspension = data().with_metadata(json!({"channel": "chat"}));
        assert_eq!(suspension.metadata, json!({"channel": "chat"}));
    }

    #[test]
    fn serde_roundtrip() {
        let suspension = data().with_metadata(json!({"k": 1}));
        let json = serde_json::to_string(&suspension).unwrap();
        let back: SuspensionData = serde_json::from_str(&json).unwrap();
        assert_eq!(back.suspended_step, suspension.suspended_step);
        assert_eq!(back.original_input, json!(42));
        assert_eq!(back.resume_input_kind, ValueKind::String);
    }
}
