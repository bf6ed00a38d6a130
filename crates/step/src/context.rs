//! Per-invocation step context (non-serializable).

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use strand_core::{InstanceId, StepKey, WorkflowKey};
use tokio_util::sync::CancellationToken;

use crate::error::{StepError, codes};
use crate::retry::RetryContext;

/// Read-consistent view handed to a step for the duration of one invocation.
///
/// The view snapshots prior step outputs and context values at invocation
/// time; the engine applies the step's own output to the durable context
/// after the step returns. Handlers must not retain the context across
/// invocations.
#[derive(Debug, Clone)]
pub struct StepContext {
    instance_id: InstanceId,
    workflow_id: WorkflowKey,
    step_id: StepKey,
    trigger_data: Arc<Value>,
    step_outputs: Arc<IndexMap<StepKey, Value>>,
    values: Arc<HashMap<String, Value>>,
    original_input: Option<Arc<Value>>,
    retry: Option<Arc<RetryContext>>,
    cancellation: CancellationToken,
}

impl StepContext {
    /// Create a context for one step invocation.
    #[must_use]
    pub fn new(instance_id: InstanceId, workflow_id: WorkflowKey, step_id: StepKey) -> Self {
        Self {
            instance_id,
            workflow_id,
            step_id,
            trigger_data: Arc::new(Value::Null),
            step_outputs: Arc::new(IndexMap::new()),
            values: Arc::new(HashMap::new()),
            original_input: None,
            retry: None,
            cancellation: CancellationToken::new(),
        }
    }

    /// Attach the workflow's initial trigger data.
    #[must_use]
    pub fn with_trigger_data(mut self, data: Value) -> Self {
        self.trigger_data = Arc::new(data);
        self
    }

    /// Attach a snapshot of prior step outputs and context values.
    #[must_use]
    pub fn with_snapshot(
        mut self,
        step_outputs: IndexMap<StepKey, Value>,
        values: HashMap<String, Value>,
    ) -> Self {
        self.step_outputs = Arc::new(step_outputs);
        self.values = Arc::new(values);
        self
    }

    /// Attach the preserved upstream input (resume re-entry only).
    #[must_use]
    pub fn with_original_input(mut self, input: Value) -> Self {
        self.original_input = Some(Arc::new(input));
        self
    }

    /// Attach retry information (attempt two and later).
    #[must_use]
    pub fn with_retry(mut self, retry: RetryContext) -> Self {
        self.retry = Some(Arc::new(retry));
        self
    }

    /// Attach the instance's cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// The instance this invocation belongs to.
    #[must_use]
    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    /// The workflow being executed.
    #[must_use]
    pub fn workflow_id(&self) -> &WorkflowKey {
        &self.workflow_id
    }

    /// The step being invoked.
    #[must_use]
    pub fn step_id(&self) -> &StepKey {
        &self.step_id
    }

    /// The input the workflow was started with.
    #[must_use]
    pub fn trigger_data(&self) -> &Value {
        &self.trigger_data
    }

    /// Output previously recorded for the given step, if any.
    #[must_use]
    pub fn step_output(&self, step_id: &StepKey) -> Option<&Value> {
        self.step_outputs.get(step_id)
    }

    /// A raw context value by key.
    #[must_use]
    pub fn value(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// A typed context value by key.
    ///
    /// Deserializes through serde; a present value of the wrong shape is an
    /// error, never a silent cast.
    pub fn typed_value<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StepError> {
        match self.values.get(key) {
            None => Ok(None),
            Some(value) => serde_json::from_value(value.clone()).map(Some).map_err(|e| {
                StepError::new(
                    codes::TYPE_MISMATCH,
                    format!("context value '{key}': {e}"),
                )
            }),
        }
    }

    /// The upstream input preserved across suspension, when re-entering.
    #[must_use]
    pub fn original_input(&self) -> Option<&Value> {
        self.original_input.as_deref()
    }

    /// Returns `true` if this invocation re-enters a suspended step.
    #[must_use]
    pub fn is_resume(&self) -> bool {
        self.original_input.is_some()
    }

    /// Retry state, present from the second attempt onward.
    #[must_use]
    pub fn retry(&self) -> Option<&RetryContext> {
        self.retry.as_deref()
    }

    /// The instance's cancellation token.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Fail fast if cancellation has been requested.
    pub fn check_cancelled(&self) -> Result<(), StepError> {
        if self.cancellation.is_cancelled() {
            Err(StepError::cancelled())
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_context() -> StepContext {
        StepContext::new(
            InstanceId::v4(),
            WorkflowKey::new("wf").unwrap(),
            StepKey::new("greet").unwrap(),
        )
    }

    #[test]
    fn new_context_is_empty() {
        let ctx = test_context();
        assert_eq!(ctx.trigger_data(), &Value::Null);
        assert!(ctx.value("anything").is_none());
        assert!(!ctx.is_resume());
        assert!(ctx.retry().is_none());
    }

    #[test]
    fn snapshot_exposes_outputs_and_values() {
        let ask = StepKey::new("ask").unwrap();
        let mut outputs = IndexMap::new();
        outputs.insert(ask.clone(), json!(42));
        let mut values = HashMap::new();
        values.insert("lang".to_string(), json!("en"));

        let ctx = test_context().with_snapshot(outputs, values);
        assert_eq!(ctx.step_output(&ask), Some(&json!(42)));
        assert_eq!(ctx.value("lang"), Some(&json!("en")));
    }

    #[test]
    fn typed_value_deserializes() {
        let mut values = HashMap::new();
        values.insert("count".to_string(), json!(3));
        let ctx = test_context().with_snapshot(IndexMap::new(), values);

        let count: Option<u32> = ctx.typed_value("count").unwrap();
        assert_eq!(count, Some(3));
    }

    #[test]
    fn typed_value_rejects_wrong_shape() {
        let mut values = HashMap::new();
        values.insert("count".to_string(), json!("three"));
        let ctx = test_context().with_snapshot(IndexMap::new(), values);

        let err = ctx.typed_value::<u32>("count").unwrap_err();
        assert_eq!(err.code(), codes::TYPE_MISMATCH);
    }

    #[test]
    fn typed_value_missing_is_none() {
        let ctx = test_context();
        let missing: Option<String> = ctx.typed_value("missing").unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn original_input_marks_resume() {
        let ctx = test_context().with_original_input(json!(42));
        assert!(ctx.is_resume());
        assert_eq!(ctx.original_input(), Some(&json!(42)));
    }

    #[test]
    fn check_cancelled_after_cancel() {
        let token = CancellationToken::new();
        let ctx = test_context().with_cancellation(token.clone());
        assert!(ctx.check_cancelled().is_ok());

        token.cancel();
        let err = ctx.check_cancelled().unwrap_err();
        assert_eq!(err.code(), codes::CANCELLED);
    }
}
