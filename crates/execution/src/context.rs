//! Durable per-instance context.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strand_core::{FINAL_RESULT, StepKey};

use crate::error::ExecutionError;

/// The durable, serializable context of a workflow instance.
///
/// Holds the ordered record of step outputs, a typed key-value store, and
/// the trigger data the instance was started with. Mutated only by the
/// engine between steps; steps observe a read-consistent snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowContext {
    /// Last output per step, in execution order (insertion-ordered for
    /// debugging; keyed access for reads).
    step_outputs: IndexMap<StepKey, Value>,
    /// Typed key-value store. Reserved keys include the final-result and
    /// async-future keys.
    values: HashMap<String, Value>,
    /// The input the workflow was started with.
    trigger_data: Value,
}

impl WorkflowContext {
    /// Create a context from the workflow's trigger data.
    #[must_use]
    pub fn new(trigger_data: Value) -> Self {
        Self {
            step_outputs: IndexMap::new(),
            values: HashMap::new(),
            trigger_data,
        }
    }

    /// The input the workflow was started with.
    #[must_use]
    pub fn trigger_data(&self) -> &Value {
        &self.trigger_data
    }

    /// Record a step's output. Re-execution of a step (loops, retries
    /// after resume) overwrites its previous output in place.
    pub fn set_step_output(&mut self, step: StepKey, output: Value) {
        self.step_outputs.insert(step, output);
    }

    /// A step's last recorded output.
    #[must_use]
    pub fn step_output(&self, step: &StepKey) -> Option<&Value> {
        self.step_outputs.get(step)
    }

    /// Step ids in the order they first produced output.
    #[must_use]
    pub fn executed_steps(&self) -> Vec<StepKey> {
        self.step_outputs.keys().cloned().collect()
    }

    /// Set a context value.
    pub fn set_value(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    /// A raw context value.
    #[must_use]
    pub fn value(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// A typed context value. A present value of the wrong shape is an
    /// error, never a silent cast.
    pub fn get_value<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ExecutionError> {
        match self.values.get(key) {
            None => Ok(None),
            Some(value) => serde_json::from_value(value.clone()).map(Some).map_err(|e| {
                ExecutionError::TypeMismatch {
                    key: key.to_string(),
                    message: e.to_string(),
                }
            }),
        }
    }

    /// Store the workflow's terminal result.
    pub fn set_final_result(&mut self, result: Value) {
        self.values.insert(FINAL_RESULT.to_string(), result);
    }

    /// The workflow's terminal result, if finished.
    #[must_use]
    pub fn final_result(&self) -> Option<&Value> {
        self.values.get(FINAL_RESULT)
    }

    /// Snapshot of outputs and values for a step's read-consistent view.
    #[must_use]
    pub fn snapshot(&self) -> (IndexMap<StepKey, Value>, HashMap<String, Value>) {
        (self.step_outputs.clone(), self.values.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(s: &str) -> StepKey {
        StepKey::new(s).unwrap()
    }

    #[test]
    fn new_context_holds_trigger_data() {
        let ctx = WorkflowContext::new(json!(3));
        assert_eq!(ctx.trigger_data(), &json!(3));
        assert!(ctx.executed_steps().is_empty());
        assert!(ctx.final_result().is_none());
    }

    #[test]
    fn step_outputs_preserve_insertion_order() {
        let mut ctx = WorkflowContext::new(Value::Null);
        ctx.set_step_output(key("double"), json!(6));
        ctx.set_step_output(key("finish"), json!(7));

        assert_eq!(ctx.executed_steps(), vec![key("double"), key("finish")]);
        assert_eq!(ctx.step_output(&key("double")), Some(&json!(6)));
    }

    #[test]
    fn re_executed_step_overwrites_in_place() {
        let mut ctx = WorkflowContext::new(Value::Null);
        ctx.set_step_output(key("a"), json!(1));
        ctx.set_step_output(key("b"), json!(2));
        ctx.set_step_output(key("a"), json!(10));

        assert_eq!(ctx.step_output(&key("a")), Some(&json!(10)));
        assert_eq!(ctx.executed_steps(), vec![key("a"), key("b")]);
    }

    #[test]
    fn typed_value_roundtrip() {
        let mut ctx = WorkflowContext::new(Value::Null);
        ctx.set_value("retries", json!(4));

        let retries: Option<u32> = ctx.get_value("retries").unwrap();
        assert_eq!(retries, Some(4));
    }

    #[test]
    fn typed_value_rejects_wrong_shape() {
        let mut ctx = WorkflowContext::new(Value::Null);
        ctx.set_value("retries", json!("four"));

        let err = ctx.get_value::<u32>("retries").unwrap_err();
        assert!(matches!(err, ExecutionError::TypeMismatch { .. }));
    }

    #[test]
    fn missing_typed_value_is_none() {
        let ctx = WorkflowContext::new(Value::Null);
        let missing: Option<String> = ctx.get_value("missing").unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn final_result_uses_reserved_key() {
        let mut ctx = WorkflowContext::new(Value::Null);
        ctx.set_final_result(json!(7));
        assert_eq!(ctx.final_result(), Some(&json!(7)));
        assert_eq!(ctx.value(FINAL_RESULT), Some(&json!(7)));
    }

    #[test]
    fn snapshot_is_independent_of_later_mutation() {
        let mut ctx = WorkflowContext::new(Value::Null);
        ctx.set_step_output(key("a"), json!(1));
        let (outputs, values) = ctx.snapshot();

        ctx.set_step_output(key("b"), json!(2));
        ctx.set_value("k", json!(true));

        assert_eq!(outputs.len(), 1);
        assert!(values.is_empty());
    }

    #[test]
    fn serde_roundtrip_preserves_order() {
        let mut ctx = WorkflowContext::new(json!({"q": 1}));
        ctx.set_step_output(key("first"), json!(1));
        ctx.set_step_output(key("second"), json!(2));
        ctx.set_value("lang", json!("en"));

        let json = serde_json::to_string(&ctx).unwrap();
        let back: WorkflowContext = serde_json::from_str(&json).unwrap();
        assert_eq!(back.executed_steps(), vec![key("first"), key("second")]);
        assert_eq!(back.value("lang"), Some(&json!("en")));
        assert_eq!(back.trigger_data(), &json!({"q": 1}));
    }
}
