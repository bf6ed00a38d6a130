//! String keys for workflows, steps and async tasks.
//!
//! Unlike the UUID identifiers in [`crate::id`], these are human-assigned
//! names ("classify", "deliver") declared when a workflow graph is built.
//! They are validated, interned string keys with `Display`, `FromStr`,
//! `Eq`, `Hash` and serde support.

pub use domain_key::KeyParseError;
use domain_key::{define_domain, key_type};

define_domain!(pub WorkflowDomain, "workflow");
key_type!(pub WorkflowKey, WorkflowDomain);

define_domain!(pub StepDomain, "step");
key_type!(pub StepKey, StepDomain);

define_domain!(pub TaskDomain, "task");
key_type!(pub TaskKey, TaskDomain);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_key_from_valid_name() {
        let key = StepKey::new("classify").unwrap();
        assert_eq!(key.to_string(), "classify");
    }

    #[test]
    fn workflow_key_parse() {
        let key: WorkflowKey = "order_pipeline".parse().unwrap();
        assert_eq!(key.to_string(), "order_pipeline");
    }

    #[test]
    fn task_key_equality_and_hash() {
        use std::collections::HashMap;
        let a = TaskKey::new("t1").unwrap();
        let b = TaskKey::new("t1").unwrap();
        assert_eq!(a, b);

        let mut map = HashMap::new();
        map.insert(a, 1);
        assert_eq!(map.get(&b), Some(&1));
    }

    #[test]
    fn key_serde_roundtrip() {
        let key = StepKey::new("deliver").unwrap();
        let json = serde_json::to_string(&key).unwrap();
        let back: StepKey = serde_json::from_str(&json).unwrap();
        assert_eq!(key, back);
    }

    #[test]
    fn different_key_types_are_incompatible() {
        // StepKey and WorkflowKey are distinct types — passing one where
        // the other is expected would be a compile error.
        fn accepts_step(_key: &StepKey) {}
        fn accepts_workflow(_key: &WorkflowKey) {}

        let step = StepKey::new("a").unwrap();
        let workflow = WorkflowKey::new("b").unwrap();
        accepts_step(&step);
        accepts_workflow(&workflow);
    }
}
