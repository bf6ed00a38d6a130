//! In-memory repository implementations.
//!
//! Default backends for tests and single-process deployments. Records are
//! stored serialized, so everything that reaches a production backend has
//! proven it survives the wire format.

use async_trait::async_trait;
use dashmap::DashMap;
use strand_core::{InstanceId, TaskKey};
use strand_execution::{AsyncStepState, InstanceStatus, WorkflowInstance};

use crate::error::StorageError;
use crate::repository::{AsyncStateRepository, StateRepository};

/// In-memory [`StateRepository`] with optimistic concurrency control.
#[derive(Debug, Default)]
pub struct InMemoryStateRepository {
    /// instance id → (stored version, serialized record)
    records: DashMap<InstanceId, (u64, String)>,
}

impl InMemoryStateRepository {
    /// Create an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if no instances are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl StateRepository for InMemoryStateRepository {
    async fn save(&self, instance: &WorkflowInstance) -> Result<u64, StorageError> {
        let serialized = serde_json::to_string(instance)?;
        // The entry guard serializes concurrent writers to the same id.
        let mut entry = self
            .records
            .entry(instance.instance_id)
            .or_insert((0, String::new()));
        let (stored_version, stored_json) = entry.value_mut();
        if !stored_json.is_empty() && instance.version <= *stored_version {
            return Err(StorageError::VersionConflict {
                incoming: instance.version,
                stored: *stored_version,
            });
        }
        *stored_version = instance.version;
        *stored_json = serialized;
        Ok(instance.version)
    }

    async fn load(&self, instance_id: InstanceId) -> Result<WorkflowInstance, StorageError> {
        let entry = self
            .records
            .get(&instance_id)
            .ok_or(StorageError::InstanceNotFound(instance_id))?;
        Ok(serde_json::from_str(&entry.value().1)?)
    }

    async fn list_by_status(
        &self,
        status: InstanceStatus,
    ) -> Result<Vec<WorkflowInstance>, StorageError> {
        let mut result = Vec::new();
        for entry in &self.records {
            let instance: WorkflowInstance = serde_json::from_str(&entry.value().1)?;
            if instance.status == status {
                result.push(instance);
            }
        }
        Ok(result)
    }
}

/// In-memory [`AsyncStateRepository`].
#[derive(Debug, Default)]
pub struct InMemoryAsyncStateRepository {
    records: DashMap<TaskKey, String>,
}

impl InMemoryAsyncStateRepository {
    /// Create an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AsyncStateRepository for InMemoryAsyncStateRepository {
    async fn save(&self, state: &AsyncStepState) -> Result<(), StorageError> {
        let serialized = serde_json::to_string(state)?;
        self.records.insert(state.task_id.clone(), serialized);
        Ok(())
    }

    async fn load(&self, task_id: &TaskKey) -> Result<AsyncStepState, StorageError> {
        let entry = self
            .records
            .get(task_id)
            .ok_or_else(|| StorageError::TaskNotFound(task_id.clone()))?;
        Ok(serde_json::from_str(entry.value())?)
    }

    async fn list_by_instance(
        &self,
        instance_id: InstanceId,
    ) -> Result<Vec<AsyncStepState>, StorageError> {
        let mut result = Vec::new();
        for entry in &self.records {
            let state: AsyncStepState = serde_json::from_str(entry.value())?;
            if state.instance_id == instance_id {
                result.push(state);
            }
        }
        result.sort_by_key(|s| s.created_at);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strand_core::{StepKey, WorkflowKey};

    fn make_instance() -> WorkflowInstance {
        WorkflowInstance::new(
            InstanceId::v4(),
            WorkflowKey::new("wf").unwrap(),
            StepKey::new("start").unwrap(),
            json!(1),
        )
    }

    #[tokio::test]
    async fn save_and_load_roundtrip() {
        let repo = InMemoryStateRepository::new();
        let instance = make_instance();
        repo.save(&instance).await.unwrap();

        let loaded = repo.load(instance.instance_id).await.unwrap();
        assert_eq!(loaded.instance_id, instance.instance_id);
        assert_eq!(loaded.status, instance.status);
        assert_eq!(loaded.context.trigger_data(), &json!(1));
    }

    #[tokio::test]
    async fn load_missing_instance_fails() {
        let repo = InMemoryStateRepository::new();
        let err = repo.load(InstanceId::v4()).await.unwrap_err();
        assert!(matches!(err, StorageError::InstanceNotFound(_)));
    }

    #[tokio::test]
    async fn stale_write_is_rejected() {
        let repo = InMemoryStateRepository::new();
        let mut instance = make_instance();
        repo.save(&instance).await.unwrap();

        // Simulate two writers loading the same version: the first bumps
        // and saves, the second's unbumped write must be rejected.
        let stale = instance.clone();
        instance.advance_to(StepKey::new("next").unwrap());
        repo.save(&instance).await.unwrap();

        let err = repo.save(&stale).await.unwrap_err();
        assert!(matches!(err, StorageError::VersionConflict { .. }));
    }

    #[tokio::test]
    async fn newer_version_overwrites() {
        let repo = InMemoryStateRepository::new();
        let mut instance = make_instance();
        repo.save(&instance).await.unwrap();

        instance.advance_to(StepKey::new("double").unwrap());
        let stored = repo.save(&instance).await.unwrap();
        assert_eq!(stored, instance.version);

        let loaded = repo.load(instance.instance_id).await.unwrap();
        assert_eq!(loaded.current_step, StepKey::new("double").unwrap());
    }

    #[tokio::test]
    async fn list_by_status_filters() {
        let repo = InMemoryStateRepository::new();
        let running = make_instance();
        let mut completed = make_instance();
        completed.complete(json!(9)).unwrap();

        repo.save(&running).await.unwrap();
        repo.save(&completed).await.unwrap();

        let running_list = repo.list_by_status(InstanceStatus::Running).await.unwrap();
        assert_eq!(running_list.len(), 1);
        assert_eq!(running_list[0].instance_id, running.instance_id);

        let done_list = repo.list_by_status(InstanceStatus::Completed).await.unwrap();
        assert_eq!(done_list.len(), 1);

        let failed_list = repo.list_by_status(InstanceStatus::Failed).await.unwrap();
        assert!(failed_list.is_empty());
    }

    #[tokio::test]
    async fn async_state_roundtrip() {
        let repo = InMemoryAsyncStateRepository::new();
        let task_id = TaskKey::new("t1").unwrap();
        let mut state = AsyncStepState::new(
            task_id.clone(),
            InstanceId::v4(),
            StepKey::new("long_task").unwrap(),
            json!({"started": true}),
        );
        repo.save(&state).await.unwrap();

        state.mark_completed(json!(99));
        repo.save(&state).await.unwrap();

        let loaded = repo.load(&task_id).await.unwrap();
        assert_eq!(loaded.result, Some(json!(99)));
    }

    #[tokio::test]
    async fn async_state_missing_task_fails() {
        let repo = InMemoryAsyncStateRepository::new();
        let err = repo.load(&TaskKey::new("nope").unwrap()).await.unwrap_err();
        assert!(matches!(err, StorageError::TaskNotFound(_)));
    }

    #[tokio::test]
    async fn list_by_instance_filters_and_orders() {
        let repo = InMemoryAsyncStateRepository::new();
        let instance_id = InstanceId::v4();

        let first = AsyncStepState::new(
            TaskKey::new("t1").unwrap(),
            instance_id,
            StepKey::new("a").unwrap(),
            json!(null),
        );
        let second = AsyncStepState::new(
            TaskKey::new("t2").unwrap(),
            instance_id,
            StepKey::new("b").unwrap(),
            json!(null),
        );
        let other = AsyncStepState::new(
            TaskKey::new("t3").unwrap(),
            InstanceId::v4(),
            StepKey::new("c").unwrap(),
            json!(null),
        );

        repo.save(&first).await.unwrap();
        repo.save(&second).await.unwrap();
        repo.save(&other).await.unwrap();

        let listed = repo.list_by_instance(instance_id).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].created_at <= listed[1].created_at);
    }
}
