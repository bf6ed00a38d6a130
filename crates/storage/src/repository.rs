//! Repository traits for durable engine state.

use async_trait::async_trait;
use strand_core::{InstanceId, TaskKey};
use strand_execution::{AsyncStepState, InstanceStatus, WorkflowInstance};

use crate::error::StorageError;

/// Durable storage of workflow instances.
///
/// Implementations must provide per-record atomicity and serialize
/// concurrent writes to the same instance: a save whose version is not
/// newer than the stored version is rejected with
/// [`StorageError::VersionConflict`]. Instance methods bump the version on
/// every state change, so a writer that loaded a stale record loses.
#[async_trait]
pub trait StateRepository: Send + Sync {
    /// Persist an instance, returning the stored version.
    async fn save(&self, instance: &WorkflowInstance) -> Result<u64, StorageError>;

    /// Load an instance by id.
    async fn load(&self, instance_id: InstanceId) -> Result<WorkflowInstance, StorageError>;

    /// All instances currently in the given status.
    async fn list_by_status(
        &self,
        status: InstanceStatus,
    ) -> Result<Vec<WorkflowInstance>, StorageError>;
}

/// Durable storage of async step task state.
#[async_trait]
pub trait AsyncStateRepository: Send + Sync {
    /// Persist (upsert) a task record.
    async fn save(&self, state: &AsyncStepState) -> Result<(), StorageError>;

    /// Load a task record by id.
    async fn load(&self, task_id: &TaskKey) -> Result<AsyncStepState, StorageError>;

    /// All task records belonging to an instance, oldest first.
    async fn list_by_instance(
        &self,
        instance_id: InstanceId,
    ) -> Result<Vec<AsyncStepState>, StorageError>;
}
