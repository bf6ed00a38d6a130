//! Storage error types.

use strand_core::{InstanceId, TaskKey};
use thiserror::Error;

/// Errors raised by state repositories.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No instance with the given id.
    #[error("instance not found: {0}")]
    InstanceNotFound(InstanceId),

    /// No async task state with the given id.
    #[error("async task not found: {0}")]
    TaskNotFound(TaskKey),

    /// A stale write was rejected by optimistic concurrency control.
    #[error("version conflict: write with version {incoming} against stored version {stored}")]
    VersionConflict {
        /// Version carried by the rejected write.
        incoming: u64,
        /// Version currently stored.
        stored: u64,
    },

    /// A record failed to serialize or deserialize.
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_not_found_display() {
        let id = InstanceId::v4();
        let err = StorageError::InstanceNotFound(id);
        assert!(err.to_string().contains("instance not found"));
    }

    #[test]
    fn version_conflict_display() {
        let err = StorageError::VersionConflict {
            incoming: 3,
            stored: 5,
        };
        assert!(err.to_string().contains("version 3"));
        assert!(err.to_string().contains("version 5"));
    }

    #[test]
    fn task_not_found_display() {
        let err = StorageError::TaskNotFound(TaskKey::new("t1").unwrap());
        assert!(err.to_string().contains("t1"));
    }
}
