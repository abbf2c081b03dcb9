use crate::core::TaskState;
use crate::services::BoxError;
use crate::storage::StorageError;
use thiserror::Error;
use uuid::Uuid;

/// Execution layer error type for the backstop task coordinator.
///
/// Wraps storage failures and adds the lifecycle-specific failures a
/// pipeline or a watcher tick can run into.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExecutionError {
    /// A storage operation failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A collaborator (database, storage back-end, processor) failed.
    #[error("service call failed: {0}")]
    Service(String),

    /// The task's cancellation token fired while a step was running.
    #[error("task was cancelled")]
    Cancelled,

    /// The requested state change is not the next step of the task's
    /// pipeline, or another writer moved the task first.
    #[error("illegal transition for task {task_id}: {from} -> {to}")]
    IllegalTransition {
        task_id: Uuid,
        from: TaskState,
        to: TaskState,
    },

    #[error("task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("backup not found: {0}")]
    BackupNotFound(Uuid),

    #[error("planned task not found: {0}")]
    PlannedTaskNotFound(Uuid),

    /// A backup was requested without any storage to write it to.
    #[error("backup of {database_ref} names no storage")]
    NoStorageTargets { database_ref: String },
}

impl From<BoxError> for ExecutionError {
    fn from(e: BoxError) -> Self {
        ExecutionError::Service(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ExecutionError>;
