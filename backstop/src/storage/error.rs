use crate::core::CoreError;
use thiserror::Error;
use uuid::Uuid;

/// Storage layer error type for the backstop task coordinator.
///
/// This error type wraps underlying database and serialization errors
/// while preserving the full error chain for debugging.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// A database operation failed.
    #[cfg(feature = "postgres")]
    #[error("database operation failed")]
    Database(#[from] sqlx::Error),

    /// Failed to establish or configure a database connection.
    #[error("connection error: {0}")]
    Connection(String),

    /// A persisted enum value could not be parsed.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// A JSON-encoded column could not be encoded or decoded.
    #[error("serialization failed")]
    Serialization(#[from] serde_json::Error),

    /// A row holds a value that cannot be mapped onto the domain model.
    #[error("corrupted row: {0}")]
    Corrupted(String),

    /// The task is still referenced by an error entry or a cancel request.
    #[error("task {0} is still referenced by an error entry or cancel request")]
    TaskReferenced(Uuid),
}

pub type Result<T> = std::result::Result<T, StorageError>;
