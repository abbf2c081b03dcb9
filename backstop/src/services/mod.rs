//! Collaborators the coordinator drives but does not own.
//!
//! The lifecycle manager only sequences these calls and records their
//! outcome; producing a dump, moving bytes to a storage back-end and
//! transforming the stream in between are delegated to the traits here.
//! Any `Err` returned by a collaborator fails the running pipeline step.
//!
//! - [`DatabaseBackupService`]: dumps and restores one database
//! - [`StorageService`]: stores backups under a name on a storage back-end
//! - [`ProcessorPipeline`]: reversible stream transforms (e.g. compression)
//!
//! [`LocalFileSystemStorage`] and [`PassthroughProcessors`] are ready-made
//! implementations for local deployments and tests.

use async_trait::async_trait;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncRead;

pub mod filesystem;

pub use filesystem::LocalFileSystemStorage;

/// Error type returned by collaborators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Backup bytes in flight between collaborators.
pub type ByteStream = Pin<Box<dyn AsyncRead + Send>>;

/// Errors raised by the bundled collaborator implementations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServiceError {
    /// No root directory or connector is configured for this storage ref.
    #[error("unknown storage: {0}")]
    UnknownStorage(String),

    /// A backup with this name already exists on the storage.
    #[error("backup {0} already exists")]
    AlreadyExists(String),

    /// No backup with this name exists on the storage.
    #[error("backup {0} not found")]
    BackupNotFound(String),

    #[error("unknown processor: {0}")]
    UnknownProcessor(String),

    #[error("I/O error")]
    Io(#[from] std::io::Error),
}

/// Creates and restores dumps of a database.
#[async_trait]
pub trait DatabaseBackupService: Send + Sync {
    /// Starts a dump of `database_ref` and returns its bytes.
    async fn create_dump(&self, database_ref: &str) -> Result<ByteStream, BoxError>;

    /// Replays `dump` into `database_ref`.
    async fn restore_dump(&self, dump: ByteStream, database_ref: &str) -> Result<(), BoxError>;
}

/// Stores backups on one or more storage back-ends, addressed by ref.
#[async_trait]
pub trait StorageService: Send + Sync {
    async fn upload(
        &self,
        data: ByteStream,
        storage_ref: &str,
        backup_name: &str,
    ) -> Result<(), BoxError>;

    async fn download(&self, storage_ref: &str, backup_name: &str) -> Result<ByteStream, BoxError>;

    /// Removes a backup. Must succeed when the backup is already gone or was
    /// only partially uploaded, so compensation can re-issue it freely.
    async fn delete(&self, storage_ref: &str, backup_name: &str) -> Result<(), BoxError>;
}

/// Reversible stream transforms applied between dump and upload.
///
/// Both directions are pure wrappers around the stream; no state is kept
/// between calls. `unapply` receives the same processor list that `apply`
/// got and must undo it.
pub trait ProcessorPipeline: Send + Sync {
    fn apply(&self, data: ByteStream, processors: &[String]) -> Result<ByteStream, BoxError>;

    fn unapply(&self, data: ByteStream, processors: &[String]) -> Result<ByteStream, BoxError>;
}

/// Pipeline that knows no processors.
///
/// An empty list passes the stream through untouched. Naming any processor
/// fails, so a backup is never silently stored without the transform it
/// asked for.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughProcessors;

impl PassthroughProcessors {
    fn check(processors: &[String]) -> Result<(), BoxError> {
        match processors.first() {
            Some(name) => Err(ServiceError::UnknownProcessor(name.clone()).into()),
            None => Ok(()),
        }
    }
}

impl ProcessorPipeline for PassthroughProcessors {
    fn apply(&self, data: ByteStream, processors: &[String]) -> Result<ByteStream, BoxError> {
        Self::check(processors)?;
        Ok(data)
    }

    fn unapply(&self, data: ByteStream, processors: &[String]) -> Result<ByteStream, BoxError> {
        Self::check(processors)?;
        Ok(data)
    }
}

/// The collaborators a coordinator instance works with.
#[derive(Clone)]
pub struct Services {
    pub database: Arc<dyn DatabaseBackupService>,
    pub storage: Arc<dyn StorageService>,
    pub processors: Arc<dyn ProcessorPipeline>,
}

impl Services {
    /// Bundles the given database and storage services with
    /// [`PassthroughProcessors`].
    pub fn new(
        database: Arc<dyn DatabaseBackupService>,
        storage: Arc<dyn StorageService>,
    ) -> Self {
        Self {
            database,
            storage,
            processors: Arc::new(PassthroughProcessors),
        }
    }

    pub fn with_processors(mut self, processors: Arc<dyn ProcessorPipeline>) -> Self {
        self.processors = processors;
        self
    }
}
