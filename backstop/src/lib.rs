//! Backstop: durable lifecycle and recovery coordinator for backup tasks
//!
//! `backstop` turns a long-running, failure-prone backup operation (create,
//! restore or delete) into a durably tracked task that survives crashes, can
//! be cancelled from any cooperating process, is never run twice by two
//! instances sharing one database, and is compensated according to the step
//! it failed at. Recurring backups fire once per due interval across a fleet
//! of identical processes, with no coordination service beyond the database.
//!
//! # Features
//!
//! - **Forward-only state machine**: every task type has a fixed pipeline
//!   and the manager rejects any other transition
//! - **Decoupled recovery**: failures land in an error registry and are
//!   compensated by whichever instance claims them
//! - **Cross-process cancellation**: durable cancel requests resolved by the
//!   instance that holds the live handle
//! - **Skip-locked claims**: watchers on many instances share work through
//!   `FOR UPDATE SKIP LOCKED` style row claims
//!
//! # Quick Start
//!
//! ```no_run
//! use backstop::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example(database: Arc<dyn DatabaseBackupService>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let store = Arc::new(PostgresTaskStore::new("postgres://localhost/backstop").await?);
//! let storage = LocalFileSystemStorage::new().with_root("local", "/var/backups");
//!
//! let handle = Coordinator::new(store, Services::new(database, Arc::new(storage))).start();
//!
//! let task_id = handle
//!     .manager()
//!     .start_create_backup("orders", vec!["local".to_string()], vec![], RunKind::User)
//!     .await?;
//! println!("Started backup task {}", task_id);
//!
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Module Organization
//!
//! - [`core`]: domain types and the per-type transition table
//! - [`storage`]: durable stores and the skip-locked unit of work
//! - [`executor`]: lifecycle manager, pipelines and watchers
//! - [`services`]: collaborator contracts and a local file system connector

pub mod core;
pub mod executor;
pub mod services;
pub mod storage;

pub use core::{
    backup_name, BackupProperties, CoreError, PlannedState, PlannedTask, Result as CoreResult,
    RunKind, Task, TaskState, TaskType,
};

pub use executor::{
    CancelWatcher, Compensation, Coordinator, CoordinatorConfig, CoordinatorHandle, ErrorWatcher,
    ExecutionError, ExecutionHandle, LocalExecutionRegistry, PlannedFireWatcher,
    PlannedReconcileWatcher, Result as ExecutionResult, TaskManager, Watcher,
};

pub use services::{
    BoxError, ByteStream, DatabaseBackupService, LocalFileSystemStorage, PassthroughProcessors,
    ProcessorPipeline, ServiceError, Services, StorageService,
};

pub use storage::{
    CancelRequest, ErrorEntry, InMemoryTaskStore, Result as StorageResult, StorageError,
    TaskStore, UnitOfWork,
};

#[cfg(feature = "postgres")]
pub use storage::{PoolConfig, PostgresTaskStore};

// Re-export dependencies used in public API
pub use chrono;
pub use uuid;

/// Prelude module for convenient glob imports
///
/// # Example
///
/// ```
/// use backstop::prelude::*;
/// ```
pub mod prelude {
    pub use crate::core::{BackupProperties, PlannedTask, RunKind, Task, TaskState, TaskType};

    pub use crate::executor::{
        Compensation, Coordinator, CoordinatorConfig, CoordinatorHandle, ExecutionError,
        TaskManager,
    };

    pub use crate::services::{
        ByteStream, DatabaseBackupService, LocalFileSystemStorage, ProcessorPipeline, Services,
        StorageService,
    };

    pub use crate::storage::{InMemoryTaskStore, TaskStore, UnitOfWork};

    #[cfg(feature = "postgres")]
    pub use crate::storage::PostgresTaskStore;
}
