//! Storage layer for the backstop task coordinator.
//!
//! This module provides a trait-based interface over the four durable
//! stores the coordinator shares between instances (tasks, error registry,
//! cancel requests, planned tasks) plus backup identity reservations:
//!
//! - [`PostgresTaskStore`]: PostgreSQL storage with connection pooling and
//!   `FOR UPDATE SKIP LOCKED` claims
//! - [`InMemoryTaskStore`]: in-process storage for tests and development,
//!   emulating row locks so several coordinators can share it
//!
//! Watchers never read-modify-write the shared stores directly. Each tick
//! opens a [`UnitOfWork`], claims a bounded batch of rows that no other unit
//! of work holds, and commits or rolls back as a whole.
//!
//! # Example
//!
//! ```no_run
//! use backstop::storage::{InMemoryTaskStore, TaskStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = InMemoryTaskStore::new();
//! let mut tick = store.begin().await?;
//! let claimed = tick.claim_unhandled_errors(10).await?;
//! for entry in claimed {
//!     tick.set_error_handled(entry.task_id).await?;
//! }
//! tick.commit().await?;
//! # Ok(())
//! # }
//! ```

use crate::core::{BackupProperties, PlannedState, PlannedTask, RunKind, Task, TaskState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

mod error;
mod records;

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use error::{Result, StorageError};
pub use memory::InMemoryTaskStore;
pub use records::{CancelRequest, ErrorEntry};

#[cfg(feature = "postgres")]
pub use postgres::{PoolConfig, PostgresTaskStore};

/// Durable state shared by every coordinator instance.
///
/// Implementations must be safe to call from many tasks and processes at
/// once. Methods outside [`UnitOfWork`] are single-statement operations that
/// commit immediately.
#[async_trait]
pub trait TaskStore: Send + Sync {
    // ===== Tasks =====

    /// Inserts a new task row.
    async fn insert_task(&self, task: &Task) -> Result<()>;

    /// Fetches a task, with `erroneous` derived from the error registry.
    async fn get_task(&self, id: Uuid) -> Result<Option<Task>>;

    /// Returns all tasks, newest first.
    async fn list_tasks(&self) -> Result<Vec<Task>>;

    /// Returns all tasks of the given run kind, newest first.
    async fn list_tasks_by_run_kind(&self, run_kind: RunKind) -> Result<Vec<Task>>;

    /// Sets `state = to` if the task is currently in `from`.
    ///
    /// Returns false when the task is missing or was not in `from`.
    async fn update_task_state(&self, id: Uuid, from: TaskState, to: TaskState) -> Result<bool>;

    /// Deletes a task.
    ///
    /// Fails with [`StorageError::TaskReferenced`] while an error entry or a
    /// cancel request still points at it. Returns false if no row existed.
    async fn delete_task(&self, id: Uuid) -> Result<bool>;

    // ===== Error Registry =====

    /// Flags a task as erroneous. Inserting twice leaves a single entry.
    ///
    /// Returns true if this call created the entry.
    async fn mark_erroneous(&self, task_id: Uuid) -> Result<bool>;

    async fn get_error_entry(&self, task_id: Uuid) -> Result<Option<ErrorEntry>>;

    // ===== Cancel Requests =====

    /// Queues a cancel request. A second request for the same task keeps
    /// the first `requested_at`.
    async fn request_cancel(&self, task_id: Uuid, requested_at: DateTime<Utc>) -> Result<()>;

    async fn list_cancel_requests(&self) -> Result<Vec<CancelRequest>>;

    // ===== Planned Tasks =====

    async fn insert_planned_task(&self, planned: &PlannedTask) -> Result<()>;

    async fn get_planned_task(&self, id: Uuid) -> Result<Option<PlannedTask>>;

    async fn list_planned_tasks(&self) -> Result<Vec<PlannedTask>>;

    async fn delete_planned_task(&self, id: Uuid) -> Result<bool>;

    // ===== Backup Reservations =====

    async fn reserve_backup(&self, backup: &BackupProperties) -> Result<()>;

    async fn get_backup(&self, id: Uuid) -> Result<Option<BackupProperties>>;

    /// Returns all reserved backups, newest first.
    async fn list_backups(&self) -> Result<Vec<BackupProperties>>;

    /// Removes a reservation. Removing a missing reservation is not an error.
    async fn delete_backup(&self, id: Uuid) -> Result<bool>;

    // ===== Units of Work =====

    /// Opens a unit of work for one watcher tick.
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>>;
}

/// One watcher tick: a transaction holding row locks on claimed rows.
///
/// Claims lock up to `limit` matching rows and silently skip rows another
/// unit of work already holds; contention is never reported as an error.
/// Dropping a unit of work without committing rolls it back and releases
/// its locks, which is also what happens when the process dies mid-tick.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Claims error entries with `handled = false`.
    async fn claim_unhandled_errors(&mut self, limit: usize) -> Result<Vec<ErrorEntry>>;

    /// Marks a claimed error entry as handled.
    async fn set_error_handled(&mut self, task_id: Uuid) -> Result<()>;

    /// Inserts an error entry already marked handled, or marks an existing
    /// one handled.
    async fn record_handled_error(&mut self, task_id: Uuid) -> Result<()>;

    /// Claims outstanding cancel requests, oldest first.
    async fn claim_cancel_requests(&mut self, limit: usize) -> Result<Vec<CancelRequest>>;

    async fn delete_cancel_request(&mut self, task_id: Uuid) -> Result<()>;

    /// Claims planned tasks in `state`.
    async fn claim_planned_tasks(
        &mut self,
        state: PlannedState,
        limit: usize,
    ) -> Result<Vec<PlannedTask>>;

    /// Writes back a claimed planned task.
    async fn update_planned_task(&mut self, planned: &PlannedTask) -> Result<()>;

    /// Applies all writes and releases the locks.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discards all writes and releases the locks.
    async fn rollback(self: Box<Self>) -> Result<()>;
}
