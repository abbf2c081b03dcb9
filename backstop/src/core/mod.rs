//! Core domain types for the backstop task coordinator.
//!
//! # Domain Model
//! - [`Task`]: one tracked create, restore or delete operation
//! - [`TaskState`]: forward-only progress marker, validated per [`TaskType`]
//! - [`PlannedTask`]: durable template for a recurring backup
//! - [`BackupProperties`]: the reserved identity of a backup
//!
//! # Error Handling
//! - [`CoreError`]: raised when persisted values cannot be parsed back
//!
//! # Example
//!
//! ```
//! use backstop::core::{RunKind, Task, TaskState, TaskType};
//! use uuid::Uuid;
//!
//! let task = Task::new(TaskType::DeleteBackup, RunKind::User, Uuid::new_v4());
//! assert!(TaskState::can_advance(task.task_type, task.state, TaskState::Deleting));
//! ```

mod backup;
mod error;
mod planned;
mod task;

pub use backup::{backup_name, BackupProperties};
pub use error::{CoreError, Result};
pub use planned::{PlannedState, PlannedTask};
pub use task::{RunKind, Task, TaskState, TaskType};
