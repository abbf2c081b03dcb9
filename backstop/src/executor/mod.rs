//! Task execution and recovery.
//!
//! - [`TaskManager`]: creates tasks, advances them along their pipeline,
//!   marks failures and compensates abandoned tasks
//! - [`LocalExecutionRegistry`]: cancellable handles of the pipelines
//!   running in this process
//! - [`ErrorWatcher`], [`CancelWatcher`], [`PlannedFireWatcher`],
//!   [`PlannedReconcileWatcher`]: periodic loops, one unit of work per tick
//! - [`Coordinator`]: wires the above together and runs the watchers
//!
//! A pipeline never compensates its own failure. It records the failure in
//! the error registry and stops; the error watcher of any instance picks it
//! up from there. That way compensation still happens when the process that
//! ran the pipeline is gone.

// Module organization:
// - manager / pipeline: lifecycle primitives and the step sequences
// - registry: process-local handles, never shared between instances
// - watcher: fixed-delay driver shared by the four watchers
mod cancel_watcher;
mod config;
mod coordinator;
mod error;
mod error_watcher;
mod manager;
mod pipeline;
mod planned_watcher;
mod registry;
mod watcher;

pub use cancel_watcher::CancelWatcher;
pub use config::CoordinatorConfig;
pub use coordinator::{Coordinator, CoordinatorHandle};
pub use error::{ExecutionError, Result};
pub use error_watcher::ErrorWatcher;
pub use manager::{Compensation, TaskManager};
pub use planned_watcher::{PlannedFireWatcher, PlannedReconcileWatcher};
pub use registry::{ExecutionHandle, LocalExecutionRegistry};
pub use watcher::Watcher;
