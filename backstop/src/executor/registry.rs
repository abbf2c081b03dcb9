//! Process-local map of running pipelines.
//!
//! A handle exists only in the process that started the pipeline. Other
//! instances learn about cancellation through the durable cancel request
//! queue and consult their own registry to decide whether the task is
//! theirs.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::{CancellationToken, DropGuard};
use uuid::Uuid;

/// Cancellable reference to a pipeline running in this process.
#[derive(Debug, Clone)]
pub struct ExecutionHandle {
    cancel: CancellationToken,
    finished: CancellationToken,
}

impl ExecutionHandle {
    fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            finished: CancellationToken::new(),
        }
    }

    /// Asks the pipeline to stop at its next await point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_cancelled()
    }

    /// Waits up to `grace` for the pipeline to exit.
    ///
    /// Returns false if it was still running when the grace period ran out.
    pub async fn wait_finished(&self, grace: Duration) -> bool {
        tokio::time::timeout(grace, self.finished.cancelled())
            .await
            .is_ok()
    }

    pub(crate) fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Marks the pipeline finished when the returned guard is dropped.
    pub(crate) fn finished_guard(&self) -> DropGuard {
        self.finished.clone().drop_guard()
    }
}

/// Task id to [`ExecutionHandle`] for this process only.
///
/// Cloning yields a view of the same map.
#[derive(Debug, Clone, Default)]
pub struct LocalExecutionRegistry {
    handles: Arc<DashMap<Uuid, ExecutionHandle>>,
}

impl LocalExecutionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates and stores a fresh handle for `task_id`.
    pub(crate) fn register(&self, task_id: Uuid) -> ExecutionHandle {
        let handle = ExecutionHandle::new();
        self.handles.insert(task_id, handle.clone());
        handle
    }

    pub fn get(&self, task_id: Uuid) -> Option<ExecutionHandle> {
        self.handles.get(&task_id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, task_id: Uuid) -> Option<ExecutionHandle> {
        self.handles.remove(&task_id).map(|(_, handle)| handle)
    }

    pub fn contains(&self, task_id: Uuid) -> bool {
        self.handles.contains_key(&task_id)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
