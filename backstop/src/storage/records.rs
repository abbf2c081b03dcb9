//! Rows of the error registry and the cancel request queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// "Task flagged erroneous, compensation done?"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub task_id: Uuid,
    pub handled: bool,
}

impl ErrorEntry {
    pub fn new(task_id: Uuid) -> Self {
        Self {
            task_id,
            handled: false,
        }
    }
}

/// Durable request to cancel a task, wherever it happens to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelRequest {
    pub task_id: Uuid,
    pub requested_at: DateTime<Utc>,
}

impl CancelRequest {
    pub fn new(task_id: Uuid, requested_at: DateTime<Utc>) -> Self {
        Self {
            task_id,
            requested_at,
        }
    }

    /// Returns true once the request is older than `timeout` at `now`.
    pub fn is_abandoned(&self, now: DateTime<Utc>, timeout: std::time::Duration) -> bool {
        match chrono::Duration::from_std(timeout) {
            Ok(timeout) => now.signed_duration_since(self.requested_at) > timeout,
            Err(_) => false,
        }
    }
}
