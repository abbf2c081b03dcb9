use super::config::CoordinatorConfig;
use super::error::Result;
use super::manager::TaskManager;
use super::watcher::Watcher;
use crate::core::TaskState;
use crate::storage::TaskStore;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Resolves durable cancel requests for pipelines running in this process.
///
/// A request whose task runs elsewhere is left untouched for the owning
/// instance. Requests older than the abandonment timeout, or pointing at a
/// task that no longer exists, are dropped by whichever instance sees them.
pub struct CancelWatcher<S: TaskStore> {
    manager: Arc<TaskManager<S>>,
    batch_size: usize,
    timeout: Duration,
    grace_period: Duration,
}

impl<S: TaskStore + 'static> CancelWatcher<S> {
    pub fn new(manager: Arc<TaskManager<S>>, config: &CoordinatorConfig) -> Self {
        Self {
            manager,
            batch_size: config.cancel_batch_size,
            timeout: config.cancel_timeout,
            grace_period: config.cancel_grace_period,
        }
    }
}

#[async_trait]
impl<S: TaskStore + 'static> Watcher for CancelWatcher<S> {
    fn name(&self) -> &'static str {
        "cancel watcher"
    }

    async fn tick(&self) -> Result<usize> {
        let store = self.manager.store();
        let registry = self.manager.registry();
        let mut tick = store.begin().await?;
        let requests = tick.claim_cancel_requests(self.batch_size).await?;
        let now = Utc::now();
        let mut resolved = 0;
        let mut owned = Vec::new();

        for request in requests {
            let task_id = request.task_id;

            let Some(task) = store.get_task(task_id).await? else {
                info!("Dropping cancel request for missing task {}", task_id);
                tick.delete_cancel_request(task_id).await?;
                resolved += 1;
                continue;
            };

            if request.is_abandoned(now, self.timeout) {
                warn!(
                    "Cancel request for task {} abandoned after {:?} without an owner",
                    task_id, self.timeout
                );
                tick.delete_cancel_request(task_id).await?;
                resolved += 1;
                continue;
            }

            let Some(handle) = registry.get(task_id) else {
                debug!(
                    "Task {} is not running on instance {}",
                    task_id,
                    self.manager.instance_id()
                );
                continue;
            };

            handle.cancel();
            owned.push((task, handle));
        }

        // One grace period covers every pipeline signalled above.
        let deadline = Instant::now() + self.grace_period;
        for (task, handle) in owned {
            let task_id = task.id;
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !handle.wait_finished(remaining).await {
                warn!(
                    "Task {} still running after {:?} grace period, compensating anyway",
                    task_id, self.grace_period
                );
            }

            // the pipeline may have advanced while we waited
            let task = store.get_task(task_id).await?.unwrap_or(task);
            if task.is_completed() {
                info!("Task {} completed before it could be cancelled", task_id);
            } else {
                if task.state == TaskState::Planned {
                    self.manager.release_unstarted(&task).await?;
                } else {
                    self.manager.compensate(&task).await?;
                }
                tick.record_handled_error(task_id).await?;
            }

            tick.delete_cancel_request(task_id).await?;
            registry.remove(task_id);
            resolved += 1;
            info!("Cancelled task {}", task_id);
        }

        tick.commit().await?;
        Ok(resolved)
    }
}
