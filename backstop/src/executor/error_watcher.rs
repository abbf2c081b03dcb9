use super::config::CoordinatorConfig;
use super::error::Result;
use super::manager::TaskManager;
use super::watcher::Watcher;
use crate::storage::TaskStore;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Compensates tasks flagged in the error registry.
///
/// Each tick claims a bounded batch of unhandled entries, compensates the
/// task behind each one and marks it handled, all in one unit of work. A
/// failure anywhere rolls the batch back so the entries are claimed again
/// by a later tick on any instance.
pub struct ErrorWatcher<S: TaskStore> {
    manager: Arc<TaskManager<S>>,
    batch_size: usize,
}

impl<S: TaskStore + 'static> ErrorWatcher<S> {
    pub fn new(manager: Arc<TaskManager<S>>, config: &CoordinatorConfig) -> Self {
        Self {
            manager,
            batch_size: config.error_batch_size,
        }
    }
}

#[async_trait]
impl<S: TaskStore + 'static> Watcher for ErrorWatcher<S> {
    fn name(&self) -> &'static str {
        "error watcher"
    }

    async fn tick(&self) -> Result<usize> {
        let store = self.manager.store();
        let mut tick = store.begin().await?;
        let claimed = tick.claim_unhandled_errors(self.batch_size).await?;

        for entry in &claimed {
            match store.get_task(entry.task_id).await? {
                Some(task) => {
                    self.manager.compensate(&task).await?;
                }
                None => info!(
                    "Erroneous task {} no longer exists, marking handled",
                    entry.task_id
                ),
            }
            tick.set_error_handled(entry.task_id).await?;
        }

        tick.commit().await?;
        if !claimed.is_empty() {
            info!(
                "Instance {} handled {} error entries",
                self.manager.instance_id(),
                claimed.len()
            );
        }
        Ok(claimed.len())
    }
}
