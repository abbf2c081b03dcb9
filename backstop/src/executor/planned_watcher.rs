//! The planned-task watcher pair.
//!
//! The fire loop claims `Waiting` rows and the reconcile loop claims
//! `Executing` rows. The two buckets are disjoint, so the loops never wait
//! on each other's locks.

use super::config::CoordinatorConfig;
use super::error::Result;
use super::manager::TaskManager;
use super::watcher::Watcher;
use crate::core::{PlannedState, RunKind, TaskState};
use crate::storage::TaskStore;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

/// Starts a `CreateBackup` task for every due planned task.
///
/// `last_started_at` is left alone here; the reconcile loop moves it once
/// the handler task has completed.
pub struct PlannedFireWatcher<S: TaskStore> {
    manager: Arc<TaskManager<S>>,
    batch_size: usize,
}

impl<S: TaskStore + 'static> PlannedFireWatcher<S> {
    pub fn new(manager: Arc<TaskManager<S>>, config: &CoordinatorConfig) -> Self {
        Self {
            manager,
            batch_size: config.planned_batch_size,
        }
    }
}

#[async_trait]
impl<S: TaskStore + 'static> Watcher for PlannedFireWatcher<S> {
    fn name(&self) -> &'static str {
        "planned fire watcher"
    }

    async fn tick(&self) -> Result<usize> {
        let mut tick = self.manager.store().begin().await?;
        let claimed = tick
            .claim_planned_tasks(PlannedState::Waiting, self.batch_size)
            .await?;
        let now = Utc::now();
        let mut fired = Vec::new();

        for mut planned in claimed {
            if !planned.is_due(now) {
                continue;
            }

            let prepared = self
                .manager
                .prepare_create(
                    &planned.database_ref,
                    planned.storage_refs.clone(),
                    planned.processors.clone(),
                    RunKind::System,
                )
                .await?;
            planned.fire(prepared.task_id());
            tick.update_planned_task(&planned).await?;

            info!(
                "Planned task {} fired handler task {}",
                planned.id,
                prepared.task_id()
            );
            fired.push(prepared);
        }

        // Pipelines only start once the Executing rows are durable.
        tick.commit().await?;

        let count = fired.len();
        for prepared in fired {
            self.manager.launch(prepared);
        }
        Ok(count)
    }
}

/// Returns executing planned tasks to `Waiting` once their handler task
/// has completed, failed or vanished.
pub struct PlannedReconcileWatcher<S: TaskStore> {
    manager: Arc<TaskManager<S>>,
    batch_size: usize,
}

impl<S: TaskStore + 'static> PlannedReconcileWatcher<S> {
    pub fn new(manager: Arc<TaskManager<S>>, config: &CoordinatorConfig) -> Self {
        Self {
            manager,
            batch_size: config.planned_batch_size,
        }
    }
}

#[async_trait]
impl<S: TaskStore + 'static> Watcher for PlannedReconcileWatcher<S> {
    fn name(&self) -> &'static str {
        "planned reconcile watcher"
    }

    async fn tick(&self) -> Result<usize> {
        let store = self.manager.store();
        let mut tick = store.begin().await?;
        let claimed = tick
            .claim_planned_tasks(PlannedState::Executing, self.batch_size)
            .await?;
        let mut reset = 0;

        for mut planned in claimed {
            let Some(handler_id) = planned.handler_task_id else {
                warn!(
                    "Planned task {} was executing without a handler, resetting",
                    planned.id
                );
                planned.reset();
                tick.update_planned_task(&planned).await?;
                reset += 1;
                continue;
            };

            match store.get_task(handler_id).await? {
                None => {
                    warn!(
                        "Handler task {} of planned task {} is gone, resetting",
                        handler_id, planned.id
                    );
                    planned.reset();
                }
                Some(handler) if handler.erroneous => {
                    info!(
                        "Handler task {} of planned task {} failed, will retry on next fire",
                        handler_id, planned.id
                    );
                    planned.reset();
                }
                Some(handler) if handler.state == TaskState::Completed => {
                    planned.last_started_at = Utc::now();
                    planned.reset();
                    info!("Planned task {} completed a run", planned.id);
                }
                Some(_) => continue,
            }

            tick.update_planned_task(&planned).await?;
            reset += 1;
        }

        tick.commit().await?;
        Ok(reset)
    }
}
