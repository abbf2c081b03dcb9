//! Task lifecycle manager: creation, forward-only advancement, error
//! marking and compensation.

use super::config::CoordinatorConfig;
use super::error::{ExecutionError, Result};
use super::pipeline::Job;
use super::registry::LocalExecutionRegistry;
use crate::core::{BackupProperties, PlannedTask, RunKind, Task, TaskState, TaskType};
use crate::services::Services;
use crate::storage::TaskStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// What compensating an abandoned task did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compensation {
    /// The task left nothing durable behind.
    Noop,
    /// Only the backup identity reservation existed and it was removed.
    ReservationRemoved,
    /// Data may have reached storage: a `DeleteBackup` task was started for
    /// it and the reservation was removed.
    DeletionScheduled { delete_task_id: Uuid },
    /// The task cannot be compensated automatically and was left as is.
    ManualInspection,
}

fn require_storage_targets(database_ref: &str, storage_refs: &[String]) -> Result<()> {
    if storage_refs.is_empty() {
        return Err(ExecutionError::NoStorageTargets {
            database_ref: database_ref.to_string(),
        });
    }
    Ok(())
}

/// A task row plus the work it will run, not yet queued.
///
/// Produced inside a watcher tick and launched once the tick has committed.
pub(crate) struct PreparedTask {
    pub(crate) task: Task,
    pub(crate) job: Job,
}

impl PreparedTask {
    pub fn task_id(&self) -> Uuid {
        self.task.id
    }
}

/// Creates, advances and compensates tasks, and runs their pipelines on a
/// bounded worker pool.
///
/// One manager exists per coordinator instance. It is shared as
/// `Arc<TaskManager<S>>` by the watchers and by whatever front end starts
/// tasks.
pub struct TaskManager<S: TaskStore> {
    pub(crate) store: Arc<S>,
    pub(crate) services: Services,
    pub(crate) registry: LocalExecutionRegistry,
    pub(crate) workers: Arc<Semaphore>,
    tracker: TaskTracker,
    instance_id: String,
}

impl<S: TaskStore + 'static> TaskManager<S> {
    pub fn new(store: Arc<S>, services: Services, config: &CoordinatorConfig) -> Self {
        Self {
            store,
            services,
            registry: LocalExecutionRegistry::new(),
            workers: Arc::new(Semaphore::new(config.max_concurrent_tasks.max(1))),
            tracker: TaskTracker::new(),
            instance_id: config.instance_id.clone(),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn registry(&self) -> &LocalExecutionRegistry {
        &self.registry
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Number of pipelines queued or running in this process.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    // ===== Lifecycle primitives =====

    /// Inserts a new `Planned` task.
    pub async fn create_task(
        &self,
        task_type: TaskType,
        run_kind: RunKind,
        backup_id: Uuid,
    ) -> Result<Task> {
        let task = Task::new(task_type, run_kind, backup_id);
        self.store.insert_task(&task).await?;
        debug!(
            "Instance {} created {} task {} for backup {}",
            self.instance_id, task.task_type, task.id, backup_id
        );
        Ok(task)
    }

    /// Moves a task one step forward along its pipeline.
    ///
    /// Fails with [`ExecutionError::IllegalTransition`] if `next` is not the
    /// step right after the current state, or if another writer changed the
    /// state between the read and the write.
    pub async fn advance(&self, task_id: Uuid, next: TaskState) -> Result<()> {
        let task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or(ExecutionError::TaskNotFound(task_id))?;

        let illegal = ExecutionError::IllegalTransition {
            task_id,
            from: task.state,
            to: next,
        };

        if !TaskState::can_advance(task.task_type, task.state, next) {
            return Err(illegal);
        }
        if !self.store.update_task_state(task_id, task.state, next).await? {
            return Err(illegal);
        }

        debug!("Task {} advanced {} -> {}", task_id, task.state, next);
        Ok(())
    }

    /// Flags a task erroneous. Returns true if this call created the entry.
    pub async fn mark_erroneous(&self, task_id: Uuid) -> Result<bool> {
        Ok(self.store.mark_erroneous(task_id).await?)
    }

    /// Undoes whatever durable effect `task` had, based on the state it
    /// was abandoned in.
    ///
    /// Storage failures propagate so the calling watcher tick rolls back.
    /// A failure of the compensating delete itself is not observed here: it
    /// runs as an ordinary `DeleteBackup` pipeline.
    pub async fn compensate(self: &Arc<Self>, task: &Task) -> Result<Compensation> {
        let outcome = match task.state {
            TaskState::Downloading
            | TaskState::ApplyingDeprocessors
            | TaskState::Restoring
            | TaskState::Deleting => Compensation::Noop,

            TaskState::Creating | TaskState::ApplyingProcessors => {
                if !self.store.delete_backup(task.backup_id).await? {
                    debug!(
                        "Reservation {} of task {} was already gone",
                        task.backup_id, task.id
                    );
                }
                Compensation::ReservationRemoved
            }

            TaskState::Uploading => match self.store.get_backup(task.backup_id).await? {
                Some(backup) => {
                    let backup_id = backup.id;
                    let prepared = self.prepare_delete(backup, RunKind::System).await?;
                    let delete_task_id = prepared.task_id();
                    self.launch(prepared);

                    self.store.delete_backup(backup_id).await?;
                    Compensation::DeletionScheduled { delete_task_id }
                }
                None => {
                    error!(
                        "Task {} abandoned while uploading but reservation {} is missing; leaving it for manual inspection",
                        task.id, task.backup_id
                    );
                    Compensation::ManualInspection
                }
            },

            TaskState::Planned | TaskState::Completed => {
                error!(
                    "Task {} cannot be compensated from state {}; leaving it for manual inspection",
                    task.id, task.state
                );
                Compensation::ManualInspection
            }
        };

        info!("Compensated task {} ({}): {:?}", task.id, task.state, outcome);
        Ok(outcome)
    }

    /// Undoes a task that was cancelled before its pipeline took a step.
    ///
    /// Only a `CreateBackup` owns anything at that point: the reservation
    /// made when it was queued.
    pub(crate) async fn release_unstarted(&self, task: &Task) -> Result<Compensation> {
        let outcome = match task.task_type {
            TaskType::CreateBackup => {
                self.store.delete_backup(task.backup_id).await?;
                Compensation::ReservationRemoved
            }
            TaskType::RestoreBackup | TaskType::DeleteBackup => Compensation::Noop,
        };
        info!("Released unstarted task {}: {:?}", task.id, outcome);
        Ok(outcome)
    }

    // ===== Initiation =====

    /// Reserves a backup identity and queues a `CreateBackup` pipeline
    /// uploading to every storage in `storage_refs`.
    pub async fn start_create_backup(
        self: &Arc<Self>,
        database_ref: &str,
        storage_refs: Vec<String>,
        processors: Vec<String>,
        run_kind: RunKind,
    ) -> Result<Uuid> {
        let prepared = self
            .prepare_create(database_ref, storage_refs, processors, run_kind)
            .await?;
        let task_id = prepared.task_id();
        self.launch(prepared);
        Ok(task_id)
    }

    /// Queues a `RestoreBackup` pipeline reading the backup from one storage.
    pub async fn start_restore_backup(
        self: &Arc<Self>,
        backup_id: Uuid,
        storage_ref: &str,
        database_ref: &str,
        run_kind: RunKind,
    ) -> Result<Uuid> {
        let backup = self.require_backup(backup_id).await?;
        let task = self
            .create_task(TaskType::RestoreBackup, run_kind, backup_id)
            .await?;
        let task_id = task.id;

        self.launch(PreparedTask {
            task,
            job: Job::Restore {
                backup,
                storage_ref: storage_ref.to_string(),
                database_ref: database_ref.to_string(),
            },
        });
        Ok(task_id)
    }

    /// Queues a `DeleteBackup` pipeline removing the backup from every
    /// storage it was written to.
    pub async fn start_delete_backup(
        self: &Arc<Self>,
        backup_id: Uuid,
        run_kind: RunKind,
    ) -> Result<Uuid> {
        let backup = self.require_backup(backup_id).await?;
        let prepared = self.prepare_delete(backup, run_kind).await?;
        let task_id = prepared.task_id();
        self.launch(prepared);
        Ok(task_id)
    }

    /// Records a durable cancel request. Whichever instance runs the task
    /// picks it up on its next cancel watcher tick.
    pub async fn request_cancel(&self, task_id: Uuid) -> Result<()> {
        if self.store.get_task(task_id).await?.is_none() {
            return Err(ExecutionError::TaskNotFound(task_id));
        }
        self.store.request_cancel(task_id, Utc::now()).await?;
        info!("Cancel requested for task {}", task_id);
        Ok(())
    }

    pub(crate) async fn prepare_create(
        &self,
        database_ref: &str,
        storage_refs: Vec<String>,
        processors: Vec<String>,
        run_kind: RunKind,
    ) -> Result<PreparedTask> {
        require_storage_targets(database_ref, &storage_refs)?;
        let backup = BackupProperties::new(database_ref, storage_refs, processors);
        self.store.reserve_backup(&backup).await?;
        let task = self
            .create_task(TaskType::CreateBackup, run_kind, backup.id)
            .await?;
        Ok(PreparedTask {
            task,
            job: Job::Create(backup),
        })
    }

    async fn prepare_delete(
        &self,
        backup: BackupProperties,
        run_kind: RunKind,
    ) -> Result<PreparedTask> {
        let task = self
            .create_task(TaskType::DeleteBackup, run_kind, backup.id)
            .await?;
        Ok(PreparedTask {
            task,
            job: Job::Delete(backup),
        })
    }

    async fn require_backup(&self, backup_id: Uuid) -> Result<BackupProperties> {
        self.store
            .get_backup(backup_id)
            .await?
            .ok_or(ExecutionError::BackupNotFound(backup_id))
    }

    /// Registers a local handle for the task and queues its pipeline.
    ///
    /// The handle exists from this point on, so a task still waiting for a
    /// worker permit can already be cancelled.
    pub(crate) fn launch(self: &Arc<Self>, prepared: PreparedTask) {
        let PreparedTask { task, job } = prepared;
        let handle = self.registry.register(task.id);
        let span = info_span!(
            "task_pipeline",
            task.id = %task.id,
            task.task_type = %task.task_type,
            instance = %self.instance_id
        );

        let manager = Arc::clone(self);
        self.tracker
            .spawn(async move { manager.run_pipeline(task, job, handle).await }.instrument(span));
    }

    /// Stops accepting pipelines and waits for the queued ones to finish.
    pub(crate) async fn drain(&self) {
        self.tracker.close();
        let in_flight = self.tracker.len();
        if in_flight > 0 {
            info!(
                "Instance {} waiting for {} in-flight pipelines",
                self.instance_id, in_flight
            );
        }
        self.tracker.wait().await;
    }

    // ===== Queries and administration =====

    pub async fn get_task(&self, task_id: Uuid) -> Result<Option<Task>> {
        Ok(self.store.get_task(task_id).await?)
    }

    /// Lists tasks newest first, optionally only those of one run kind.
    pub async fn list_tasks(&self, run_kind: Option<RunKind>) -> Result<Vec<Task>> {
        let tasks = match run_kind {
            Some(run_kind) => self.store.list_tasks_by_run_kind(run_kind).await?,
            None => self.store.list_tasks().await?,
        };
        Ok(tasks)
    }

    /// Deletes a task row. Refused while an error entry or a cancel request
    /// still references the task.
    pub async fn remove_task(&self, task_id: Uuid) -> Result<bool> {
        Ok(self.store.delete_task(task_id).await?)
    }

    /// Registers a recurring backup. Its first run is one interval away.
    pub async fn add_planned_task(
        &self,
        database_ref: &str,
        storage_refs: Vec<String>,
        processors: Vec<String>,
        interval: Duration,
    ) -> Result<PlannedTask> {
        require_storage_targets(database_ref, &storage_refs)?;
        let planned = PlannedTask::new(database_ref, storage_refs, processors, interval);
        self.store.insert_planned_task(&planned).await?;
        info!(
            "Planned backup {} of {} every {:?}",
            planned.id, planned.database_ref, interval
        );
        Ok(planned)
    }

    pub async fn remove_planned_task(&self, planned_id: Uuid) -> Result<()> {
        if !self.store.delete_planned_task(planned_id).await? {
            return Err(ExecutionError::PlannedTaskNotFound(planned_id));
        }
        Ok(())
    }

    pub async fn list_planned_tasks(&self) -> Result<Vec<PlannedTask>> {
        Ok(self.store.list_planned_tasks().await?)
    }

    pub async fn list_backups(&self) -> Result<Vec<BackupProperties>> {
        Ok(self.store.list_backups().await?)
    }

    /// Records a failed pipeline. A storage failure here is only logged:
    /// the pipeline has no caller to report to.
    pub(crate) async fn record_failure(&self, task_id: Uuid, cause: &ExecutionError) {
        warn!("Task {} failed: {}", task_id, cause);
        match self.store.mark_erroneous(task_id).await {
            Ok(_) => {}
            Err(e) => error!("Failed to mark task {} erroneous: {}", task_id, e),
        }
    }
}
