//! Step sequences run for each task type.
//!
//! Every step advances the durable state first and then performs the
//! external call, raced against the task's cancellation token. A failure
//! marks the task erroneous and stops; compensation is left to whichever
//! instance's error watcher claims the entry.

use super::error::{ExecutionError, Result};
use super::manager::TaskManager;
use super::registry::ExecutionHandle;
use crate::core::{BackupProperties, Task, TaskState};
use crate::services::{BoxError, ByteStream, StorageService};
use crate::storage::TaskStore;
use futures::future::{try_join, try_join_all};
use std::future::Future;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Work queued for a task.
pub(crate) enum Job {
    Create(BackupProperties),
    Restore {
        backup: BackupProperties,
        storage_ref: String,
        database_ref: String,
    },
    Delete(BackupProperties),
}

/// Runs `call` unless the token fires first.
async fn step<T, F>(token: &CancellationToken, call: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, BoxError>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(ExecutionError::Cancelled),
        result = call => result.map_err(ExecutionError::from),
    }
}

/// Pipe capacity and copy chunk size when one dump feeds several storages.
const FAN_OUT_CHUNK: usize = 64 * 1024;

/// Streams `source` into every storage at once.
///
/// Each storage reads from its own in-memory pipe; the copy loop writes each
/// chunk to all pipes before reading the next, so at most one chunk per
/// storage is buffered. The slowest storage sets the pace.
async fn upload_to_all(
    storage: &dyn StorageService,
    mut source: ByteStream,
    storage_refs: &[String],
    backup_name: &str,
) -> std::result::Result<(), BoxError> {
    let mut writers = Vec::with_capacity(storage_refs.len());
    let mut uploads = Vec::with_capacity(storage_refs.len());
    for storage_ref in storage_refs {
        let (writer, reader) = tokio::io::duplex(FAN_OUT_CHUNK);
        writers.push(writer);
        uploads.push(storage.upload(Box::pin(reader), storage_ref, backup_name));
    }

    let feed = async move {
        let mut buf = vec![0u8; FAN_OUT_CHUNK];
        loop {
            let n = source.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            for writer in writers.iter_mut() {
                writer.write_all(&buf[..n]).await?;
            }
        }
        for mut writer in writers {
            writer.shutdown().await?;
        }
        Ok::<(), BoxError>(())
    };

    try_join(feed, try_join_all(uploads)).await?;
    Ok(())
}

impl<S: TaskStore + 'static> TaskManager<S> {
    pub(crate) async fn run_pipeline(self: Arc<Self>, task: Task, job: Job, handle: ExecutionHandle) {
        let _finished = handle.finished_guard();
        let token = handle.cancellation_token().clone();

        let permit = tokio::select! {
            biased;
            _ = token.cancelled() => {
                info!("Task {} cancelled before it started", task.id);
                return;
            }
            permit = Arc::clone(&self.workers).acquire_owned() => permit,
        };
        let _permit = match permit {
            Ok(permit) => permit,
            Err(_) => {
                error!("Worker pool closed, task {} not run", task.id);
                let cause = ExecutionError::Service("worker pool closed".to_string());
                self.record_failure(task.id, &cause).await;
                self.registry.remove(task.id);
                return;
            }
        };

        info!("Task {} started", task.id);
        let result = match job {
            Job::Create(backup) => self.run_create(&task, &backup, &token).await,
            Job::Restore {
                backup,
                storage_ref,
                database_ref,
            } => {
                self.run_restore(&task, &backup, &storage_ref, &database_ref, &token)
                    .await
            }
            Job::Delete(backup) => self.run_delete(&task, &backup, &token).await,
        };

        match result {
            Ok(()) => {
                info!("Task {} completed", task.id);
                self.registry.remove(task.id);
            }
            // The cancel watcher holding this handle compensates and cleans up.
            Err(ExecutionError::Cancelled) => {
                info!("Task {} stopped on cancellation", task.id);
            }
            Err(e) => {
                self.record_failure(task.id, &e).await;
                self.registry.remove(task.id);
            }
        }
    }

    async fn enter(&self, task: &Task, next: TaskState, token: &CancellationToken) -> Result<()> {
        if token.is_cancelled() {
            return Err(ExecutionError::Cancelled);
        }
        self.advance(task.id, next).await
    }

    async fn run_create(
        &self,
        task: &Task,
        backup: &BackupProperties,
        token: &CancellationToken,
    ) -> Result<()> {
        let services = &self.services;

        self.enter(task, TaskState::Creating, token).await?;
        let dump = step(token, services.database.create_dump(&backup.database_ref)).await?;

        self.enter(task, TaskState::ApplyingProcessors, token).await?;
        let processed = services.processors.apply(dump, &backup.processors)?;

        self.enter(task, TaskState::Uploading, token).await?;
        match backup.storage_refs.as_slice() {
            [single] => {
                step(token, services.storage.upload(processed, single, &backup.name)).await?;
            }
            storage_refs => {
                let uploads = upload_to_all(
                    services.storage.as_ref(),
                    processed,
                    storage_refs,
                    &backup.name,
                );
                step(token, uploads).await?;
                debug!(
                    "Task {} uploaded to {} storages",
                    task.id,
                    storage_refs.len()
                );
            }
        }

        self.enter(task, TaskState::Completed, token).await
    }

    async fn run_restore(
        &self,
        task: &Task,
        backup: &BackupProperties,
        storage_ref: &str,
        database_ref: &str,
        token: &CancellationToken,
    ) -> Result<()> {
        let services = &self.services;

        self.enter(task, TaskState::Downloading, token).await?;
        let stored = step(token, services.storage.download(storage_ref, &backup.name)).await?;

        self.enter(task, TaskState::ApplyingDeprocessors, token).await?;
        let dump = services.processors.unapply(stored, &backup.processors)?;

        self.enter(task, TaskState::Restoring, token).await?;
        step(token, services.database.restore_dump(dump, database_ref)).await?;

        self.enter(task, TaskState::Completed, token).await
    }

    async fn run_delete(
        &self,
        task: &Task,
        backup: &BackupProperties,
        token: &CancellationToken,
    ) -> Result<()> {
        self.enter(task, TaskState::Deleting, token).await?;
        for storage_ref in &backup.storage_refs {
            step(token, self.services.storage.delete(storage_ref, &backup.name)).await?;
        }

        self.enter(task, TaskState::Completed, token).await?;
        if let Err(e) = self.store.delete_backup(backup.id).await {
            warn!(
                "Task {} deleted backup {} but kept its reservation: {}",
                task.id, backup.id, e
            );
        }
        Ok(())
    }
}
