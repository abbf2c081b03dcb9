use super::{error::Result, CancelRequest, ErrorEntry, StorageError, TaskStore, UnitOfWork};
use crate::core::{BackupProperties, PlannedState, PlannedTask, RunKind, Task, TaskState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::trace;
use uuid::Uuid;

/// In-memory task store using DashMap for concurrent access.
///
/// Every table is a DashMap keyed by its primary key. Row locks taken by
/// units of work live in a separate lock table mapping the locked row to
/// the id of the unit of work holding it, which gives the same
/// skip-locked behaviour as `SELECT ... FOR UPDATE SKIP LOCKED`.
///
/// Cloning the store is cheap and yields a handle to the same tables, so
/// several coordinators in one process can share it to simulate a fleet of
/// instances polling one database. Nothing survives the process.
#[derive(Clone, Default)]
pub struct InMemoryTaskStore {
    inner: Arc<Tables>,
}

#[derive(Default)]
struct Tables {
    tasks: DashMap<Uuid, Task>,
    errors: DashMap<Uuid, ErrorEntry>,
    cancels: DashMap<Uuid, CancelRequest>,
    planned: DashMap<Uuid, PlannedTask>,
    backups: DashMap<Uuid, BackupProperties>,
    /// Locked row -> unit of work holding the lock
    locks: DashMap<RowKey, Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RowKey {
    Error(Uuid),
    Cancel(Uuid),
    Planned(Uuid),
}

impl InMemoryTaskStore {
    /// Creates a new, empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of rows currently locked by open units of work.
    pub fn locked_rows(&self) -> usize {
        self.inner.locks.len()
    }

    fn with_error_flag(&self, mut task: Task) -> Task {
        task.erroneous = self.inner.errors.contains_key(&task.id);
        task
    }

    fn sorted_newest_first(&self, mut tasks: Vec<Task>) -> Vec<Task> {
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks
            .into_iter()
            .map(|task| self.with_error_flag(task))
            .collect()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert_task(&self, task: &Task) -> Result<()> {
        let mut row = task.clone();
        row.erroneous = false;
        self.inner.tasks.insert(task.id, row);
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<Task>> {
        let task = self.inner.tasks.get(&id).map(|entry| entry.value().clone());
        Ok(task.map(|task| self.with_error_flag(task)))
    }

    async fn list_tasks(&self) -> Result<Vec<Task>> {
        let tasks = self
            .inner
            .tasks
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        Ok(self.sorted_newest_first(tasks))
    }

    async fn list_tasks_by_run_kind(&self, run_kind: RunKind) -> Result<Vec<Task>> {
        let tasks = self
            .inner
            .tasks
            .iter()
            .filter(|entry| entry.value().run_kind == run_kind)
            .map(|entry| entry.value().clone())
            .collect();
        Ok(self.sorted_newest_first(tasks))
    }

    async fn update_task_state(&self, id: Uuid, from: TaskState, to: TaskState) -> Result<bool> {
        match self.inner.tasks.get_mut(&id) {
            Some(mut task) if task.state == from => {
                task.state = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_task(&self, id: Uuid) -> Result<bool> {
        if self.inner.errors.contains_key(&id) || self.inner.cancels.contains_key(&id) {
            return Err(StorageError::TaskReferenced(id));
        }
        Ok(self.inner.tasks.remove(&id).is_some())
    }

    async fn mark_erroneous(&self, task_id: Uuid) -> Result<bool> {
        match self.inner.errors.entry(task_id) {
            Entry::Vacant(vacant) => {
                vacant.insert(ErrorEntry::new(task_id));
                Ok(true)
            }
            Entry::Occupied(_) => Ok(false),
        }
    }

    async fn get_error_entry(&self, task_id: Uuid) -> Result<Option<ErrorEntry>> {
        Ok(self.inner.errors.get(&task_id).map(|entry| *entry.value()))
    }

    async fn request_cancel(&self, task_id: Uuid, requested_at: DateTime<Utc>) -> Result<()> {
        self.inner
            .cancels
            .entry(task_id)
            .or_insert_with(|| CancelRequest::new(task_id, requested_at));
        Ok(())
    }

    async fn list_cancel_requests(&self) -> Result<Vec<CancelRequest>> {
        let mut requests: Vec<CancelRequest> = self
            .inner
            .cancels
            .iter()
            .map(|entry| *entry.value())
            .collect();
        requests.sort_by_key(|request| request.requested_at);
        Ok(requests)
    }

    async fn insert_planned_task(&self, planned: &PlannedTask) -> Result<()> {
        self.inner.planned.insert(planned.id, planned.clone());
        Ok(())
    }

    async fn get_planned_task(&self, id: Uuid) -> Result<Option<PlannedTask>> {
        Ok(self.inner.planned.get(&id).map(|entry| entry.value().clone()))
    }

    async fn list_planned_tasks(&self) -> Result<Vec<PlannedTask>> {
        let mut planned: Vec<PlannedTask> = self
            .inner
            .planned
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        planned.sort_by_key(|p| p.id);
        Ok(planned)
    }

    async fn delete_planned_task(&self, id: Uuid) -> Result<bool> {
        Ok(self.inner.planned.remove(&id).is_some())
    }

    async fn reserve_backup(&self, backup: &BackupProperties) -> Result<()> {
        self.inner.backups.insert(backup.id, backup.clone());
        Ok(())
    }

    async fn get_backup(&self, id: Uuid) -> Result<Option<BackupProperties>> {
        Ok(self.inner.backups.get(&id).map(|entry| entry.value().clone()))
    }

    async fn list_backups(&self) -> Result<Vec<BackupProperties>> {
        let mut backups: Vec<BackupProperties> = self
            .inner
            .backups
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        backups.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(backups)
    }

    async fn delete_backup(&self, id: Uuid) -> Result<bool> {
        Ok(self.inner.backups.remove(&id).is_some())
    }

    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        Ok(Box::new(MemoryUnitOfWork {
            id: Uuid::new_v4(),
            tables: Arc::clone(&self.inner),
            held: Vec::new(),
            writes: Vec::new(),
        }))
    }
}

/// Write staged by a unit of work, applied on commit.
enum StagedWrite {
    SetErrorHandled(Uuid),
    RecordHandledError(Uuid),
    DeleteCancel(Uuid),
    UpdatePlanned(PlannedTask),
}

struct MemoryUnitOfWork {
    id: Uuid,
    tables: Arc<Tables>,
    held: Vec<RowKey>,
    writes: Vec<StagedWrite>,
}

impl MemoryUnitOfWork {
    /// Locks up to `limit` of `candidates`, skipping rows held elsewhere.
    ///
    /// `current` re-reads a row after its lock is taken and returns it only
    /// if it still matches, mirroring how a locking read re-evaluates its
    /// predicate against the latest committed version.
    fn claim<T>(
        &mut self,
        candidates: Vec<RowKey>,
        limit: usize,
        current: impl Fn(&Tables, RowKey) -> Option<T>,
    ) -> Vec<T> {
        let mut claimed = Vec::new();

        for key in candidates {
            if claimed.len() >= limit {
                break;
            }
            if self.held.contains(&key) {
                continue;
            }
            let locked = match self.tables.locks.entry(key) {
                Entry::Vacant(vacant) => {
                    vacant.insert(self.id);
                    true
                }
                Entry::Occupied(_) => false,
            };
            if !locked {
                trace!("Skipping locked row {:?}", key);
                continue;
            }

            match current(&self.tables, key) {
                Some(row) => {
                    self.held.push(key);
                    claimed.push(row);
                }
                None => {
                    self.tables.locks.remove(&key);
                }
            }
        }

        claimed
    }

    fn release_locks(&mut self) {
        for key in self.held.drain(..) {
            self.tables
                .locks
                .remove_if(&key, |_, holder| *holder == self.id);
        }
    }

    fn apply(&mut self) {
        for write in self.writes.drain(..) {
            match write {
                StagedWrite::SetErrorHandled(task_id) => {
                    if let Some(mut entry) = self.tables.errors.get_mut(&task_id) {
                        entry.handled = true;
                    }
                }
                StagedWrite::RecordHandledError(task_id) => {
                    self.tables.errors.insert(
                        task_id,
                        ErrorEntry {
                            task_id,
                            handled: true,
                        },
                    );
                }
                StagedWrite::DeleteCancel(task_id) => {
                    self.tables.cancels.remove(&task_id);
                }
                StagedWrite::UpdatePlanned(planned) => {
                    if let Some(mut row) = self.tables.planned.get_mut(&planned.id) {
                        *row = planned;
                    }
                }
            }
        }
    }
}

impl Drop for MemoryUnitOfWork {
    fn drop(&mut self) {
        // Anything not applied by commit is discarded here.
        self.writes.clear();
        self.release_locks();
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn claim_unhandled_errors(&mut self, limit: usize) -> Result<Vec<ErrorEntry>> {
        let mut candidates: Vec<Uuid> = self
            .tables
            .errors
            .iter()
            .filter(|entry| !entry.value().handled)
            .map(|entry| *entry.key())
            .collect();
        candidates.sort();

        Ok(self.claim(
            candidates.into_iter().map(RowKey::Error).collect(),
            limit,
            |tables, key| match key {
                RowKey::Error(id) => tables
                    .errors
                    .get(&id)
                    .map(|entry| *entry.value())
                    .filter(|entry| !entry.handled),
                _ => None,
            },
        ))
    }

    async fn set_error_handled(&mut self, task_id: Uuid) -> Result<()> {
        self.writes.push(StagedWrite::SetErrorHandled(task_id));
        Ok(())
    }

    async fn record_handled_error(&mut self, task_id: Uuid) -> Result<()> {
        self.writes.push(StagedWrite::RecordHandledError(task_id));
        Ok(())
    }

    async fn claim_cancel_requests(&mut self, limit: usize) -> Result<Vec<CancelRequest>> {
        let mut candidates: Vec<CancelRequest> = self
            .tables
            .cancels
            .iter()
            .map(|entry| *entry.value())
            .collect();
        candidates.sort_by_key(|request| request.requested_at);

        Ok(self.claim(
            candidates
                .into_iter()
                .map(|request| RowKey::Cancel(request.task_id))
                .collect(),
            limit,
            |tables, key| match key {
                RowKey::Cancel(id) => tables.cancels.get(&id).map(|entry| *entry.value()),
                _ => None,
            },
        ))
    }

    async fn delete_cancel_request(&mut self, task_id: Uuid) -> Result<()> {
        self.writes.push(StagedWrite::DeleteCancel(task_id));
        Ok(())
    }

    async fn claim_planned_tasks(
        &mut self,
        state: PlannedState,
        limit: usize,
    ) -> Result<Vec<PlannedTask>> {
        let mut candidates: Vec<Uuid> = self
            .tables
            .planned
            .iter()
            .filter(|entry| entry.value().state == state)
            .map(|entry| *entry.key())
            .collect();
        candidates.sort();

        Ok(self.claim(
            candidates.into_iter().map(RowKey::Planned).collect(),
            limit,
            move |tables, key| match key {
                RowKey::Planned(id) => tables
                    .planned
                    .get(&id)
                    .map(|entry| entry.value().clone())
                    .filter(|planned| planned.state == state),
                _ => None,
            },
        ))
    }

    async fn update_planned_task(&mut self, planned: &PlannedTask) -> Result<()> {
        self.writes.push(StagedWrite::UpdatePlanned(planned.clone()));
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        self.apply();
        self.release_locks();
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
