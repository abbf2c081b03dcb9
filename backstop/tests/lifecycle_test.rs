//! Task lifecycle tests
//!
//! These tests verify that:
//! 1. Each task type walks its pipeline forward to Completed
//! 2. The manager rejects transitions outside the pipeline
//! 3. A failed step only flags the task; compensation is deferred
//! 4. Compensation depends on the state the task was abandoned in

mod common;

use backstop::executor::ExecutionError;
use backstop::prelude::*;
use backstop::storage::StorageError;
use common::*;
use std::sync::Arc;
use uuid::Uuid;

fn refs(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

#[tokio::test]
async fn test_create_backup_runs_to_completion() {
    init_tracing();
    let store = Arc::new(InMemoryTaskStore::new());
    let node = instance(&store, "node-a");

    let task_id = node
        .manager
        .start_create_backup("orders", refs(&["s1"]), vec![], RunKind::User)
        .await
        .unwrap();

    let task = wait_for_state(&store, task_id, TaskState::Completed).await;
    assert!(!task.erroneous);
    assert_eq!(task.task_type, TaskType::CreateBackup);

    let backup = store.get_backup(task.backup_id).await.unwrap().unwrap();
    assert!(backup.name.starts_with("backup_orders_"));
    assert_eq!(node.storage.get("s1", &backup.name), Some(dump_bytes("orders")));

    wait_until("handle removal", || node.manager.registry().is_empty()).await;
}

#[tokio::test]
async fn test_create_backup_uploads_to_every_storage() {
    let store = Arc::new(InMemoryTaskStore::new());
    let node = instance(&store, "node-a");

    let task_id = node
        .manager
        .start_create_backup("orders", refs(&["s1", "s2", "s3"]), vec![], RunKind::User)
        .await
        .unwrap();

    let task = wait_for_state(&store, task_id, TaskState::Completed).await;
    let backup = store.get_backup(task.backup_id).await.unwrap().unwrap();
    for storage_ref in ["s1", "s2", "s3"] {
        assert_eq!(
            node.storage.get(storage_ref, &backup.name),
            Some(dump_bytes("orders")),
            "missing copy on {}",
            storage_ref
        );
    }
}

#[tokio::test]
async fn test_large_dump_streams_intact_to_every_storage() {
    let store = Arc::new(InMemoryTaskStore::new());
    let node = instance(&store, "node-a");
    // several times the fan-out pipe capacity, not a multiple of it
    let payload: Vec<u8> = (0..(1024 * 1024 + 17)).map(|i| (i % 251) as u8).collect();
    node.database.dump_payload(payload.clone());

    let task_id = node
        .manager
        .start_create_backup("orders", refs(&["s1", "s2"]), vec![], RunKind::User)
        .await
        .unwrap();

    let task = wait_for_state(&store, task_id, TaskState::Completed).await;
    let backup = store.get_backup(task.backup_id).await.unwrap().unwrap();
    for storage_ref in ["s1", "s2"] {
        let stored = node.storage.get(storage_ref, &backup.name).unwrap();
        assert_eq!(stored.len(), payload.len(), "length on {}", storage_ref);
        assert!(stored == payload, "content on {}", storage_ref);
    }
}

#[tokio::test]
async fn test_fan_out_upload_failure_flags_task() {
    let store = Arc::new(InMemoryTaskStore::new());
    let node = instance(&store, "node-a");
    node.storage.upload_behaves(Behavior::Fail);

    let task_id = node
        .manager
        .start_create_backup("orders", refs(&["s1", "s2"]), vec![], RunKind::User)
        .await
        .unwrap();

    let task = wait_for_erroneous(&store, task_id).await;
    assert_eq!(task.state, TaskState::Uploading);
}

#[tokio::test]
async fn test_backup_without_storage_is_rejected() {
    let store = Arc::new(InMemoryTaskStore::new());
    let node = instance(&store, "node-a");

    let err = node
        .manager
        .start_create_backup("orders", vec![], vec![], RunKind::User)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ExecutionError::NoStorageTargets { ref database_ref } if database_ref == "orders"
    ));

    let err = node
        .manager
        .add_planned_task("orders", vec![], vec![], std::time::Duration::from_secs(60))
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutionError::NoStorageTargets { .. }));

    assert!(store.list_tasks().await.unwrap().is_empty());
    assert!(store.list_backups().await.unwrap().is_empty());
    assert!(store.list_planned_tasks().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_restore_reads_backup_from_named_storage() {
    let store = Arc::new(InMemoryTaskStore::new());
    let node = instance(&store, "node-a");

    let create_id = node
        .manager
        .start_create_backup("orders", refs(&["s1", "s2"]), vec![], RunKind::User)
        .await
        .unwrap();
    let created = wait_for_state(&store, create_id, TaskState::Completed).await;

    let restore_id = node
        .manager
        .start_restore_backup(created.backup_id, "s2", "orders_staging", RunKind::User)
        .await
        .unwrap();
    let restored = wait_for_state(&store, restore_id, TaskState::Completed).await;

    assert_eq!(restored.task_type, TaskType::RestoreBackup);
    assert_eq!(restored.backup_id, created.backup_id);
    assert_eq!(
        node.database.restored.lock().unwrap().clone(),
        vec![("orders_staging".to_string(), dump_bytes("orders"))]
    );
}

#[tokio::test]
async fn test_delete_backup_removes_data_and_reservation() {
    let store = Arc::new(InMemoryTaskStore::new());
    let node = instance(&store, "node-a");

    let create_id = node
        .manager
        .start_create_backup("orders", refs(&["s1", "s2"]), vec![], RunKind::User)
        .await
        .unwrap();
    let created = wait_for_state(&store, create_id, TaskState::Completed).await;
    let backup = store.get_backup(created.backup_id).await.unwrap().unwrap();

    let delete_id = node
        .manager
        .start_delete_backup(backup.id, RunKind::User)
        .await
        .unwrap();
    wait_for_state(&store, delete_id, TaskState::Completed).await;

    let backup_id = backup.id;
    let store_ref = &*store;
    eventually("reservation removal", move || async move {
        store_ref.get_backup(backup_id).await.unwrap().is_none()
    })
    .await;
    assert!(node.storage.get("s1", &backup.name).is_none());
    assert!(node.storage.get("s2", &backup.name).is_none());
    assert_eq!(node.storage.deletes().len(), 2);
}

#[tokio::test]
async fn test_unknown_backup_cannot_be_restored_or_deleted() {
    let store = Arc::new(InMemoryTaskStore::new());
    let node = instance(&store, "node-a");
    let missing = Uuid::new_v4();

    let restore = node
        .manager
        .start_restore_backup(missing, "s1", "orders", RunKind::User)
        .await;
    assert!(matches!(restore, Err(ExecutionError::BackupNotFound(id)) if id == missing));

    let delete = node.manager.start_delete_backup(missing, RunKind::User).await;
    assert!(matches!(delete, Err(ExecutionError::BackupNotFound(id)) if id == missing));

    assert!(store.list_tasks().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_advance_accepts_only_next_pipeline_step() {
    let store = Arc::new(InMemoryTaskStore::new());
    let node = instance(&store, "node-a");
    let task = node
        .manager
        .create_task(TaskType::CreateBackup, RunKind::User, Uuid::new_v4())
        .await
        .unwrap();

    // skipping ahead
    let skip = node.manager.advance(task.id, TaskState::Uploading).await;
    assert!(matches!(
        skip,
        Err(ExecutionError::IllegalTransition {
            from: TaskState::Planned,
            to: TaskState::Uploading,
            ..
        })
    ));

    node.manager
        .advance(task.id, TaskState::Creating)
        .await
        .unwrap();

    // repeating the same move, as a second writer would
    assert!(node
        .manager
        .advance(task.id, TaskState::Creating)
        .await
        .is_err());
    // a state from another pipeline
    assert!(node
        .manager
        .advance(task.id, TaskState::Downloading)
        .await
        .is_err());
    // backwards
    assert!(node
        .manager
        .advance(task.id, TaskState::Planned)
        .await
        .is_err());

    let stored = store.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(stored.state, TaskState::Creating);

    let missing = node.manager.advance(Uuid::new_v4(), TaskState::Creating).await;
    assert!(matches!(missing, Err(ExecutionError::TaskNotFound(_))));
}

#[tokio::test]
async fn test_failed_step_only_flags_task() {
    let store = Arc::new(InMemoryTaskStore::new());
    let node = instance(&store, "node-a");
    node.database.dump_behaves(Behavior::Fail);

    let task_id = node
        .manager
        .start_create_backup("orders", refs(&["s1"]), vec![], RunKind::User)
        .await
        .unwrap();

    let task = wait_for_erroneous(&store, task_id).await;
    assert_eq!(task.state, TaskState::Creating);

    // the reservation stays until an error watcher compensates
    assert!(store.get_backup(task.backup_id).await.unwrap().is_some());
    let entry = store.get_error_entry(task_id).await.unwrap().unwrap();
    assert!(!entry.handled);

    wait_until("handle removal", || node.manager.registry().is_empty()).await;
}

#[tokio::test]
async fn test_unknown_processor_fails_the_task() {
    let store = Arc::new(InMemoryTaskStore::new());
    let node = instance(&store, "node-a");

    let task_id = node
        .manager
        .start_create_backup("orders", refs(&["s1"]), refs(&["gzip"]), RunKind::User)
        .await
        .unwrap();

    let task = wait_for_erroneous(&store, task_id).await;
    assert_eq!(task.state, TaskState::ApplyingProcessors);
}

#[tokio::test]
async fn test_mark_erroneous_twice_keeps_one_entry() {
    let store = Arc::new(InMemoryTaskStore::new());
    let node = instance(&store, "node-a");
    let task = node
        .manager
        .create_task(TaskType::DeleteBackup, RunKind::User, Uuid::new_v4())
        .await
        .unwrap();

    assert!(node.manager.mark_erroneous(task.id).await.unwrap());
    assert!(!node.manager.mark_erroneous(task.id).await.unwrap());

    let mut tick = store.begin().await.unwrap();
    let claimed = tick.claim_unhandled_errors(10).await.unwrap();
    assert_eq!(claimed.len(), 1);
}

async fn abandoned_task(
    store: &InMemoryTaskStore,
    task_type: TaskType,
    state: TaskState,
    reserve: bool,
) -> Task {
    let backup = BackupProperties::new("orders", vec!["s1".to_string()], vec![]);
    if reserve {
        store.reserve_backup(&backup).await.unwrap();
    }
    let task = Task {
        state,
        ..Task::new(task_type, RunKind::User, backup.id)
    };
    store.insert_task(&task).await.unwrap();
    task
}

#[tokio::test]
async fn test_compensation_before_upload_removes_reservation() {
    let store = Arc::new(InMemoryTaskStore::new());
    let node = instance(&store, "node-a");

    for state in [TaskState::Creating, TaskState::ApplyingProcessors] {
        let task = abandoned_task(&store, TaskType::CreateBackup, state, true).await;

        let outcome = node.manager.compensate(&task).await.unwrap();
        assert_eq!(outcome, Compensation::ReservationRemoved);
        assert!(store.get_backup(task.backup_id).await.unwrap().is_none());
    }
    assert!(node.storage.deletes().is_empty());
}

#[tokio::test]
async fn test_compensation_of_restore_and_delete_is_noop() {
    let store = Arc::new(InMemoryTaskStore::new());
    let node = instance(&store, "node-a");

    let cases = [
        (TaskType::RestoreBackup, TaskState::Downloading),
        (TaskType::RestoreBackup, TaskState::ApplyingDeprocessors),
        (TaskType::RestoreBackup, TaskState::Restoring),
        (TaskType::DeleteBackup, TaskState::Deleting),
    ];
    for (task_type, state) in cases {
        let task = abandoned_task(&store, task_type, state, true).await;

        let outcome = node.manager.compensate(&task).await.unwrap();
        assert_eq!(outcome, Compensation::Noop, "state {}", state);
        assert!(store.get_backup(task.backup_id).await.unwrap().is_some());
    }
}

#[tokio::test]
async fn test_compensation_during_upload_schedules_delete() {
    let store = Arc::new(InMemoryTaskStore::new());
    let node = instance(&store, "node-a");
    let task = abandoned_task(&store, TaskType::CreateBackup, TaskState::Uploading, true).await;
    let backup = store.get_backup(task.backup_id).await.unwrap().unwrap();

    let outcome = node.manager.compensate(&task).await.unwrap();
    let Compensation::DeletionScheduled { delete_task_id } = outcome else {
        panic!("expected a scheduled deletion, got {:?}", outcome);
    };

    // reservation goes away without waiting for the delete
    assert!(store.get_backup(backup.id).await.unwrap().is_none());

    let delete_task = wait_for_state(&store, delete_task_id, TaskState::Completed).await;
    assert_eq!(delete_task.task_type, TaskType::DeleteBackup);
    assert_eq!(delete_task.run_kind, RunKind::System);
    assert_eq!(delete_task.backup_id, backup.id);
    assert_eq!(
        node.storage.deletes(),
        vec![("s1".to_string(), backup.name.clone())]
    );
}

#[tokio::test]
async fn test_uncompensable_tasks_are_left_for_inspection() {
    let store = Arc::new(InMemoryTaskStore::new());
    let node = instance(&store, "node-a");

    let planned = abandoned_task(&store, TaskType::CreateBackup, TaskState::Planned, true).await;
    let completed =
        abandoned_task(&store, TaskType::CreateBackup, TaskState::Completed, true).await;
    let orphan = abandoned_task(&store, TaskType::CreateBackup, TaskState::Uploading, false).await;

    for task in [&planned, &completed, &orphan] {
        let outcome = node.manager.compensate(task).await.unwrap();
        assert_eq!(outcome, Compensation::ManualInspection, "state {}", task.state);
    }

    // nothing was touched
    assert!(store.get_backup(planned.backup_id).await.unwrap().is_some());
    assert!(store.get_backup(completed.backup_id).await.unwrap().is_some());
    assert_eq!(store.list_tasks().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_task_listing_and_removal() {
    let store = Arc::new(InMemoryTaskStore::new());
    let node = instance(&store, "node-a");

    let user = node
        .manager
        .create_task(TaskType::CreateBackup, RunKind::User, Uuid::new_v4())
        .await
        .unwrap();
    let system = node
        .manager
        .create_task(TaskType::DeleteBackup, RunKind::System, Uuid::new_v4())
        .await
        .unwrap();

    let all = node.manager.list_tasks(None).await.unwrap();
    assert_eq!(all.len(), 2);
    let system_only = node.manager.list_tasks(Some(RunKind::System)).await.unwrap();
    assert_eq!(system_only.iter().map(|t| t.id).collect::<Vec<_>>(), vec![system.id]);

    node.manager.mark_erroneous(user.id).await.unwrap();
    let refused = node.manager.remove_task(user.id).await;
    assert!(matches!(
        refused,
        Err(ExecutionError::Storage(StorageError::TaskReferenced(id))) if id == user.id
    ));

    assert!(node.manager.remove_task(system.id).await.unwrap());
    assert!(node.manager.get_task(system.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_cancel_of_unknown_task_is_rejected() {
    let store = Arc::new(InMemoryTaskStore::new());
    let node = instance(&store, "node-a");

    let result = node.manager.request_cancel(Uuid::new_v4()).await;
    assert!(matches!(result, Err(ExecutionError::TaskNotFound(_))));
    assert!(store.list_cancel_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_planned_task_administration() {
    let store = Arc::new(InMemoryTaskStore::new());
    let node = instance(&store, "node-a");

    let planned = node
        .manager
        .add_planned_task(
            "orders",
            refs(&["s1"]),
            vec![],
            std::time::Duration::from_secs(3600),
        )
        .await
        .unwrap();
    assert_eq!(node.manager.list_planned_tasks().await.unwrap(), vec![planned.clone()]);

    node.manager.remove_planned_task(planned.id).await.unwrap();
    assert!(node.manager.list_planned_tasks().await.unwrap().is_empty());
    assert!(matches!(
        node.manager.remove_planned_task(planned.id).await,
        Err(ExecutionError::PlannedTaskNotFound(_))
    ));
}
