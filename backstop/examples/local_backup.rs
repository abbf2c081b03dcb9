//! Local backups with an in-memory task store
//!
//! This example demonstrates:
//! - Running a coordinator against the in-memory store
//! - Writing backups to a local directory in numbered part files
//! - A planned task firing a recurring backup
//! - Restoring the latest backup and deleting it afterwards
//!
//! ## Run with
//! ```bash
//! cargo run --example local_backup
//! ```

use async_trait::async_trait;
use backstop::prelude::*;
use backstop::BoxError;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;

/// Pretends to dump a database by emitting a few kilobytes of rows.
struct DemoDatabase;

#[async_trait]
impl DatabaseBackupService for DemoDatabase {
    async fn create_dump(&self, database_ref: &str) -> Result<ByteStream, BoxError> {
        let rows: String = (0..200)
            .map(|i| format!("INSERT INTO {} VALUES ({});\n", database_ref, i))
            .collect();
        Ok(Box::pin(Cursor::new(rows.into_bytes())))
    }

    async fn restore_dump(&self, mut dump: ByteStream, database_ref: &str) -> Result<(), BoxError> {
        let mut bytes = Vec::new();
        dump.read_to_end(&mut bytes).await?;
        println!("Restored {} bytes into {}", bytes.len(), database_ref);
        Ok(())
    }
}

async fn wait_for_completion(
    manager: &TaskManager<InMemoryTaskStore>,
    task_id: uuid::Uuid,
) -> Result<Task, BoxError> {
    loop {
        let task = manager
            .get_task(task_id)
            .await?
            .ok_or_else(|| format!("task {} vanished", task_id))?;
        if task.is_completed() || task.erroneous {
            return Ok(task);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let root = tempfile::tempdir()?;
    let storage = LocalFileSystemStorage::new()
        .with_root("local", root.path())
        .with_max_part_size(4 * 1024);

    let store = Arc::new(InMemoryTaskStore::new());
    let config = CoordinatorConfig::default()
        .with_instance_id("demo")
        .with_planned_fire_interval(Duration::from_millis(100))
        .with_planned_reconcile_interval(Duration::from_millis(100));

    let handle = Coordinator::new(
        Arc::clone(&store),
        Services::new(Arc::new(DemoDatabase), Arc::new(storage)),
    )
    .with_config(config)
    .start();
    let manager = handle.manager();

    let task_id = manager
        .start_create_backup("orders", vec!["local".to_string()], vec![], RunKind::User)
        .await?;
    let created = wait_for_completion(manager, task_id).await?;
    println!("Backup task {} finished in state {}", created.id, created.state);

    let planned = manager
        .add_planned_task(
            "customers",
            vec!["local".to_string()],
            vec![],
            Duration::from_millis(300),
        )
        .await?;
    println!("Planned task {} fires every 300ms", planned.id);
    tokio::time::sleep(Duration::from_secs(1)).await;
    manager.remove_planned_task(planned.id).await?;

    for backup in manager.list_backups().await? {
        println!("Backup {} of {}", backup.name, backup.database_ref);
    }

    let restore_id = manager
        .start_restore_backup(created.backup_id, "local", "orders_copy", RunKind::User)
        .await?;
    wait_for_completion(manager, restore_id).await?;

    let delete_id = manager
        .start_delete_backup(created.backup_id, RunKind::User)
        .await?;
    wait_for_completion(manager, delete_id).await?;

    handle.shutdown().await;
    Ok(())
}
