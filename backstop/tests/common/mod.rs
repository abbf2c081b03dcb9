//! Shared fakes and helpers for the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use backstop::prelude::*;
use backstop::services::BoxError;
use dashmap::DashMap;
use std::future::Future;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use uuid::Uuid;

/// How a fake collaborator call behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Succeed,
    Fail,
    /// Never returns; only cancellation gets the pipeline out.
    Hang,
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub struct FakeDatabase {
    pub dump: Mutex<Behavior>,
    pub restore: Mutex<Behavior>,
    pub restored: Mutex<Vec<(String, Vec<u8>)>>,
    /// Replaces the default dump contents when set.
    pub payload: Mutex<Option<Vec<u8>>>,
}

impl FakeDatabase {
    pub fn new() -> Self {
        Self {
            dump: Mutex::new(Behavior::Succeed),
            restore: Mutex::new(Behavior::Succeed),
            restored: Mutex::new(Vec::new()),
            payload: Mutex::new(None),
        }
    }

    pub fn dump_behaves(&self, behavior: Behavior) {
        *self.dump.lock().unwrap() = behavior;
    }

    pub fn dump_payload(&self, bytes: Vec<u8>) {
        *self.payload.lock().unwrap() = Some(bytes);
    }
}

pub fn dump_bytes(database_ref: &str) -> Vec<u8> {
    format!("dump of {}", database_ref).into_bytes()
}

#[async_trait]
impl DatabaseBackupService for FakeDatabase {
    async fn create_dump(&self, database_ref: &str) -> Result<ByteStream, BoxError> {
        let behavior = *self.dump.lock().unwrap();
        match behavior {
            Behavior::Succeed => {
                let bytes = self
                    .payload
                    .lock()
                    .unwrap()
                    .clone()
                    .unwrap_or_else(|| dump_bytes(database_ref));
                Ok(Box::pin(Cursor::new(bytes)))
            }
            Behavior::Fail => Err("database unavailable".into()),
            Behavior::Hang => std::future::pending().await,
        }
    }

    async fn restore_dump(&self, mut dump: ByteStream, database_ref: &str) -> Result<(), BoxError> {
        let behavior = *self.restore.lock().unwrap();
        match behavior {
            Behavior::Succeed => {
                let mut bytes = Vec::new();
                dump.read_to_end(&mut bytes).await?;
                self.restored
                    .lock()
                    .unwrap()
                    .push((database_ref.to_string(), bytes));
                Ok(())
            }
            Behavior::Fail => Err("restore rejected".into()),
            Behavior::Hang => std::future::pending().await,
        }
    }
}

/// Storage keeping backups in memory and recording every delete.
pub struct FakeStorage {
    pub objects: DashMap<(String, String), Vec<u8>>,
    pub deletes: Mutex<Vec<(String, String)>>,
    pub upload: Mutex<Behavior>,
}

impl FakeStorage {
    pub fn new() -> Self {
        Self {
            objects: DashMap::new(),
            deletes: Mutex::new(Vec::new()),
            upload: Mutex::new(Behavior::Succeed),
        }
    }

    pub fn upload_behaves(&self, behavior: Behavior) {
        *self.upload.lock().unwrap() = behavior;
    }

    pub fn get(&self, storage_ref: &str, backup_name: &str) -> Option<Vec<u8>> {
        self.objects
            .get(&(storage_ref.to_string(), backup_name.to_string()))
            .map(|entry| entry.value().clone())
    }

    pub fn deletes(&self) -> Vec<(String, String)> {
        self.deletes.lock().unwrap().clone()
    }
}

#[async_trait]
impl StorageService for FakeStorage {
    async fn upload(
        &self,
        mut data: ByteStream,
        storage_ref: &str,
        backup_name: &str,
    ) -> Result<(), BoxError> {
        let behavior = *self.upload.lock().unwrap();
        let key = (storage_ref.to_string(), backup_name.to_string());
        match behavior {
            Behavior::Succeed => {
                let mut bytes = Vec::new();
                data.read_to_end(&mut bytes).await?;
                self.objects.insert(key, bytes);
                Ok(())
            }
            Behavior::Fail => {
                // leave a partial object behind, as a dropped connection would
                let mut partial = vec![0u8; 4];
                let n = data.read(&mut partial).await?;
                partial.truncate(n);
                self.objects.insert(key, partial);
                Err("connection reset during upload".into())
            }
            Behavior::Hang => {
                self.objects.insert(key, Vec::new());
                std::future::pending().await
            }
        }
    }

    async fn download(&self, storage_ref: &str, backup_name: &str) -> Result<ByteStream, BoxError> {
        match self.get(storage_ref, backup_name) {
            Some(bytes) => Ok(Box::pin(Cursor::new(bytes))),
            None => Err(format!("no backup {} on {}", backup_name, storage_ref).into()),
        }
    }

    async fn delete(&self, storage_ref: &str, backup_name: &str) -> Result<(), BoxError> {
        let key = (storage_ref.to_string(), backup_name.to_string());
        self.objects.remove(&key);
        self.deletes.lock().unwrap().push(key);
        Ok(())
    }
}

/// One simulated coordinator instance without its watcher loops.
pub struct Instance {
    pub manager: Arc<TaskManager<InMemoryTaskStore>>,
    pub database: Arc<FakeDatabase>,
    pub storage: Arc<FakeStorage>,
    pub config: CoordinatorConfig,
}

pub fn test_config(instance_id: &str) -> CoordinatorConfig {
    CoordinatorConfig::default()
        .with_instance_id(instance_id)
        .with_cancel_grace_period(Duration::from_millis(500))
}

pub fn instance(store: &Arc<InMemoryTaskStore>, instance_id: &str) -> Instance {
    instance_with(store, test_config(instance_id), Arc::new(FakeStorage::new()))
}

pub fn instance_with(
    store: &Arc<InMemoryTaskStore>,
    config: CoordinatorConfig,
    storage: Arc<FakeStorage>,
) -> Instance {
    let database = Arc::new(FakeDatabase::new());
    let services = Services::new(database.clone(), storage.clone());
    let manager = Arc::new(TaskManager::new(Arc::clone(store), services, &config));
    Instance {
        manager,
        database,
        storage,
        config,
    }
}

/// Polls `check` until it returns true, failing the test after five seconds.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

/// Synchronous flavour of [`eventually`].
pub async fn wait_until(what: &str, check: impl Fn() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

/// Waits until the task reaches `state`.
pub async fn wait_for_state(store: &InMemoryTaskStore, task_id: Uuid, state: TaskState) -> Task {
    eventually(&format!("task {} to reach {}", task_id, state), move || async move {
        store
            .get_task(task_id)
            .await
            .unwrap()
            .is_some_and(|task| task.state == state)
    })
    .await;
    store.get_task(task_id).await.unwrap().unwrap()
}

/// Waits until the task is flagged in the error registry.
pub async fn wait_for_erroneous(store: &InMemoryTaskStore, task_id: Uuid) -> Task {
    eventually(&format!("task {} to be flagged", task_id), move || async move {
        store
            .get_task(task_id)
            .await
            .unwrap()
            .is_some_and(|task| task.erroneous)
    })
    .await;
    store.get_task(task_id).await.unwrap().unwrap()
}
