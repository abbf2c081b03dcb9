use super::cancel_watcher::CancelWatcher;
use super::config::CoordinatorConfig;
use super::error_watcher::ErrorWatcher;
use super::manager::TaskManager;
use super::planned_watcher::{PlannedFireWatcher, PlannedReconcileWatcher};
use super::watcher::spawn_watcher;
use crate::services::Services;
use crate::storage::TaskStore;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// One coordinator instance: a task manager plus its four watchers.
///
/// Run one per process. Any number of processes may share the same store;
/// row-level claims keep their watchers from acting on the same row.
///
/// # Lifecycle
/// 1. Create: `Coordinator::new(store, services)`
/// 2. Configure: `.with_config(config)`
/// 3. Start: `.start()` returns a handle
/// 4. Shutdown: `handle.shutdown().await`
///
/// # Example
///
/// ```no_run
/// use backstop::executor::{Coordinator, CoordinatorConfig};
/// use backstop::services::{LocalFileSystemStorage, Services};
/// use backstop::storage::InMemoryTaskStore;
/// use std::sync::Arc;
///
/// # async fn example(
/// #     database: Arc<dyn backstop::services::DatabaseBackupService>,
/// # ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
/// let storage = LocalFileSystemStorage::new().with_root("local", "/var/backups");
/// let services = Services::new(database, Arc::new(storage));
///
/// let handle = Coordinator::new(Arc::new(InMemoryTaskStore::new()), services)
///     .with_config(CoordinatorConfig::default().with_instance_id("node-a"))
///     .start();
///
/// handle
///     .manager()
///     .add_planned_task("orders", vec!["local".into()], vec![], std::time::Duration::from_secs(3600))
///     .await?;
///
/// handle.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct Coordinator<S: TaskStore> {
    store: Arc<S>,
    services: Services,
    config: CoordinatorConfig,
}

impl<S: TaskStore + 'static> Coordinator<S> {
    pub fn new(store: Arc<S>, services: Services) -> Self {
        Self {
            store,
            services,
            config: CoordinatorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Spawns the four watchers and returns a handle to the running instance.
    pub fn start(self) -> CoordinatorHandle<S> {
        let config = self.config;
        let manager = Arc::new(TaskManager::new(self.store, self.services, &config));
        let shutdown = CancellationToken::new();

        info!("Starting coordinator instance {}", config.instance_id);

        let watchers = vec![
            spawn_watcher(
                ErrorWatcher::new(Arc::clone(&manager), &config),
                config.error_watch_interval,
                shutdown.child_token(),
            ),
            spawn_watcher(
                CancelWatcher::new(Arc::clone(&manager), &config),
                config.cancel_watch_interval,
                shutdown.child_token(),
            ),
            spawn_watcher(
                PlannedFireWatcher::new(Arc::clone(&manager), &config),
                config.planned_fire_interval,
                shutdown.child_token(),
            ),
            spawn_watcher(
                PlannedReconcileWatcher::new(Arc::clone(&manager), &config),
                config.planned_reconcile_interval,
                shutdown.child_token(),
            ),
        ];

        CoordinatorHandle {
            manager,
            shutdown,
            watchers,
        }
    }
}

/// Handle for a running coordinator instance.
///
/// Dropping it without calling [`shutdown`](Self::shutdown) leaves the
/// watchers running in the background.
pub struct CoordinatorHandle<S: TaskStore> {
    manager: Arc<TaskManager<S>>,
    shutdown: CancellationToken,
    watchers: Vec<JoinHandle<()>>,
}

impl<S: TaskStore + 'static> CoordinatorHandle<S> {
    /// The task manager used to start, cancel and inspect tasks.
    pub fn manager(&self) -> &Arc<TaskManager<S>> {
        &self.manager
    }

    /// Stops the watchers, then waits for in-flight pipelines to finish.
    pub async fn shutdown(self) {
        info!(
            "Shutting down coordinator instance {}",
            self.manager.instance_id()
        );
        self.shutdown.cancel();
        for watcher in self.watchers {
            let _ = watcher.await;
        }
        self.manager.drain().await;
        info!("Coordinator instance {} stopped", self.manager.instance_id());
    }
}
