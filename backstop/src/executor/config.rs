use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Tunables of one coordinator instance.
///
/// Every instance sharing a database should use the same periods and
/// timeouts; only `instance_id` is expected to differ.
///
/// # Example
///
/// ```
/// use backstop::executor::CoordinatorConfig;
/// use std::time::Duration;
///
/// let config = CoordinatorConfig::default()
///     .with_instance_id("backup-node-1")
///     .with_max_concurrent_tasks(8)
///     .with_cancel_timeout(Duration::from_secs(300));
/// assert_eq!(config.max_concurrent_tasks, 8);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Name used in logs to tell instances apart.
    pub instance_id: String,
    /// Size of the pipeline worker pool.
    pub max_concurrent_tasks: usize,
    pub error_watch_interval: Duration,
    pub error_batch_size: usize,
    pub cancel_watch_interval: Duration,
    pub cancel_batch_size: usize,
    /// Age after which an unresolved cancel request is dropped.
    pub cancel_timeout: Duration,
    /// How long a cancelled pipeline gets to exit before compensation runs.
    pub cancel_grace_period: Duration,
    pub planned_fire_interval: Duration,
    pub planned_reconcile_interval: Duration,
    pub planned_batch_size: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            instance_id: format!("instance-{}", Uuid::new_v4()),
            max_concurrent_tasks: 4,
            error_watch_interval: Duration::from_secs(60),
            error_batch_size: 10,
            cancel_watch_interval: Duration::from_secs(10),
            cancel_batch_size: 100,
            cancel_timeout: Duration::from_secs(10 * 60),
            cancel_grace_period: Duration::from_secs(5),
            planned_fire_interval: Duration::from_secs(60),
            planned_reconcile_interval: Duration::from_secs(30),
            planned_batch_size: 10,
        }
    }
}

impl CoordinatorConfig {
    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = instance_id.into();
        self
    }

    /// Sets the worker pool size. Zero is raised to one.
    pub fn with_max_concurrent_tasks(mut self, max: usize) -> Self {
        self.max_concurrent_tasks = max.max(1);
        self
    }

    pub fn with_error_watch_interval(mut self, interval: Duration) -> Self {
        self.error_watch_interval = interval;
        self
    }

    pub fn with_error_batch_size(mut self, batch_size: usize) -> Self {
        self.error_batch_size = batch_size;
        self
    }

    pub fn with_cancel_watch_interval(mut self, interval: Duration) -> Self {
        self.cancel_watch_interval = interval;
        self
    }

    pub fn with_cancel_batch_size(mut self, batch_size: usize) -> Self {
        self.cancel_batch_size = batch_size;
        self
    }

    pub fn with_cancel_timeout(mut self, timeout: Duration) -> Self {
        self.cancel_timeout = timeout;
        self
    }

    pub fn with_cancel_grace_period(mut self, grace: Duration) -> Self {
        self.cancel_grace_period = grace;
        self
    }

    pub fn with_planned_fire_interval(mut self, interval: Duration) -> Self {
        self.planned_fire_interval = interval;
        self
    }

    pub fn with_planned_reconcile_interval(mut self, interval: Duration) -> Self {
        self.planned_reconcile_interval = interval;
        self
    }

    pub fn with_planned_batch_size(mut self, batch_size: usize) -> Self {
        self.planned_batch_size = batch_size;
        self
    }
}
