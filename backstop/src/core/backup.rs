use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Timestamp layout embedded in generated backup names.
const BACKUP_NAME_TIME_FORMAT: &str = "%d-%m-%Y_%H-%M-%S-%3f";

/// Reserved identity of a backup.
///
/// A `CreateBackup` task reserves one before its pipeline runs; the
/// reservation is what compensation removes when the task is abandoned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupProperties {
    pub id: Uuid,
    /// Name under which the backup is stored on every storage back-end.
    pub name: String,
    pub database_ref: String,
    pub storage_refs: Vec<String>,
    pub processors: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl BackupProperties {
    /// Builds a fresh identity for a backup of `database_ref`.
    pub fn new(
        database_ref: impl Into<String>,
        storage_refs: Vec<String>,
        processors: Vec<String>,
    ) -> Self {
        let database_ref = database_ref.into();
        let created_at = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: backup_name(&database_ref, created_at),
            database_ref,
            storage_refs,
            processors,
            created_at,
        }
    }
}

/// Formats `backup_<database>_<timestamp>`.
pub fn backup_name(database_ref: &str, at: DateTime<Utc>) -> String {
    format!(
        "backup_{}_{}",
        database_ref,
        at.format(BACKUP_NAME_TIME_FORMAT)
    )
}
