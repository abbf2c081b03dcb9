//! Task entity and its per-type state machine.

use super::error::CoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Kind of operation a task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskType {
    CreateBackup,
    RestoreBackup,
    DeleteBackup,
}

const CREATE_PIPELINE: &[TaskState] = &[
    TaskState::Planned,
    TaskState::Creating,
    TaskState::ApplyingProcessors,
    TaskState::Uploading,
    TaskState::Completed,
];

const RESTORE_PIPELINE: &[TaskState] = &[
    TaskState::Planned,
    TaskState::Downloading,
    TaskState::ApplyingDeprocessors,
    TaskState::Restoring,
    TaskState::Completed,
];

const DELETE_PIPELINE: &[TaskState] = &[
    TaskState::Planned,
    TaskState::Deleting,
    TaskState::Completed,
];

impl TaskType {
    /// Returns the ordered states a task of this type walks through.
    pub fn pipeline(&self) -> &'static [TaskState] {
        match self {
            TaskType::CreateBackup => CREATE_PIPELINE,
            TaskType::RestoreBackup => RESTORE_PIPELINE,
            TaskType::DeleteBackup => DELETE_PIPELINE,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::CreateBackup => "CREATE_BACKUP",
            TaskType::RestoreBackup => "RESTORE_BACKUP",
            TaskType::DeleteBackup => "DELETE_BACKUP",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATE_BACKUP" => Ok(TaskType::CreateBackup),
            "RESTORE_BACKUP" => Ok(TaskType::RestoreBackup),
            "DELETE_BACKUP" => Ok(TaskType::DeleteBackup),
            _ => Err(CoreError::InvalidTaskType(s.to_string())),
        }
    }
}

/// Who initiated a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunKind {
    /// Started by an operator through the admin front end.
    User,
    /// Started by the coordinator itself (planned tasks, compensation).
    System,
}

impl RunKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunKind::User => "USER",
            RunKind::System => "SYSTEM",
        }
    }
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "USER" => Ok(RunKind::User),
            "SYSTEM" => Ok(RunKind::System),
            _ => Err(CoreError::InvalidRunKind(s.to_string())),
        }
    }
}

/// Durable progress marker of a task.
///
/// States only ever move forward along [`TaskType::pipeline`]. Abandoning a
/// task is not a state: it is recorded in the error registry and undone by
/// compensation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    Planned,
    Creating,
    ApplyingProcessors,
    Uploading,
    Downloading,
    ApplyingDeprocessors,
    Restoring,
    Deleting,
    Completed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Planned => "PLANNED",
            TaskState::Creating => "CREATING",
            TaskState::ApplyingProcessors => "APPLYING_PROCESSORS",
            TaskState::Uploading => "UPLOADING",
            TaskState::Downloading => "DOWNLOADING",
            TaskState::ApplyingDeprocessors => "APPLYING_DEPROCESSORS",
            TaskState::Restoring => "RESTORING",
            TaskState::Deleting => "DELETING",
            TaskState::Completed => "COMPLETED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed)
    }

    /// Returns true if `from -> to` is a single forward step of the pipeline
    /// belonging to `task_type`.
    pub fn can_advance(task_type: TaskType, from: TaskState, to: TaskState) -> bool {
        task_type
            .pipeline()
            .windows(2)
            .any(|pair| pair[0] == from && pair[1] == to)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PLANNED" => Ok(TaskState::Planned),
            "CREATING" => Ok(TaskState::Creating),
            "APPLYING_PROCESSORS" => Ok(TaskState::ApplyingProcessors),
            "UPLOADING" => Ok(TaskState::Uploading),
            "DOWNLOADING" => Ok(TaskState::Downloading),
            "APPLYING_DEPROCESSORS" => Ok(TaskState::ApplyingDeprocessors),
            "RESTORING" => Ok(TaskState::Restoring),
            "DELETING" => Ok(TaskState::Deleting),
            "COMPLETED" => Ok(TaskState::Completed),
            _ => Err(CoreError::InvalidState(s.to_string())),
        }
    }
}

/// One tracked execution of a create, restore or delete operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub task_type: TaskType,
    pub run_kind: RunKind,
    pub state: TaskState,
    /// Backup identity this task operates on.
    pub backup_id: Uuid,
    /// Derived from the error registry on read; never persisted on the task row.
    pub erroneous: bool,
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Creates a new task in the `Planned` state.
    pub fn new(task_type: TaskType, run_kind: RunKind, backup_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_type,
            run_kind,
            state: TaskState::Planned,
            backup_id,
            erroneous: false,
            created_at: Utc::now(),
        }
    }

    /// Returns true once the task has reached `Completed` without being flagged.
    pub fn is_completed(&self) -> bool {
        self.state.is_terminal() && !self.erroneous
    }
}
