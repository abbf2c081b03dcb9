use super::error::CoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Scheduling state of a planned task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlannedState {
    /// Waiting for its interval to elapse.
    Waiting,
    /// A handler task has been fired and is being watched.
    Executing,
}

impl PlannedState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlannedState::Waiting => "WAITING",
            PlannedState::Executing => "EXECUTING",
        }
    }
}

impl fmt::Display for PlannedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlannedState {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WAITING" => Ok(PlannedState::Waiting),
            "EXECUTING" => Ok(PlannedState::Executing),
            _ => Err(CoreError::InvalidPlannedState(s.to_string())),
        }
    }
}

/// Durable template for a backup that is re-run on a fixed interval.
///
/// Invariant: `handler_task_id.is_some()` exactly when `state == Executing`.
/// Use [`PlannedTask::fire`] and [`PlannedTask::reset`] to move between the
/// two states so the invariant holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedTask {
    pub id: Uuid,
    pub database_ref: String,
    pub storage_refs: Vec<String>,
    pub processors: Vec<String>,
    pub interval: Duration,
    pub last_started_at: DateTime<Utc>,
    pub state: PlannedState,
    pub handler_task_id: Option<Uuid>,
}

impl PlannedTask {
    /// Creates a waiting planned task whose first run is one interval from now.
    pub fn new(
        database_ref: impl Into<String>,
        storage_refs: Vec<String>,
        processors: Vec<String>,
        interval: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            database_ref: database_ref.into(),
            storage_refs,
            processors,
            interval,
            last_started_at: Utc::now(),
            state: PlannedState::Waiting,
            handler_task_id: None,
        }
    }

    /// Returns the instant after which the task should fire again.
    pub fn next_fire_at(&self) -> DateTime<Utc> {
        let interval = chrono::Duration::from_std(self.interval).unwrap_or(chrono::Duration::MAX);
        self.last_started_at
            .checked_add_signed(interval)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.next_fire_at()
    }

    /// Moves to `Executing` under the given handler task.
    pub fn fire(&mut self, handler_task_id: Uuid) {
        self.handler_task_id = Some(handler_task_id);
        self.state = PlannedState::Executing;
    }

    /// Returns to `Waiting`, dropping the handler reference.
    pub fn reset(&mut self) {
        self.handler_task_id = None;
        self.state = PlannedState::Waiting;
    }
}
