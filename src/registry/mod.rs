//! Task registry: durable mapping from task identifier to task record.
//!
//! A record is created `pending` at submission, moved to `running` when its
//! pipeline starts, and written once more when the run reaches a terminal
//! state. Terminal writes are guarded on status, so a record never leaves
//! `completed` or `failed`.

pub mod store;

pub use store::SqliteTaskRegistry;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::DatabaseError;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("Could not allocate a unique task id after {0} attempts")]
    IdAllocation(usize),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl From<rusqlite::Error> for RegistryError {
    fn from(err: rusqlite::Error) -> Self {
        RegistryError::Database(DatabaseError::Sqlite(err))
    }
}

/// Lifecycle of a task: pending → running → {completed, failed}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(DatabaseError::InvalidEnum {
                field: "status".into(),
                value: other.into(),
            }),
        }
    }
}

/// One document-analysis request, tracked end-to-end.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub filename: String,
    pub query: String,
    pub status: TaskStatus,
    /// Aggregated analysis (JSON text) when completed, error text when failed.
    pub result: Option<String>,
    pub output_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Point-write / point-read store for task records.
///
/// Implementations must give record-level atomicity: a concurrent `get`
/// never observes a half-applied update.
pub trait TaskRegistry: Send + Sync {
    /// Insert a new `pending` record and return its fresh identifier.
    fn create(&self, filename: &str, query: &str) -> Result<String, RegistryError>;

    /// Move a `pending` record to `running`. Anything else is left untouched.
    fn mark_running(&self, task_id: &str);

    /// Record the terminal outcome of a run.
    ///
    /// Called from background workers, so failures (unknown id, record
    /// already terminal, storage errors) are logged rather than returned.
    fn update_result(
        &self,
        task_id: &str,
        result: &str,
        output_path: Option<&str>,
        status: TaskStatus,
    );

    /// Fetch a record, or `NotFound` if the identifier was never issued.
    fn get(&self, task_id: &str) -> Result<TaskRecord, RegistryError>;
}
