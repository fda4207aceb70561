//! SQLite-backed task registry.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use uuid::Uuid;

use super::{RegistryError, TaskRecord, TaskRegistry, TaskStatus};
use crate::db::{self, DatabaseError};

/// Fresh identifiers collide only in theory; the UNIQUE constraint is the real guard.
const MAX_ID_ATTEMPTS: usize = 3;

/// Task registry over a single SQLite connection.
///
/// Statements are serialised through the mutex, so every read sees a
/// record either before or after a whole update.
pub struct SqliteTaskRegistry {
    conn: Mutex<Connection>,
}

impl SqliteTaskRegistry {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Open (or create) the registry database at `path`.
    pub fn open(path: &Path) -> Result<Self, RegistryError> {
        Ok(Self::new(db::open_database(path)?))
    }

    /// In-memory registry (for testing).
    pub fn in_memory() -> Result<Self, RegistryError> {
        Ok(Self::new(db::open_memory_database()?))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, RegistryError> {
        self.conn
            .lock()
            .map_err(|_| RegistryError::Database(DatabaseError::LockPoisoned))
    }

    /// Number of records ever created.
    pub fn count(&self) -> Result<usize, RegistryError> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM analysis_results", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    fn try_update_result(
        &self,
        task_id: &str,
        result: &str,
        output_path: Option<&str>,
        status: TaskStatus,
    ) -> Result<(), RegistryError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE analysis_results
             SET result = ?2, output_path = ?3, status = ?4, completed_at = ?5
             WHERE task_id = ?1 AND status IN ('pending', 'running')",
            params![task_id, result, output_path, status.as_str(), Utc::now()],
        )?;

        if changed == 1 {
            return Ok(());
        }

        // Nothing updated: either the id is unknown or the record is already terminal.
        let existing: Option<String> = conn
            .query_row(
                "SELECT status FROM analysis_results WHERE task_id = ?1",
                params![task_id],
                |row| row.get(0),
            )
            .optional()?;

        match existing {
            None => Err(RegistryError::NotFound(task_id.to_string())),
            Some(current) => {
                tracing::warn!(
                    task_id,
                    current = %current,
                    attempted = %status,
                    "Ignoring result write for task already in a terminal state"
                );
                Ok(())
            }
        }
    }
}

impl TaskRegistry for SqliteTaskRegistry {
    fn create(&self, filename: &str, query: &str) -> Result<String, RegistryError> {
        let conn = self.lock()?;
        let created_at = Utc::now();

        for _ in 0..MAX_ID_ATTEMPTS {
            let task_id = Uuid::new_v4().to_string();
            let inserted = conn.execute(
                "INSERT INTO analysis_results (id, task_id, filename, query, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, 'pending', ?5)",
                params![Uuid::new_v4().to_string(), task_id, filename, query, created_at],
            );

            match inserted {
                Ok(_) => {
                    tracing::debug!(task_id = %task_id, filename, "Task created");
                    return Ok(task_id);
                }
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == ErrorCode::ConstraintViolation =>
                {
                    tracing::warn!(task_id = %task_id, "Task id collision, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(RegistryError::IdAllocation(MAX_ID_ATTEMPTS))
    }

    fn mark_running(&self, task_id: &str) {
        let outcome = self.lock().and_then(|conn| {
            conn.execute(
                "UPDATE analysis_results SET status = 'running'
                 WHERE task_id = ?1 AND status = 'pending'",
                params![task_id],
            )
            .map_err(RegistryError::from)
        });

        match outcome {
            Ok(0) => tracing::debug!(task_id, "Task not pending, status left unchanged"),
            Ok(_) => tracing::debug!(task_id, "Task running"),
            Err(e) => tracing::error!(task_id, error = %e, "Failed to mark task running"),
        }
    }

    fn update_result(
        &self,
        task_id: &str,
        result: &str,
        output_path: Option<&str>,
        status: TaskStatus,
    ) {
        if !status.is_terminal() {
            tracing::error!(task_id, status = %status, "Result write requires a terminal status");
            return;
        }

        match self.try_update_result(task_id, result, output_path, status) {
            Ok(()) => tracing::debug!(task_id, status = %status, "Task result stored"),
            Err(RegistryError::NotFound(_)) => {
                tracing::warn!(task_id, "Result write for unknown task dropped");
            }
            Err(e) => tracing::error!(task_id, error = %e, "Failed to store task result"),
        }
    }

    fn get(&self, task_id: &str) -> Result<TaskRecord, RegistryError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT task_id, filename, query, status, result, output_path, created_at, completed_at
                 FROM analysis_results WHERE task_id = ?1",
                params![task_id],
                |row| {
                    Ok(TaskRow {
                        task_id: row.get(0)?,
                        filename: row.get(1)?,
                        query: row.get(2)?,
                        status: row.get(3)?,
                        result: row.get(4)?,
                        output_path: row.get(5)?,
                        created_at: row.get(6)?,
                        completed_at: row.get(7)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| RegistryError::NotFound(task_id.to_string()))?;

        record_from_row(row)
    }
}

struct TaskRow {
    task_id: String,
    filename: String,
    query: String,
    status: String,
    result: Option<String>,
    output_path: Option<String>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

fn record_from_row(row: TaskRow) -> Result<TaskRecord, RegistryError> {
    Ok(TaskRecord {
        task_id: row.task_id,
        filename: row.filename,
        query: row.query,
        status: row.status.parse()?,
        result: row.result,
        output_path: row.output_path,
        created_at: row.created_at,
        completed_at: row.completed_at,
    })
}
