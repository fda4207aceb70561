//! `GET /status/:task_id`: poll a task.

use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::registry::{TaskRecord, TaskStatus};

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub task_id: String,
    pub status: TaskStatus,
    pub filename: String,
    pub query: String,
    /// Aggregated analysis, only once completed.
    pub result: Option<Value>,
    /// Failure description, only once failed.
    pub error: Option<String>,
    pub output_file: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<TaskRecord> for StatusResponse {
    fn from(record: TaskRecord) -> Self {
        let (result, error) = match record.status {
            TaskStatus::Completed => (
                record
                    .result
                    .map(|raw| serde_json::from_str(&raw).unwrap_or(Value::String(raw))),
                None,
            ),
            TaskStatus::Failed => (None, record.result),
            TaskStatus::Pending | TaskStatus::Running => (None, None),
        };

        Self {
            task_id: record.task_id,
            status: record.status,
            filename: record.filename,
            query: record.query,
            result,
            error,
            output_file: record.output_path,
            created_at: record.created_at,
            completed_at: record.completed_at,
        }
    }
}

pub async fn get_status(
    State(ctx): State<ApiContext>,
    Path(task_id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let record = ctx.registry.get(&task_id)?;
    Ok(Json(record.into()))
}
