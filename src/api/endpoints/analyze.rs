//! `POST /analyze`: accept a PDF plus a query and start the pipeline in the background.

use axum::extract::{Multipart, State};
use axum::Json;
use serde::Serialize;

use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::config::DEFAULT_QUERY;
use crate::registry::TaskStatus;

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub status: TaskStatus,
    pub task_id: String,
    pub file_received: String,
    pub check_status_at: String,
}

struct Upload {
    filename: String,
    bytes: Vec<u8>,
}

/// Validate and stage the upload, create a pending task, hand it to the
/// scheduler and answer right away. Nothing is recorded for rejected uploads.
pub async fn submit(
    State(ctx): State<ApiContext>,
    multipart: Multipart,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let (upload, query) = read_form(multipart).await?;
    let upload = upload.ok_or_else(|| ApiError::BadRequest("Missing 'file' field".into()))?;
    let query = normalize_query(query.as_deref());

    let handle = ctx.documents.ingest(&upload.filename, &upload.bytes).await?;
    let filename = handle.original_name().to_string();

    let task_id = ctx.registry.create(&filename, &query)?;

    let work = {
        let orchestrator = ctx.orchestrator.clone();
        let task_id = task_id.clone();
        let query = query.clone();
        let filename = filename.clone();
        async move {
            orchestrator.run(&task_id, &query, handle, &filename).await;
        }
    };

    if let Err(e) = ctx.scheduler.submit(&task_id, work) {
        // The dropped work item took the staged document with it.
        ctx.registry
            .update_result(&task_id, &format!("submission failed: {e}"), None, TaskStatus::Failed);
        return Err(e.into());
    }

    tracing::info!(task_id = %task_id, filename = %filename, "Analysis submitted");

    Ok(Json(AnalyzeResponse {
        status: TaskStatus::Pending,
        check_status_at: format!("/status/{task_id}"),
        task_id,
        file_received: filename,
    }))
}

async fn read_form(mut multipart: Multipart) -> Result<(Option<Upload>, Option<String>), ApiError> {
    let mut upload = None;
    let mut query = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or("document.pdf").to_string();
                let bytes = field.bytes().await?;
                upload = Some(Upload {
                    filename,
                    bytes: bytes.to_vec(),
                });
            }
            "query" => query = Some(field.text().await?),
            other => tracing::debug!(field = other, "Ignoring unknown form field"),
        }
    }

    Ok((upload, query))
}

/// Trimmed query, or the default when nothing meaningful was sent.
pub fn normalize_query(raw: Option<&str>) -> String {
    match raw.map(str::trim) {
        Some(q) if !q.is_empty() => q.to_string(),
        _ => DEFAULT_QUERY.to_string(),
    }
}
