//! Write-once JSON snapshots of finished runs.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

#[derive(Error, Debug)]
pub enum ArchivalError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Everything recorded about one finished run, successful or not.
#[derive(Debug, Serialize)]
pub struct ArchiveEntry<'a> {
    pub task_id: &'a str,
    pub timestamp: DateTime<Utc>,
    pub query: &'a str,
    pub file_processed: &'a str,
    pub analysis: &'a Value,
}

/// Durable store for analysis snapshots. Returns where the entry was written.
#[async_trait]
pub trait ResultArchive: Send + Sync {
    async fn store(&self, entry: &ArchiveEntry<'_>) -> Result<String, ArchivalError>;
}

/// One JSON file per run under the output directory; existing files are never replaced.
pub struct FsResultArchive {
    output_dir: PathBuf,
}

impl FsResultArchive {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    fn file_name(entry: &ArchiveEntry<'_>) -> String {
        format!(
            "analysis_{}_{}.json",
            entry.timestamp.format("%Y%m%d_%H%M%S"),
            entry.task_id
        )
    }
}

#[async_trait]
impl ResultArchive for FsResultArchive {
    async fn store(&self, entry: &ArchiveEntry<'_>) -> Result<String, ArchivalError> {
        let body = serde_json::to_vec_pretty(entry)?;

        tokio::fs::create_dir_all(&self.output_dir).await?;
        let path = self.output_dir.join(Self::file_name(entry));

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        file.write_all(&body).await?;
        file.flush().await?;

        let location = path.display().to_string();
        tracing::info!(task_id = entry.task_id, path = %location, "Analysis archived");
        Ok(location)
    }
}
