use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::sync::OnceCell;
use uuid::Uuid;

use super::{sanitize_filename, validate_pdf, IngestionError};
use crate::pipeline::extraction::{DocumentReader, ExtractionError};

const STAGED_PREFIX: &str = "financial_document_";

/// Working directory for uploads awaiting analysis.
pub struct DocumentStore {
    data_dir: PathBuf,
    max_bytes: usize,
}

impl DocumentStore {
    pub fn new(data_dir: impl Into<PathBuf>, max_bytes: usize) -> Self {
        Self {
            data_dir: data_dir.into(),
            max_bytes,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Validate an upload and write it to `financial_document_{uuid}.pdf`.
    ///
    /// Nothing is left on disk when validation or the write fails.
    pub async fn ingest(
        &self,
        filename: &str,
        bytes: &[u8],
    ) -> Result<DocumentHandle, IngestionError> {
        let original_name = sanitize_filename(filename);
        validate_pdf(&original_name, bytes, self.max_bytes)?;

        tokio::fs::create_dir_all(&self.data_dir).await?;
        let path = self
            .data_dir
            .join(format!("{STAGED_PREFIX}{}.pdf", Uuid::new_v4()));

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;

        // From here on the handle owns the file, so an early return removes it.
        let handle = DocumentHandle::new(path, original_name);
        file.write_all(bytes).await?;
        file.flush().await?;

        tracing::debug!(
            path = %handle.path.display(),
            original = %handle.original_name,
            size = bytes.len(),
            "Document staged"
        );
        Ok(handle)
    }

    /// Remove staged documents left behind by a previous process.
    pub fn purge_orphans(&self) -> usize {
        let entries = match std::fs::read_dir(&self.data_dir) {
            Ok(entries) => entries,
            Err(_) => return 0,
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(STAGED_PREFIX) && name.ends_with(".pdf") {
                match std::fs::remove_file(entry.path()) {
                    Ok(()) => removed += 1,
                    Err(e) => tracing::warn!(file = %name, error = %e, "Could not remove orphaned document"),
                }
            }
        }

        if removed > 0 {
            tracing::info!(removed, "Removed orphaned staged documents");
        }
        removed
    }
}

/// A staged upload owned by exactly one pipeline run.
///
/// Dropping the handle deletes the file, whichever way the run ends.
#[derive(Debug)]
pub struct DocumentHandle {
    path: PathBuf,
    original_name: String,
    text: OnceCell<String>,
}

impl DocumentHandle {
    fn new(path: PathBuf, original_name: String) -> Self {
        Self {
            path,
            original_name,
            text: OnceCell::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Client-supplied name, sanitised.
    pub fn original_name(&self) -> &str {
        &self.original_name
    }

    /// Extracted document text. The reader runs on the blocking pool at most
    /// once per handle; later stages get the cached text.
    pub async fn text(&self, reader: &Arc<dyn DocumentReader>) -> Result<&str, ExtractionError> {
        self.text
            .get_or_try_init(|| async {
                let reader = Arc::clone(reader);
                let path = self.path.clone();
                tokio::task::spawn_blocking(move || reader.read_text(&path))
                    .await
                    .map_err(|e| ExtractionError::Worker(e.to_string()))?
            })
            .await
            .map(String::as_str)
    }
}

impl Drop for DocumentHandle {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "Staged document removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to remove staged document"
            ),
        }
    }
}
