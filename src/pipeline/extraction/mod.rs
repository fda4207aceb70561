//! Document text extraction.

pub mod pdf;

pub use pdf::*;

use std::path::Path;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("PDF parsing failed: {0}")]
    PdfParsing(String),

    #[error("Document contains no extractable text")]
    NoText,

    #[error("Extraction worker failed: {0}")]
    Worker(String),
}

/// Turns a staged document into plain text.
///
/// Synchronous: callers run it on the blocking pool.
pub trait DocumentReader: Send + Sync {
    fn read_text(&self, path: &Path) -> Result<String, ExtractionError>;
}
