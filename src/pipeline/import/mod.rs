//! Document ingestion: validate an uploaded PDF and stage it for one pipeline run.

pub mod format;
pub mod staging;

pub use format::*;
pub use staging::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("Only PDF files are supported (got {0})")]
    NotPdf(String),

    #[error("Uploaded file is empty")]
    Empty,

    #[error("File too large: {size_mb:.1}MB exceeds {max_mb}MB limit")]
    TooLarge { size_mb: f64, max_mb: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
