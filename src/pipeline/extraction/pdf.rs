use std::path::Path;

use super::{DocumentReader, ExtractionError};

/// Text-layer PDF reader backed by the pdf-extract crate.
/// Scanned (image-only) PDFs yield `NoText`.
pub struct PdfTextReader;

impl DocumentReader for PdfTextReader {
    fn read_text(&self, path: &Path) -> Result<String, ExtractionError> {
        let bytes = std::fs::read(path)?;
        let raw = pdf_extract::extract_text_from_mem(&bytes)
            .map_err(|e| ExtractionError::PdfParsing(e.to_string()))?;

        let text = collapse_blank_lines(&raw);
        if text.trim().is_empty() {
            return Err(ExtractionError::NoText);
        }

        tracing::debug!(
            path = %path.display(),
            chars = text.len(),
            "PDF text extracted"
        );
        Ok(text)
    }
}

/// Drop empty lines so page breaks and layout gaps don't pad the prompt.
pub fn collapse_blank_lines(raw: &str) -> String {
    raw.split('\n')
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
