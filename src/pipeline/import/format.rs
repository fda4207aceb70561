use std::path::Path;

use super::IngestionError;

/// Every PDF starts with this header, whatever its extension claims.
pub const PDF_MAGIC: &[u8] = b"%PDF-";

/// Filename check: case-insensitive `.pdf` extension.
pub fn has_pdf_extension(filename: &str) -> bool {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

/// Content check: leading magic bytes.
pub fn has_pdf_magic(bytes: &[u8]) -> bool {
    bytes.starts_with(PDF_MAGIC)
}

/// Accept an upload only when both its name and its content say PDF.
pub fn validate_pdf(filename: &str, bytes: &[u8], max_bytes: usize) -> Result<(), IngestionError> {
    if !has_pdf_extension(filename) {
        return Err(IngestionError::NotPdf(filename.to_string()));
    }
    if bytes.is_empty() {
        return Err(IngestionError::Empty);
    }
    if bytes.len() > max_bytes {
        return Err(IngestionError::TooLarge {
            size_mb: bytes.len() as f64 / (1024.0 * 1024.0),
            max_mb: (max_bytes / (1024 * 1024)) as u64,
        });
    }
    if !has_pdf_magic(bytes) {
        return Err(IngestionError::NotPdf(format!(
            "{filename} (content is not a PDF)"
        )));
    }
    Ok(())
}

/// Longest sanitised filename, in characters.
const MAX_FILENAME_CHARS: usize = 255;

/// Strip any client-supplied directory part and control characters, and cap
/// the length by shortening the stem so the extension survives.
/// The result is only ever used for display and records, never as a path.
pub fn sanitize_filename(original: &str) -> String {
    let name = original
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();

    let clean: String = name.chars().filter(|c| !c.is_control()).collect();
    let clean = clean.trim();

    if clean.is_empty() || clean == "." || clean == ".." {
        return "document.pdf".to_string();
    }
    if clean.chars().count() <= MAX_FILENAME_CHARS {
        return clean.to_string();
    }

    let (stem, extension) = match clean.rfind('.') {
        Some(dot) if dot > 0 && clean.len() - dot <= 16 => clean.split_at(dot),
        _ => (clean, ""),
    };
    let keep = MAX_FILENAME_CHARS.saturating_sub(extension.chars().count());
    let mut short: String = stem.chars().take(keep).collect();
    short.push_str(extension);
    short
}
