//! PDF text extraction.

use std::path::Path;

use crate::errors::{RagError, RagResult};

/// Extracts the text of every page, concatenated in page order.
pub fn extract_text(path: &Path) -> RagResult<String> {
    if !path.exists() {
        return Err(RagError::Pdf(format!(
            "input PDF not found: {}",
            path.display()
        )));
    }
    let bytes = std::fs::read(path)?;
    let text = pdf_extract::extract_text_from_mem(&bytes)
        .map_err(|e| RagError::Pdf(format!("text extraction failed for {}: {e}", path.display())))?;
    tracing::info!(
        path = %path.display(),
        chars = text.chars().count(),
        pages = text.matches('\x0C').count() + 1,
        "PDF text extracted"
    );
    Ok(text)
}
