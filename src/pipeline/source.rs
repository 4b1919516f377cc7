//! Source batch resolution: validate a payslip batch and load it with lopdf.
//!
//! Validation happens before the splitter wipes its output directory, so a
//! typo in the source path costs nothing. We check the `%PDF` magic bytes
//! ourselves to give callers a meaningful error instead of a parser failure.

use crate::error::DispatchError;
use lopdf::Document;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Validate that `path` exists, is readable and starts with `%PDF`.
pub fn resolve_source(path: &Path) -> Result<PathBuf, DispatchError> {
    let path = path.to_path_buf();

    if !path.exists() {
        return Err(DispatchError::FileNotFound { path });
    }

    match std::fs::File::open(&path) {
        Ok(mut f) => {
            let mut magic = [0u8; 4];
            if f.read_exact(&mut magic).is_ok() && &magic != b"%PDF" {
                return Err(DispatchError::NotAPdf { path, magic });
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(DispatchError::PermissionDenied { path });
        }
        Err(_) => {
            return Err(DispatchError::FileNotFound { path });
        }
    }

    debug!("Resolved source PDF: {}", path.display());
    Ok(path)
}

/// Parse the batch. Encrypted batches are refused.
pub fn load_document(path: &Path) -> Result<Document, DispatchError> {
    let document = Document::load(path).map_err(|e| DispatchError::CorruptPdf {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;

    if document.is_encrypted() {
        return Err(DispatchError::PasswordRequired {
            path: path.to_path_buf(),
        });
    }

    Ok(document)
}

/// 1-based page numbers of the document, in page order.
pub fn page_numbers(document: &Document) -> Vec<u32> {
    document.get_pages().keys().copied().collect()
}

/// Text of one page, or `None` when the content stream cannot be decoded.
pub fn page_text(document: &Document, page_number: u32) -> Option<String> {
    match document.extract_text(&[page_number]) {
        Ok(text) => Some(text),
        Err(e) => {
            debug!("Page {}: text extraction failed: {}", page_number, e);
            None
        }
    }
}
