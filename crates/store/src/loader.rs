//! Page loading for source documents.
//!
//! `.pdf` files are converted with the `pdftotext` tool from poppler-utils;
//! `.txt` files are read directly. In both cases pages are separated by form
//! feeds (`\f`) and numbered from zero.

use pagewise_core::error::IngestError;
use std::path::Path;
use tracing::debug;

/// One page of a source document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// Zero-based page number
    pub number: u32,
    pub text: String,
}

/// Load a document as a list of pages.
pub async fn load_pages(path: &Path) -> Result<Vec<Page>, IngestError> {
    if !path.exists() {
        return Err(IngestError::Read {
            path: path.display().to_string(),
            reason: "file not found".into(),
        });
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    let text = match extension.as_str() {
        "pdf" => pdf_to_text(path).await?,
        "txt" | "text" | "md" => {
            tokio::fs::read_to_string(path)
                .await
                .map_err(|e| IngestError::Read {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?
        }
        other => return Err(IngestError::UnsupportedFormat(other.to_string())),
    };

    let pages = split_pages(&text);
    debug!(path = %path.display(), pages = pages.len(), "Loaded document");

    if pages.iter().all(|p| p.text.trim().is_empty()) {
        return Err(IngestError::EmptyDocument(path.display().to_string()));
    }

    Ok(pages)
}

/// Split form-feed separated text into numbered pages.
///
/// A trailing form feed does not start an extra page.
pub fn split_pages(text: &str) -> Vec<Page> {
    let text = text.strip_suffix('\u{c}').unwrap_or(text);
    text.split('\u{c}')
        .enumerate()
        .map(|(i, t)| Page {
            number: i as u32,
            text: t.to_string(),
        })
        .collect()
}

async fn pdf_to_text(path: &Path) -> Result<String, IngestError> {
    let output = tokio::process::Command::new("pdftotext")
        .arg("-enc")
        .arg("UTF-8")
        .arg(path)
        .arg("-")
        .output()
        .await
        .map_err(|e| IngestError::Conversion {
            path: path.display().to_string(),
            reason: format!("could not run pdftotext (is poppler-utils installed?): {e}"),
        })?;

    if !output.status.success() {
        return Err(IngestError::Conversion {
            path: path.display().to_string(),
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
