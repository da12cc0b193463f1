//! Document ingestion: the extraction boundary of the pipeline.
//!
//! Plain-text sources are read directly; PDF sources go through `pdf-extract`.
//! Callers either want the whole text ([`load_text`]) or a page-segmented
//! view ([`load_pages`]) for page-by-page analysis.

use std::path::Path;

use tracing::{debug, info};

use bidforge_shared::{BidforgeError, Result};

// ---------------------------------------------------------------------------
// Source formats
// ---------------------------------------------------------------------------

/// Requirement/tender source format, inferred from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Json,
    Csv,
    Markdown,
    Pdf,
    /// Anything else: treated as row-delimited text.
    Text,
}

impl SourceFormat {
    /// Infer the format from a path's extension (case-insensitive).
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("json") => Self::Json,
            Some("csv") => Self::Csv,
            Some("md") | Some("markdown") => Self::Markdown,
            Some("pdf") => Self::Pdf,
            _ => Self::Text,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
            Self::Markdown => "markdown",
            Self::Pdf => "pdf",
            Self::Text => "text",
        }
    }
}

// ---------------------------------------------------------------------------
// Pages
// ---------------------------------------------------------------------------

/// One page of an extracted document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentPage {
    /// 1-based page number.
    pub page: usize,
    pub text: String,
    /// Character count of the extracted text.
    pub content_length: usize,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load a document's full text. PDF sources are extracted; everything else
/// is read as UTF-8.
pub fn load_text(path: &Path) -> Result<String> {
    match SourceFormat::from_path(path) {
        SourceFormat::Pdf => {
            info!(path = %path.display(), "extracting PDF text");
            pdf_extract::extract_text(path)
                .map_err(|e| BidforgeError::parse(format!("PDF extraction failed: {e}")))
        }
        _ => std::fs::read_to_string(path).map_err(|e| BidforgeError::io(path, e)),
    }
}

/// Load a document as a sequence of pages.
///
/// Page boundaries come from form feeds in the extracted text; a document
/// without any yields a single page. Blank pages are dropped.
pub fn load_pages(path: &Path) -> Result<Vec<DocumentPage>> {
    let text = load_text(path)?;
    let pages = split_pages(&text);
    debug!(path = %path.display(), pages = pages.len(), "document segmented");
    Ok(pages)
}

/// Split extracted text into pages on form-feed boundaries.
fn split_pages(text: &str) -> Vec<DocumentPage> {
    text.split('\u{0C}')
        .filter(|chunk| !chunk.trim().is_empty())
        .enumerate()
        .map(|(i, chunk)| {
            let trimmed = chunk.trim();
            DocumentPage {
                page: i + 1,
                text: trimmed.to_string(),
                content_length: trimmed.chars().count(),
            }
        })
        .collect()
}
