//! Error types for bidforge.
//!
//! Library crates use [`BidforgeError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all bidforge operations.
#[derive(Debug, thiserror::Error)]
pub enum BidforgeError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Transient failure talking to the generation service (network error,
    /// rate limit, malformed success envelope). Retried with backoff; this
    /// variant surfaces once the retry budget is spent.
    #[error("transport error: {0}")]
    Transport(String),

    /// The generation service rejected the request outright.
    #[error("model rejected request: {0}")]
    BadRequest(String),

    /// Every configured model identifier rejected the request.
    #[error("all models exhausted, last error: {last_error}")]
    ModelsExhausted { last_error: String },

    /// Model output could not be parsed as JSON, even after one repair call.
    /// Carries the raw text for diagnosis.
    #[error("model output is not valid JSON: {message}")]
    InvalidJson { message: String, raw: String },

    /// Requirement-source or response parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// The requirement source has no deterministic parser and semantic
    /// parsing is disabled.
    #[error("{format} requirements need semantic parsing; re-run without --no-llm")]
    SemanticParsingRequired { format: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// LaTeX rendering or template error.
    #[error("render error: {0}")]
    Render(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, BidforgeError>;

impl BidforgeError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = BidforgeError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = BidforgeError::ModelsExhausted {
            last_error: "HTTP 400".into(),
        };
        assert!(err.to_string().contains("all models exhausted"));

        let err = BidforgeError::SemanticParsingRequired {
            format: "pdf".into(),
        };
        assert!(err.to_string().contains("semantic parsing"));
    }

    #[test]
    fn invalid_json_keeps_raw_text() {
        let err = BidforgeError::InvalidJson {
            message: "expected value at line 1".into(),
            raw: "Sure! Here is the JSON you asked for:".into(),
        };
        match err {
            BidforgeError::InvalidJson { raw, .. } => {
                assert!(raw.starts_with("Sure!"));
            }
            _ => panic!("expected InvalidJson"),
        }
    }
}
