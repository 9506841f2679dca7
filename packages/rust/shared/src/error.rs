//! Error types for imageset.
//!
//! Library crates use [`DatasetError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Only [`DatasetError::Analysis`] (and setup errors such as config or I/O)
//! ever reach the caller of a dataset build. Search, scrape, fetch and caption
//! errors are absorbed by the component that produced them and only logged.

use std::path::PathBuf;

/// Top-level error type for all imageset operations.
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Prompt analysis / domain expansion failed. Fatal for a build.
    #[error("analysis error: {0}")]
    Analysis(String),

    /// One query's image search failed.
    #[error("search error: {0}")]
    Search(String),

    /// Page context extraction failed.
    #[error("scrape error: {0}")]
    Scrape(String),

    /// Image download, decode or write failed.
    #[error("fetch error: {0}")]
    Fetch(String),

    /// Caption generation failed.
    #[error("caption error: {0}")]
    Caption(String),

    /// Network/HTTP error.
    #[error("network error: {0}")]
    Network(String),

    /// Response or document parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (invariant violation, bad input, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DatasetError>;

impl DatasetError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create an analysis error from any displayable message.
    pub fn analysis(msg: impl Into<String>) -> Self {
        Self::Analysis(msg.into())
    }

    /// Create a search error from any displayable message.
    pub fn search(msg: impl Into<String>) -> Self {
        Self::Search(msg.into())
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
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
        let err = DatasetError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = DatasetError::analysis("model returned no domains");
        assert_eq!(err.to_string(), "analysis error: model returned no domains");

        let err = DatasetError::validation("total_images 3 != 2 images");
        assert!(err.to_string().contains("total_images 3"));
    }

    #[test]
    fn io_error_keeps_path() {
        let err = DatasetError::io(
            "/tmp/out/metadata.json",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = err.to_string();
        assert!(msg.contains("metadata.json"));
        assert!(msg.contains("denied"));
    }
}
