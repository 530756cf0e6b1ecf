//! Error types for docharvest.
//!
//! Library crates use [`HarvestError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all docharvest operations.
#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// The change query could not complete. Fatal for a run.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// Network/HTTP error while fetching a single item.
    #[error("network error: {0}")]
    Network(String),

    /// Payload parsing error (JSON, HTML, API response shape).
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Run ledger or blob store error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Invalid argument or data shape.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Document conversion error (segmentation input, Markdown rendering).
    #[error("conversion error: {0}")]
    Conversion(String),

    /// A unit of work exceeded its deadline.
    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Work abandoned before it produced a result (cancelled run, dead worker).
    #[error("cancelled: {0}")]
    Cancelled(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, HarvestError>;

impl HarvestError {
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

    /// Whether this error must terminate the whole pipeline run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::SourceUnavailable(_) | Self::Config { .. })
    }
}
