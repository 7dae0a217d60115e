//! Error types for filescout.
//!
//! Errors fall into two groups. Parameter errors (labels, paths, regexes, size and
//! mtime expressions, hashes, byte signatures) are raised before any directory is
//! opened and abort the whole invocation. Per-file errors (missing files, denied
//! permissions, unreadable data) are recorded in the run's error log and the walk
//! moves on. `SearchError::is_fatal` tells the two apart.
//!
//! ```rust,ignore
//! match filescout::execute(&params) {
//!     result if result.success => // Process elements,
//!     result => // Inspect result.errors
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// Result type for search operations
pub type SearchResult<T> = Result<T, SearchError>;

/// Errors that can occur while compiling or running searches
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),
    #[error("Invalid label '{label}': {reason}")]
    InvalidLabel { label: String, reason: String },
    #[error("Invalid search '{label}': {reason}")]
    InvalidSearch { label: String, reason: String },
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),
    #[error("Invalid size: {0}")]
    InvalidSize(String),
    #[error("Invalid mtime: {0}")]
    InvalidMtime(String),
    #[error("Invalid hash: {0}")]
    InvalidHash(String),
    #[error("Invalid byte pattern: {0}")]
    InvalidBytes(String),
    #[error("Invalid mismatch filter: {0}")]
    InvalidMismatch(String),
    #[error("Match aggregator for search '{0}' has stopped")]
    AggregatorStopped(String),
    #[error("Failed to read {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),
}

impl SearchError {
    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound(path.into())
    }

    pub fn permission_denied(path: impl Into<PathBuf>) -> Self {
        Self::PermissionDenied(path.into())
    }

    pub fn invalid_label(label: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidLabel {
            label: label.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_search(label: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSearch {
            label: label.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_pattern(pattern: impl Into<String>) -> Self {
        Self::InvalidPattern(pattern.into())
    }

    pub fn invalid_size(size: impl Into<String>) -> Self {
        Self::InvalidSize(size.into())
    }

    pub fn invalid_mtime(mtime: impl Into<String>) -> Self {
        Self::InvalidMtime(mtime.into())
    }

    pub fn invalid_hash(hash: impl Into<String>) -> Self {
        Self::InvalidHash(hash.into())
    }

    pub fn invalid_bytes(bytes: impl Into<String>) -> Self {
        Self::InvalidBytes(bytes.into())
    }

    pub fn invalid_mismatch(filter: impl Into<String>) -> Self {
        Self::InvalidMismatch(filter.into())
    }

    pub fn aggregator_stopped(label: impl Into<String>) -> Self {
        Self::AggregatorStopped(label.into())
    }

    /// Maps an I/O failure on `path` to the most specific variant.
    pub fn from_io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        let path = path.into();
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::FileNotFound(path),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(path),
            _ => Self::ReadError { path, source: err },
        }
    }

    /// Fatal errors end the invocation; everything else is logged and skipped.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::AggregatorStopped(_))
    }
}
