//! Domain-specific error types and error handling utilities.
//!
//! This module defines [`StatusCacheError`], the single error type surfaced by the
//! cache's mutating paths, and [`BackendError`], the raw failure reported by a
//! version-control backend.
//!
//! # Public API
//! - [`StatusCacheError`]: Main error enum covering all failure modes
//! - [`BackendError`]: Human-readable backend failure with message classifiers
//! - [`Result<T>`]: Type alias for `std::result::Result<T, StatusCacheError>`
//!
//! # Error Categories
//! - **Backend operations**: remove/move/copy/add failures wrapped with their cause
//! - **Repository access**: git2 library errors, paths outside any working copy
//! - **Persistence**: snapshot and configuration read/write failures
//!
//! Read paths of the cache never return these errors; they degrade to a
//! best-effort status instead.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Failure reported by a version-control backend.
///
/// Backends only give us a message. The two classifiers below are the only
/// places that look inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError {
    message: String,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Error for an operation the backend has no equivalent for
    pub fn unsupported(operation: &str) -> Self {
        Self::new(format!("operation '{operation}' is not supported by this backend"))
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The file turned out not to be under version control
    pub fn is_unversioned(&self) -> bool {
        let msg = self.message.to_ascii_lowercase();
        msg.contains("not under version control")
            || msg.contains("did not match any files")
            || msg.contains("is not a working copy")
            || msg.contains("unversioned")
            || msg.contains("not versioned")
    }

    /// A concurrent backend process holds the working copy lock
    pub fn is_working_copy_locked(&self) -> bool {
        let msg = self.message.to_ascii_lowercase();
        msg.contains("index.lock")
            || msg.contains("working copy locked")
            || msg.contains("is locked")
            || msg.contains("e155004")
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for BackendError {}

impl From<git2::Error> for BackendError {
    fn from(err: git2::Error) -> Self {
        Self::new(err.message())
    }
}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// Domain-specific error types for the status cache
#[derive(Error, Debug)]
pub enum StatusCacheError {
    #[error("Not inside a version-controlled working copy")]
    NotInWorkingCopy,

    #[error("Git repository error: {0}")]
    GitRepo(#[from] git2::Error),

    #[error("File does not exist: {path}")]
    FileNotFound { path: PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid status name: '{name}'")]
    InvalidStatusName { name: String },

    // Interceptor failures, always carrying the backend cause
    #[error("{operation} failed for '{path}': {source}")]
    Operation {
        operation: &'static str,
        path: PathBuf,
        source: BackendError,
    },

    // Persistence errors
    #[error("Could not find cache directory")]
    CacheDirectoryNotFound,

    #[error("Failed to create cache directory '{path}': {source}")]
    CacheDirectoryCreationFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write snapshot file '{path}': {source}")]
    SnapshotWriteFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to read snapshot file '{path}': {source}")]
    SnapshotReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse snapshot file '{path}': {source}")]
    SnapshotParseFailed {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Failed to start background worker: {source}")]
    WorkerSpawnFailed { source: std::io::Error },
}

/// Convenience type alias for Results using StatusCacheError
pub type Result<T> = std::result::Result<T, StatusCacheError>;

impl StatusCacheError {
    /// Wrap a backend failure of a mutating operation
    pub fn operation(
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: BackendError,
    ) -> Self {
        Self::Operation {
            operation,
            path: path.into(),
            source,
        }
    }

    /// Create a file not found error
    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    /// Create an invalid status name error
    pub fn invalid_status_name(name: impl Into<String>) -> Self {
        Self::InvalidStatusName { name: name.into() }
    }

    /// Create a cache directory creation failed error
    pub fn cache_directory_creation_failed(
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        Self::CacheDirectoryCreationFailed {
            path: path.into(),
            source,
        }
    }

    /// Create a snapshot write failed error
    pub fn snapshot_write_failed(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::SnapshotWriteFailed {
            path: path.into(),
            source,
        }
    }

    /// Create a snapshot read failed error
    pub fn snapshot_read_failed(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::SnapshotReadFailed {
            path: path.into(),
            source,
        }
    }

    /// Create a snapshot parse failed error
    pub fn snapshot_parse_failed(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::SnapshotParseFailed {
            path: path.into(),
            source,
        }
    }

    /// The backend error behind an interceptor failure, if any
    pub fn backend_cause(&self) -> Option<&BackendError> {
        match self {
            Self::Operation { source, .. } => Some(source),
            _ => None,
        }
    }
}
