//! Error types for filesystem operations.

use std::io;

use thiserror::Error;

/// Result type for filesystem operations.
pub type FsResult<T> = Result<T, FsError>;

/// Errors that can occur while talking to a storage backend.
///
/// Every I/O-shaped variant carries the path or pattern the operation was
/// working on so callers never have to re-attach context.
#[derive(Debug, Error)]
pub enum FsError {
    /// Nothing exists at the specified location.
    #[error("not found: {path}")]
    NotFound { path: String },

    /// The path is not addressable on this backend.
    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// Malformed glob pattern.
    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// I/O error on a local or mounted filesystem.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Error reported by a remote backend (S3/GCS/SFTP/SMB).
    #[error("backend error on '{path}': {source}")]
    Backend {
        path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The stream handed to `write` did not match its declared length.
    #[error("content length mismatch on '{path}': declared {declared}, received {received}")]
    LengthMismatch {
        path: String,
        declared: u64,
        received: u64,
    },

    /// Backend or URL scheme not supported by this build.
    #[error("unsupported backend: {scheme}")]
    UnsupportedBackend { scheme: String },

    /// Connection parameters could not be turned into an adapter.
    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    /// The operation was cancelled before it completed.
    #[error("operation cancelled")]
    Cancelled,
}

impl FsError {
    /// Wrap an [`io::Error`], mapping `NotFound` onto [`FsError::NotFound`].
    pub fn io(path: impl Into<String>, source: io::Error) -> Self {
        let path = path.into();
        if source.kind() == io::ErrorKind::NotFound {
            FsError::NotFound { path }
        } else {
            FsError::Io { path, source }
        }
    }

    pub fn backend(
        path: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        FsError::Backend {
            path: path.into(),
            source: source.into(),
        }
    }

    /// Wrap an `object_store` error for the given backend-relative path.
    pub fn object_store(path: impl Into<String>, source: object_store::Error) -> Self {
        match source {
            object_store::Error::NotFound { .. } => FsError::NotFound { path: path.into() },
            source => FsError::backend(path, source),
        }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        FsError::Config {
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, FsError::NotFound { .. })
    }
}
