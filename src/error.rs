//! Ingestion errors.

use std::io;

use artifact_fs::FsError;
use thiserror::Error;

/// Why an ingestion produced no artifact.
///
/// Every variant names the destination path.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Reading the source failed.
    #[error("failed to read source for '{path}': {source}")]
    Source {
        path: String,
        #[source]
        source: io::Error,
    },

    /// The destination rejected the write.
    #[error("failed to write '{path}': {source}")]
    Destination {
        path: String,
        #[source]
        source: FsError,
    },

    /// The destination returned before consuming the whole source.
    #[error("destination for '{path}' stopped after {consumed} bytes")]
    Incomplete { path: String, consumed: u64 },

    /// The bytes were written but the metadata record could not be created.
    /// The object stays at `path`.
    #[error("failed to persist artifact for '{path}': {source}")]
    Persist {
        path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("ingestion of '{path}' was cancelled")]
    Cancelled { path: String },
}

impl IngestError {
    pub fn path(&self) -> &str {
        match self {
            IngestError::Source { path, .. }
            | IngestError::Destination { path, .. }
            | IngestError::Incomplete { path, .. }
            | IngestError::Persist { path, .. }
            | IngestError::Cancelled { path } => path,
        }
    }

    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            IngestError::Source { .. } => "source",
            IngestError::Destination { .. } => "destination",
            IngestError::Incomplete { .. } => "incomplete",
            IngestError::Persist { .. } => "persist",
            IngestError::Cancelled { .. } => "cancelled",
        }
    }
}
