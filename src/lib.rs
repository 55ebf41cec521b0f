//! Streaming artifact ingestion on top of [`artifact_fs`].
//!
//! An [`Ingestor`] takes a byte source and a destination [`Filesystem`] and,
//! in a single pass, computes the SHA-256 checksum, captures a bounded prefix
//! for content-type detection and writes the bytes out. Once the destination
//! has accepted everything, an [`Artifact`] record is built from the
//! destination's own view of the object and handed to an [`ArtifactStore`].
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use artifacts::{IngestRequest, Ingestor, InMemoryArtifactStore};
//! use artifact_fs::LocalFs;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), artifacts::IngestError> {
//! let fs = LocalFs::new("/srv/artifacts");
//! let ingestor = Ingestor::new(Arc::new(InMemoryArtifactStore::new()));
//!
//! let request = IngestRequest::new("reports/daily.txt", "0123456789");
//! let artifact = ingestor.ingest(&fs, request, &CancellationToken::new()).await?;
//! assert_eq!(artifact.size, 10);
//! # Ok(())
//! # }
//! ```
//!
//! [`Filesystem`]: artifact_fs::Filesystem

mod artifact;
pub mod config;
mod content;
mod error;
mod ingest;
pub mod metrics;
pub mod sniff;
mod store;
pub mod tracing;

pub use artifact::Artifact;
pub use config::{AppConfig, IngestConfig};
pub use content::{ArtifactContent, SeekableRead};
pub use error::IngestError;
pub use ingest::{IngestRequest, Ingestor};
pub use store::{ArtifactStore, InMemoryArtifactStore, JsonLinesArtifactStore};
