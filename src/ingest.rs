//! Streaming artifact ingestion.
//!
//! One pass over the source feeds three consumers with identical bytes in
//! identical order: a SHA-256 digest, a bounded sniff buffer, and the
//! destination's `write`. The artifact record is only built and persisted
//! after the destination has accepted every byte.

use std::{
    io,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use artifact_fs::{ByteStream, ContentLength, Filesystem, WriteBody};
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures::{Stream, StreamExt};
use opentelemetry::{metrics::Meter, KeyValue};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    metrics::{IngestMetrics, Timer},
    sniff::SniffBuffer,
    Artifact,
    ArtifactContent,
    ArtifactStore,
    IngestError,
};

/// What to ingest and where to put it.
pub struct IngestRequest {
    /// Destination path on the target filesystem.
    pub path: String,

    pub content: ArtifactContent,

    /// Overrides detection. Empty counts as unset.
    pub content_type: Option<String>,

    /// Overrides length introspection of `content`.
    pub content_length: Option<u64>,

    /// Connection name recorded on the artifact.
    pub connection: Option<String>,
}

impl IngestRequest {
    pub fn new(path: impl Into<String>, content: impl Into<ArtifactContent>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            content_type: None,
            content_length: None,
            connection: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_content_length(mut self, content_length: u64) -> Self {
        self.content_length = Some(content_length);
        self
    }

    pub fn with_connection(mut self, connection: impl Into<String>) -> Self {
        self.connection = Some(connection.into());
        self
    }
}

/// Ingests byte sources into filesystems and records them as artifacts.
#[derive(Clone)]
pub struct Ingestor {
    store: Arc<dyn ArtifactStore>,
    metrics: Option<IngestMetrics>,
}

impl Ingestor {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            store,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, meter: &Meter) -> Self {
        self.metrics = Some(IngestMetrics::new(meter));
        self
    }

    /// Write `request.content` to `request.path` on `fs` and persist the
    /// resulting [`Artifact`].
    ///
    /// On cancellation the in-flight write is dropped, the source released
    /// and no artifact is created.
    pub async fn ingest(
        &self,
        fs: &dyn Filesystem,
        request: IngestRequest,
        cancel: &CancellationToken,
    ) -> Result<Artifact, IngestError> {
        let path = request.path.clone();
        let layout = format!("{:?}", fs.layout()).to_lowercase();
        let mut timer = self
            .metrics
            .as_ref()
            .map(|m| Timer::start(&m.ingestions, &[KeyValue::new("layout", layout)]));

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(IngestError::Cancelled { path }),
            result = self.run(fs, request) => result,
        };

        match (&result, &self.metrics) {
            (Ok(artifact), Some(metrics)) => {
                metrics.bytes.add(artifact.size, &[]);
                if let Some(timer) = timer.as_mut() {
                    timer.succeeded();
                }
            }
            (Err(e), Some(metrics)) => {
                metrics.errors.add(1, &[KeyValue::new("kind", e.label())]);
            }
            _ => {}
        }
        if let Err(e) = &result {
            warn!(path = %e.path(), error = %e, "artifact ingestion failed");
        }
        result
    }

    async fn run(&self, fs: &dyn Filesystem, request: IngestRequest) -> Result<Artifact, IngestError> {
        let IngestRequest {
            path,
            mut content,
            content_type,
            content_length,
            connection,
        } = request;

        let length = match content_length {
            Some(len) => ContentLength::Known(len),
            None => content
                .introspect_length()
                .await
                .map_err(|source| IngestError::Source {
                    path: path.clone(),
                    source,
                })?,
        };

        let mut tap = Tap::default();
        let written = {
            let fan_out = FanOut {
                source: content.into_stream(),
                tap: &mut tap,
            };
            let body = match length {
                ContentLength::Unknown if fs.requires_content_length() => {
                    debug!(path = %path, "buffering source of unknown length");
                    let data = drain(fan_out).await.map_err(|source| IngestError::Source {
                        path: path.clone(),
                        source,
                    })?;
                    WriteBody::from_bytes(data)
                }
                length => WriteBody::new(Box::pin(fan_out), length),
            };
            fs.write(&path, body).await
        };

        let info = match (written, tap.source_error.take()) {
            (_, Some(source)) => return Err(IngestError::Source { path, source }),
            (Err(source), None) => return Err(IngestError::Destination { path, source }),
            (Ok(info), None) => info,
        };
        if !tap.finished {
            return Err(IngestError::Incomplete {
                path,
                consumed: tap.consumed,
            });
        }

        let content_type = match content_type.filter(|ct| !ct.trim().is_empty()) {
            Some(content_type) => content_type,
            None => tap.sniff.detect(),
        };
        let artifact = Artifact {
            id: Uuid::new_v4(),
            path: info.full_path,
            filename: info.name,
            size: info.size,
            content_type,
            checksum: hex::encode(tap.hasher.finalize()),
            connection,
            created_at: Utc::now(),
        };

        if let Err(e) = self.store.create(&artifact).await {
            warn!(
                path = %artifact.path,
                id = %artifact.id,
                "object written but artifact record was not persisted"
            );
            return Err(IngestError::Persist {
                path: artifact.path,
                source: e.into(),
            });
        }

        info!(
            id = %artifact.id,
            path = %artifact.path,
            size = artifact.size,
            content_type = %artifact.content_type,
            "ingested artifact"
        );
        Ok(artifact)
    }
}

/// Everything observed about the source while it streams through.
#[derive(Default)]
struct Tap {
    hasher: Sha256,
    sniff: SniffBuffer,
    consumed: u64,
    source_error: Option<io::Error>,
    finished: bool,
}

impl Tap {
    fn observe(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.sniff.push(chunk);
        self.consumed += chunk.len() as u64;
    }
}

/// Passes the source through unchanged while feeding the tap.
struct FanOut<'a> {
    source: ByteStream<'static>,
    tap: &'a mut Tap,
}

impl Stream for FanOut<'_> {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        match this.source.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.tap.observe(&chunk);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                // The destination gets a copy; the original is reported to the caller.
                let forwarded = io::Error::new(e.kind(), e.to_string());
                this.tap.source_error = Some(e);
                Poll::Ready(Some(Err(forwarded)))
            }
            Poll::Ready(None) => {
                this.tap.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

async fn drain(mut fan_out: FanOut<'_>) -> io::Result<Bytes> {
    let mut buffer = BytesMut::new();
    while let Some(chunk) = fan_out.next().await {
        buffer.extend_from_slice(&chunk?);
    }
    Ok(buffer.freeze())
}
