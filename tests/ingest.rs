use std::{io, sync::Arc};

use anyhow::anyhow;
use artifact_fs::{
    ByteStream,
    FileInfo,
    Filesystem,
    FsError,
    FsResult,
    Layout,
    LocalFs,
    ObjectStoreFs,
    WriteBody,
};
use artifacts::{
    sniff::MAX_SNIFF_BYTES,
    Artifact,
    ArtifactContent,
    ArtifactStore,
    InMemoryArtifactStore,
    IngestError,
    IngestRequest,
    Ingestor,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::{stream, StreamExt};
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const DIGITS_SHA256: &str = "84d89877f0d4041efb6bf91a16f0248f2fd573e6af05c19f96bedb9f882f7882";

fn chunked(chunks: &[&'static str]) -> ByteStream<'static> {
    let chunks: Vec<io::Result<Bytes>> = chunks
        .iter()
        .map(|chunk| Ok(Bytes::from_static(chunk.as_bytes())))
        .collect();
    stream::iter(chunks).boxed()
}

fn ingestor() -> (Arc<InMemoryArtifactStore>, Ingestor) {
    let store = Arc::new(InMemoryArtifactStore::new());
    let ingestor = Ingestor::new(store.clone());
    (store, ingestor)
}

/// Rejects every write without reading the body.
struct RejectingFs;

#[async_trait]
impl Filesystem for RejectingFs {
    fn layout(&self) -> Layout {
        Layout::Hierarchical
    }

    async fn stat(&self, path: &str) -> FsResult<FileInfo> {
        Err(FsError::NotFound {
            path: path.to_string(),
        })
    }

    async fn list_dir(&self, _dir: &str) -> FsResult<Vec<FileInfo>> {
        Ok(Vec::new())
    }

    async fn read(&self, path: &str) -> FsResult<ByteStream<'static>> {
        Err(FsError::NotFound {
            path: path.to_string(),
        })
    }

    async fn write(&self, path: &str, _body: WriteBody<'_>) -> FsResult<FileInfo> {
        Err(FsError::Backend {
            path: path.to_string(),
            source: "quota exceeded".into(),
        })
    }
}

/// Reads only the first chunk and claims success.
struct ShortWriteFs;

#[async_trait]
impl Filesystem for ShortWriteFs {
    fn layout(&self) -> Layout {
        Layout::Hierarchical
    }

    async fn stat(&self, path: &str) -> FsResult<FileInfo> {
        Err(FsError::NotFound {
            path: path.to_string(),
        })
    }

    async fn list_dir(&self, _dir: &str) -> FsResult<Vec<FileInfo>> {
        Ok(Vec::new())
    }

    async fn read(&self, path: &str) -> FsResult<ByteStream<'static>> {
        Err(FsError::NotFound {
            path: path.to_string(),
        })
    }

    async fn write(&self, path: &str, body: WriteBody<'_>) -> FsResult<FileInfo> {
        let mut stream = body.stream;
        let first = match stream.next().await {
            Some(chunk) => chunk.map_err(|e| FsError::io(path, e))?,
            None => Bytes::new(),
        };
        Ok(FileInfo::file(path, first.len() as u64, Utc::now()))
    }
}

struct FailingStore;

#[async_trait]
impl ArtifactStore for FailingStore {
    async fn create(&self, _artifact: &Artifact) -> anyhow::Result<()> {
        Err(anyhow!("database is read-only"))
    }
}

#[tokio::test]
async fn test_ingest_bytes_to_object_store() {
    let fs = ObjectStoreFs::in_memory();
    let (store, ingestor) = ingestor();

    let artifact = ingestor
        .ingest(
            &fs,
            IngestRequest::new("reports/digits.txt", "0123456789").with_connection("scratch"),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(artifact.path, "reports/digits.txt");
    assert_eq!(artifact.filename, "digits.txt");
    assert_eq!(artifact.size, 10);
    assert_eq!(artifact.checksum, DIGITS_SHA256);
    assert_eq!(artifact.content_type, "text/plain; charset=utf-8");
    assert_eq!(artifact.connection.as_deref(), Some("scratch"));

    assert_eq!(store.list().await, vec![artifact]);
    assert_eq!(fs.stat("reports/digits.txt").await.unwrap().size, 10);
}

#[tokio::test]
async fn test_checksum_does_not_depend_on_chunking() {
    let temp_dir = TempDir::new().unwrap();
    let fs = LocalFs::new(temp_dir.path());
    let (_, ingestor) = ingestor();
    let cancel = CancellationToken::new();

    let whole = ingestor
        .ingest(&fs, IngestRequest::new("whole.txt", "0123456789"), &cancel)
        .await
        .unwrap();
    let pieces = ingestor
        .ingest(
            &fs,
            IngestRequest::new(
                "pieces.txt",
                ArtifactContent::from_stream(chunked(&["01", "", "234", "56789"]), None),
            ),
            &cancel,
        )
        .await
        .unwrap();

    assert_eq!(whole.checksum, DIGITS_SHA256);
    assert_eq!(pieces.checksum, DIGITS_SHA256);
    assert_eq!(pieces.size, 10);
    assert_eq!(pieces.content_type, whole.content_type);
    assert_eq!(
        tokio::fs::read(temp_dir.path().join("pieces.txt")).await.unwrap(),
        b"0123456789"
    );
}

#[tokio::test]
async fn test_local_destination_creates_parents() {
    let temp_dir = TempDir::new().unwrap();
    let fs = LocalFs::new(temp_dir.path());
    let (store, ingestor) = ingestor();

    let source_path = temp_dir.path().join("source.json");
    tokio::fs::write(&source_path, br#"{"users": [1, 2, 3]}"#)
        .await
        .unwrap();
    let file = tokio::fs::File::open(&source_path).await.unwrap();

    let artifact = ingestor
        .ingest(
            &fs,
            IngestRequest::new("out/nested/users.json", file),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(artifact.path, "out/nested/users.json");
    assert_eq!(artifact.content_type, "application/json");
    assert_eq!(artifact.size, 20);
    assert_eq!(
        store.find_by_path("out/nested/users.json").await,
        vec![artifact]
    );
}

#[tokio::test]
async fn test_unknown_length_is_buffered_for_flat_stores() {
    let fs = ObjectStoreFs::in_memory();
    let (_, ingestor) = ingestor();

    let reader = io::Cursor::new(b"line one\nline two\n".to_vec());
    let artifact = ingestor
        .ingest(
            &fs,
            IngestRequest::new("logs/app.log", ArtifactContent::from_reader(reader)),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(artifact.size, 18);
    assert_eq!(
        artifact.checksum,
        hex::encode(Sha256::digest(b"line one\nline two\n"))
    );
    let mut read = fs.read("logs/app.log").await.unwrap();
    let mut data = Vec::new();
    while let Some(chunk) = read.next().await {
        data.extend_from_slice(&chunk.unwrap());
    }
    assert_eq!(data, b"line one\nline two\n");
}

#[tokio::test]
async fn test_sniffing_only_sees_the_prefix() {
    let fs = ObjectStoreFs::in_memory();
    let (_, ingestor) = ingestor();
    let cancel = CancellationToken::new();

    let prefix = vec![b'a'; MAX_SNIFF_BYTES];
    let mut text = prefix.clone();
    text.extend_from_slice(b"more text");
    let mut binary = prefix;
    binary.extend_from_slice(&[0, 1, 2, 3, 0xff]);

    let text = ingestor
        .ingest(&fs, IngestRequest::new("text.bin", text), &cancel)
        .await
        .unwrap();
    let binary = ingestor
        .ingest(&fs, IngestRequest::new("binary.bin", binary), &cancel)
        .await
        .unwrap();

    assert_eq!(text.content_type, "text/plain; charset=utf-8");
    assert_eq!(binary.content_type, text.content_type);
    assert_ne!(binary.checksum, text.checksum);
}

#[tokio::test]
async fn test_content_type_override() {
    let fs = ObjectStoreFs::in_memory();
    let (_, ingestor) = ingestor();
    let cancel = CancellationToken::new();

    let explicit = ingestor
        .ingest(
            &fs,
            IngestRequest::new("a.csv", "a,b\n1,2\n").with_content_type("text/csv"),
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(explicit.content_type, "text/csv");

    let empty = ingestor
        .ingest(
            &fs,
            IngestRequest::new("b.json", "[1, 2]").with_content_type(""),
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(empty.content_type, "application/json");
}

#[tokio::test]
async fn test_destination_failure_creates_no_artifact() {
    let (store, ingestor) = ingestor();

    let err = ingestor
        .ingest(
            &RejectingFs,
            IngestRequest::new("reports/a.txt", "0123456789"),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::Destination { .. }), "{err}");
    assert_eq!(err.path(), "reports/a.txt");
    assert!(store.list().await.is_empty());
}

#[tokio::test]
async fn test_source_failure_creates_no_artifact() {
    let temp_dir = TempDir::new().unwrap();
    let (store, ingestor) = ingestor();

    for fs in [
        Box::new(LocalFs::new(temp_dir.path())) as Box<dyn Filesystem>,
        Box::new(ObjectStoreFs::in_memory()),
    ] {
        let failing = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::other("connection reset")),
        ])
        .boxed();
        let err = ingestor
            .ingest(
                fs.as_ref(),
                IngestRequest::new("broken.txt", ArtifactContent::from_stream(failing, None)),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        match err {
            IngestError::Source { source, .. } => {
                assert_eq!(source.to_string(), "connection reset")
            }
            other => panic!("unexpected error: {other}"),
        }
    }
    assert!(store.list().await.is_empty());
}

#[tokio::test]
async fn test_short_write_is_incomplete() {
    let (store, ingestor) = ingestor();

    let err = ingestor
        .ingest(
            &ShortWriteFs,
            IngestRequest::new(
                "short.txt",
                ArtifactContent::from_stream(chunked(&["0123", "456789"]), Some(10)),
            ),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(
        matches!(err, IngestError::Incomplete { consumed: 4, .. }),
        "{err}"
    );
    assert!(store.list().await.is_empty());
}

#[tokio::test]
async fn test_persist_failure_keeps_the_object() {
    let fs = ObjectStoreFs::in_memory();
    let ingestor = Ingestor::new(Arc::new(FailingStore));

    let err = ingestor
        .ingest(
            &fs,
            IngestRequest::new("kept.txt", "0123456789"),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::Persist { .. }), "{err}");
    assert_eq!(err.path(), "kept.txt");
    assert_eq!(fs.stat("kept.txt").await.unwrap().size, 10);
}

#[tokio::test]
async fn test_cancelled_ingestion_creates_no_artifact() {
    let fs = ObjectStoreFs::in_memory();
    let (store, ingestor) = ingestor();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = ingestor
        .ingest(&fs, IngestRequest::new("never.txt", "0123456789"), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::Cancelled { .. }), "{err}");
    assert!(store.list().await.is_empty());
    assert!(fs.stat("never.txt").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_size_comes_from_the_destination() {
    let temp_dir = TempDir::new().unwrap();
    let fs = LocalFs::new(temp_dir.path());
    let (store, ingestor) = ingestor();

    let artifact = ingestor
        .ingest(
            &fs,
            IngestRequest::new("digits.txt", "0123456789").with_content_length(4),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(artifact.size, 10);
    assert_eq!(artifact.checksum, DIGITS_SHA256);
    assert_eq!(store.list().await, vec![artifact]);
}

#[tokio::test]
async fn test_wrong_declared_length_fails_on_flat_stores() {
    let fs = ObjectStoreFs::in_memory();
    let (store, ingestor) = ingestor();

    let err = ingestor
        .ingest(
            &fs,
            IngestRequest::new("digits.txt", "0123456789").with_content_length(4),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    match err {
        IngestError::Destination { source, .. } => assert!(
            matches!(source, FsError::LengthMismatch { declared: 4, received: 10, .. }),
            "{source}"
        ),
        other => panic!("unexpected error: {other}"),
    }
    assert!(store.list().await.is_empty());
    assert!(fs.stat("digits.txt").await.unwrap_err().is_not_found());
}

fn megabytes(count: usize) -> (Vec<u8>, ByteStream<'static>) {
    let chunk: Vec<u8> = (0..1024 * 1024).map(|i| (i % 251) as u8).collect();
    let data = chunk.repeat(count);
    let chunks: Vec<io::Result<Bytes>> = (0..count)
        .map(|_| Ok(Bytes::from(chunk.clone())))
        .collect();
    (data, stream::iter(chunks).boxed())
}

#[tokio::test]
async fn test_large_known_length_upload() {
    let fs = ObjectStoreFs::in_memory();
    let (store, ingestor) = ingestor();
    let (data, body) = megabytes(6);

    let artifact = ingestor
        .ingest(
            &fs,
            IngestRequest::new(
                "dumps/large.bin",
                ArtifactContent::from_stream(body, Some(data.len() as u64)),
            ),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(artifact.size, 6 * 1024 * 1024);
    assert_eq!(artifact.checksum, hex::encode(Sha256::digest(&data)));
    assert_eq!(fs.stat("dumps/large.bin").await.unwrap().size, artifact.size);
    assert_eq!(store.list().await, vec![artifact]);
}

#[tokio::test]
async fn test_seekable_source() {
    let fs = ObjectStoreFs::in_memory();
    let (_, ingestor) = ingestor();

    let reader = io::Cursor::new(b"0123456789".to_vec());
    let artifact = ingestor
        .ingest(
            &fs,
            IngestRequest::new("seekable.txt", ArtifactContent::from_seekable(reader)),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(artifact.size, 10);
    assert_eq!(artifact.checksum, DIGITS_SHA256);
}

#[tokio::test]
async fn test_cancelled_multipart_upload_creates_no_artifact() {
    let fs = ObjectStoreFs::in_memory();
    let (store, ingestor) = ingestor();
    let cancel = CancellationToken::new();

    // One chunk arrives, then the source stalls and the caller gives up.
    let (_, first) = megabytes(1);
    let on_stall = cancel.clone();
    let stalled = first
        .chain(stream::once(async move {
            on_stall.cancel();
            std::future::pending::<io::Result<Bytes>>().await
        }))
        .boxed();

    let err = ingestor
        .ingest(
            &fs,
            IngestRequest::new(
                "dumps/stalled.bin",
                ArtifactContent::from_stream(stalled, Some(8 * 1024 * 1024)),
            ),
            &cancel,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::Cancelled { .. }), "{err}");
    assert!(store.list().await.is_empty());
    assert!(fs.stat("dumps/stalled.bin").await.unwrap_err().is_not_found());
}
