//! Object store backend (S3, GCS, in-memory) using object_store.

use std::{fmt, io, sync::Arc};

use async_stream::try_stream;
use async_trait::async_trait;
use bytes::BytesMut;
use chrono::{DateTime, Utc};
use futures::{stream::BoxStream, StreamExt, TryStreamExt};
use object_store::{
    memory::InMemory,
    path::{Path as ObjectPath, PathPart},
    MultipartUpload,
    ObjectMeta,
    ObjectStore,
    PutPayload,
    PutResult,
    UploadPart,
    WriteMultipart,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    ByteStream,
    ContentLength,
    FileInfo,
    Filesystem,
    FsError,
    FsResult,
    Layout,
    WriteBody,
};

/// Default cap on entries returned by a single listing.
pub const DEFAULT_MAX_LIST_ITEMS: usize = 50 * 10_000;

/// Known-length uploads above this size go through multipart upload.
pub const MULTIPART_THRESHOLD: u64 = 5 * 1024 * 1024;

const MAX_CONCURRENT_PARTS: usize = 4;

/// Connection parameters for an S3 (or S3-compatible) bucket.
///
/// Unset credentials fall back to the standard `AWS_*` environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Options {
    pub bucket: String,

    /// Key prefix all paths are relative to.
    #[serde(default)]
    pub prefix: String,

    pub region: Option<String>,

    /// Custom endpoint for S3-compatible stores (MinIO, R2, ...).
    pub endpoint: Option<String>,

    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,

    #[serde(default)]
    pub virtual_hosted_style: bool,

    #[serde(default)]
    pub allow_http: bool,
}

/// Connection parameters for a Google Cloud Storage bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcsOptions {
    pub bucket: String,

    #[serde(default)]
    pub prefix: String,

    /// Service account JSON key file; defaults to `GOOGLE_*` environment.
    pub service_account_path: Option<String>,
}

/// A flat key space behind [`ObjectStore`].
///
/// Directories don't exist as objects: `list_dir` synthesises them from
/// common key prefixes, and globs are resolved by listing every key below
/// the pattern's literal prefix.
#[derive(Clone)]
pub struct ObjectStoreFs {
    store: Arc<dyn ObjectStore>,
    root: ObjectPath,
    max_list_items: usize,
}

impl fmt::Debug for ObjectStoreFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStoreFs")
            .field("store", &self.store.to_string())
            .field("root", &self.root)
            .field("max_list_items", &self.max_list_items)
            .finish()
    }
}

impl ObjectStoreFs {
    /// Wrap an existing store; all paths are relative to `root`.
    pub fn new(store: Arc<dyn ObjectStore>, root: impl AsRef<str>) -> FsResult<Self> {
        let root = parse_key(&ObjectPath::default(), root.as_ref())?;
        Ok(Self {
            store,
            root,
            max_list_items: DEFAULT_MAX_LIST_ITEMS,
        })
    }

    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(InMemory::new()),
            root: ObjectPath::default(),
            max_list_items: DEFAULT_MAX_LIST_ITEMS,
        }
    }

    #[cfg(feature = "aws")]
    pub fn s3(options: &S3Options) -> FsResult<Self> {
        use object_store::aws::AmazonS3Builder;

        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(&options.bucket)
            .with_virtual_hosted_style_request(options.virtual_hosted_style)
            .with_allow_http(options.allow_http);
        if let Some(region) = &options.region {
            builder = builder.with_region(region);
        }
        if let Some(endpoint) = &options.endpoint {
            builder = builder.with_endpoint(endpoint);
        }
        if let Some(key) = &options.access_key_id {
            builder = builder.with_access_key_id(key);
        }
        if let Some(secret) = &options.secret_access_key {
            builder = builder.with_secret_access_key(secret);
        }
        let store = builder
            .build()
            .map_err(|e| FsError::config(format!("s3 bucket '{}': {}", options.bucket, e)))?;

        debug!(bucket = %options.bucket, prefix = %options.prefix, "created S3 filesystem");
        Self::new(Arc::new(store), &options.prefix)
    }

    #[cfg(feature = "gcp")]
    pub fn gcs(options: &GcsOptions) -> FsResult<Self> {
        use object_store::gcp::GoogleCloudStorageBuilder;

        let mut builder = GoogleCloudStorageBuilder::from_env().with_bucket_name(&options.bucket);
        if let Some(path) = &options.service_account_path {
            builder = builder.with_service_account_path(path);
        }
        let store = builder
            .build()
            .map_err(|e| FsError::config(format!("gcs bucket '{}': {}", options.bucket, e)))?;

        debug!(bucket = %options.bucket, prefix = %options.prefix, "created GCS filesystem");
        Self::new(Arc::new(store), &options.prefix)
    }

    pub fn with_max_list_items(mut self, max_list_items: usize) -> Self {
        self.max_list_items = max_list_items;
        self
    }

    fn key(&self, path: &str) -> FsResult<ObjectPath> {
        parse_key(&self.root, path)
    }

    fn relative(&self, location: &ObjectPath) -> String {
        match location.prefix_match(&self.root) {
            Some(parts) => parts
                .map(|part| part.as_ref().to_string())
                .collect::<Vec<_>>()
                .join("/"),
            None => location.to_string(),
        }
    }

    fn file_info(&self, meta: &ObjectMeta) -> FileInfo {
        FileInfo::file(
            self.relative(&meta.location),
            meta.size as u64,
            meta.last_modified,
        )
    }

    async fn put_multipart(
        &self,
        path: &str,
        key: &ObjectPath,
        mut stream: ByteStream<'_>,
        declared: u64,
    ) -> FsResult<()> {
        let upload = self
            .store
            .put_multipart(key)
            .await
            .map_err(|e| FsError::object_store(path, e))?;
        let mut writer = WriteMultipart::new(Box::new(AbortOnDrop::new(path, upload)));

        let mut received = 0u64;
        let streamed: FsResult<()> = async {
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| FsError::io(path, e))?;
                writer
                    .wait_for_capacity(MAX_CONCURRENT_PARTS)
                    .await
                    .map_err(|e| FsError::object_store(path, e))?;
                received += chunk.len() as u64;
                writer.write(&chunk);
            }
            Ok(())
        }
        .await;

        let outcome = match streamed {
            Err(e) => Err(e),
            Ok(()) if received != declared => Err(FsError::LengthMismatch {
                path: path.to_string(),
                declared,
                received,
            }),
            Ok(()) => Ok(()),
        };
        if let Err(e) = outcome {
            if let Err(abort_err) = writer.abort().await {
                warn!(path = %path, error = %abort_err, "failed to abort multipart upload");
            }
            return Err(e);
        }

        writer
            .finish()
            .await
            .map_err(|e| FsError::object_store(path, e))?;
        Ok(())
    }
}

/// Joins `path` onto `base` segment by segment, keeping names verbatim.
///
/// `ObjectPath::child` would percent-encode characters such as `[` or `~`,
/// and the encoded form would then leak back out through listings.
fn parse_key(base: &ObjectPath, path: &str) -> FsResult<ObjectPath> {
    let mut parts: Vec<PathPart<'_>> = base.parts().collect();
    for segment in path.split('/').filter(|s| !s.is_empty() && *s != ".") {
        let part = PathPart::parse(segment).map_err(|e| FsError::InvalidPath {
            path: path.to_string(),
            reason: if segment == ".." {
                "parent directory segments are not allowed".to_string()
            } else {
                e.to_string()
            },
        })?;
        parts.push(part);
    }
    Ok(ObjectPath::from_iter(parts))
}

/// Aborts the wrapped upload if it is dropped before completing.
///
/// `WriteMultipart` has no drop handler, so a write future cancelled
/// mid-stream would otherwise leave the upload and its parts behind.
#[derive(Debug)]
struct AbortOnDrop {
    path: String,
    upload: Option<Box<dyn MultipartUpload>>,
}

impl AbortOnDrop {
    fn new(path: &str, upload: Box<dyn MultipartUpload>) -> Self {
        Self {
            path: path.to_string(),
            upload: Some(upload),
        }
    }

    fn upload(&mut self) -> object_store::Result<&mut Box<dyn MultipartUpload>> {
        self.upload.as_mut().ok_or_else(|| object_store::Error::Generic {
            store: "multipart",
            source: "upload already closed".into(),
        })
    }
}

#[async_trait]
impl MultipartUpload for AbortOnDrop {
    fn put_part(&mut self, data: PutPayload) -> UploadPart {
        match self.upload() {
            Ok(upload) => upload.put_part(data),
            Err(e) => Box::pin(futures::future::ready(Err(e))),
        }
    }

    async fn complete(&mut self) -> object_store::Result<PutResult> {
        let result = self.upload()?.complete().await?;
        self.upload = None;
        Ok(result)
    }

    async fn abort(&mut self) -> object_store::Result<()> {
        let result = self.upload()?.abort().await;
        self.upload = None;
        result
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        let Some(mut upload) = self.upload.take() else {
            return;
        };
        let path = std::mem::take(&mut self.path);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    match upload.abort().await {
                        Ok(()) => debug!(path = %path, "aborted abandoned multipart upload"),
                        Err(e) => warn!(path = %path, error = %e, "failed to abort multipart upload"),
                    }
                });
            }
            Err(_) => warn!(path = %path, "no runtime to abort abandoned multipart upload"),
        }
    }
}

#[async_trait]
impl Filesystem for ObjectStoreFs {
    fn layout(&self) -> Layout {
        Layout::Flat
    }

    fn max_list_items(&self) -> Option<usize> {
        Some(self.max_list_items)
    }

    async fn stat(&self, path: &str) -> FsResult<FileInfo> {
        let key = self.key(path)?;
        if key == self.root {
            return Ok(FileInfo::dir("", DateTime::<Utc>::UNIX_EPOCH));
        }
        let meta = self
            .store
            .head(&key)
            .await
            .map_err(|e| FsError::object_store(path, e))?;
        Ok(self.file_info(&meta))
    }

    async fn list_dir(&self, dir: &str) -> FsResult<Vec<FileInfo>> {
        let key = self.key(dir)?;
        let prefix = (!key.as_ref().is_empty()).then_some(&key);
        let listing = self
            .store
            .list_with_delimiter(prefix)
            .await
            .map_err(|e| FsError::object_store(dir, e))?;

        let dirs = listing
            .common_prefixes
            .iter()
            .map(|p| FileInfo::dir(self.relative(p), DateTime::<Utc>::UNIX_EPOCH));
        let files = listing.objects.iter().map(|meta| self.file_info(meta));
        Ok(dirs.chain(files).collect())
    }

    fn list_recursive<'a>(&'a self, prefix: &'a str) -> BoxStream<'a, FsResult<FileInfo>> {
        Box::pin(try_stream! {
            let key = self.key(prefix)?;
            let root = (!key.as_ref().is_empty()).then_some(&key);
            let mut objects = self.store.list(root);
            while let Some(meta) = objects.next().await {
                let meta = meta.map_err(|e| FsError::object_store(prefix, e))?;
                yield self.file_info(&meta);
            }
        })
    }

    async fn read(&self, path: &str) -> FsResult<ByteStream<'static>> {
        let key = self.key(path)?;
        let result = self
            .store
            .get(&key)
            .await
            .map_err(|e| FsError::object_store(path, e))?;
        Ok(result.into_stream().map_err(io::Error::other).boxed())
    }

    async fn write(&self, path: &str, body: WriteBody<'_>) -> FsResult<FileInfo> {
        let key = self.key(path)?;
        if key == self.root {
            return Err(FsError::InvalidPath {
                path: path.to_string(),
                reason: "an object key is required".to_string(),
            });
        }

        let WriteBody { mut stream, length } = body;
        match length {
            ContentLength::Known(len) if len > MULTIPART_THRESHOLD => {
                self.put_multipart(path, &key, stream, len).await?;
            }
            _ => {
                let mut buffer = match length {
                    ContentLength::Known(len) => BytesMut::with_capacity(len as usize),
                    ContentLength::Unknown => BytesMut::new(),
                };
                while let Some(chunk) = stream.next().await {
                    buffer.extend_from_slice(&chunk.map_err(|e| FsError::io(path, e))?);
                }
                if let ContentLength::Known(declared) = length {
                    if buffer.len() as u64 != declared {
                        return Err(FsError::LengthMismatch {
                            path: path.to_string(),
                            declared,
                            received: buffer.len() as u64,
                        });
                    }
                }
                self.store
                    .put(&key, PutPayload::from(buffer.freeze()))
                    .await
                    .map_err(|e| FsError::object_store(path, e))?;
            }
        }

        debug!(path = %path, key = %key, "wrote object");
        self.stat(path).await
    }
}
