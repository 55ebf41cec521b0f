//! Core filesystem trait.

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream};

use crate::{resolver, FileInfo, FsResult, ListOptions, Listing};

/// A stream of byte chunks.
pub type ByteStream<'a> = BoxStream<'a, io::Result<Bytes>>;

/// Whether the size of a byte stream is known before it is consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentLength {
    Known(u64),
    Unknown,
}

impl ContentLength {
    pub fn known(self) -> Option<u64> {
        match self {
            ContentLength::Known(len) => Some(len),
            ContentLength::Unknown => None,
        }
    }
}

impl From<Option<u64>> for ContentLength {
    fn from(len: Option<u64>) -> Self {
        len.map_or(ContentLength::Unknown, ContentLength::Known)
    }
}

/// The payload handed to [`Filesystem::write`].
pub struct WriteBody<'a> {
    pub stream: ByteStream<'a>,
    pub length: ContentLength,
}

impl<'a> WriteBody<'a> {
    pub fn new(stream: ByteStream<'a>, length: ContentLength) -> Self {
        Self { stream, length }
    }

    /// A body backed by bytes already in memory.
    pub fn from_bytes(data: Bytes) -> WriteBody<'static> {
        let length = ContentLength::Known(data.len() as u64);
        WriteBody {
            stream: Box::pin(stream::once(async move { Ok(data) })),
            length,
        }
    }
}

/// How a backend organises its namespace.
///
/// This decides the glob enumeration strategy: flat key spaces are listed
/// recursively from a prefix, hierarchical backends are walked directory by
/// directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Flat,
    Hierarchical,
}

/// Uniform access to a storage backend.
///
/// Paths are `/`-separated and relative to the adapter's root. Every
/// [`FileInfo::full_path`] an adapter returns is accepted back by its
/// [`stat`](Filesystem::stat) and [`read`](Filesystem::read).
#[async_trait]
pub trait Filesystem: Send + Sync {
    fn layout(&self) -> Layout;

    /// Whether `write` needs the total length before the first byte is sent.
    ///
    /// Callers with a stream of unknown length buffer it before writing to
    /// such a backend.
    fn requires_content_length(&self) -> bool {
        self.layout() == Layout::Flat
    }

    /// Cap on the number of entries a single `read_dir` returns.
    fn max_list_items(&self) -> Option<usize> {
        None
    }

    /// Release the connection. The adapter must not be used afterwards.
    async fn close(&self) -> FsResult<()> {
        Ok(())
    }

    /// Get metadata for a single path.
    ///
    /// Returns `FsError::NotFound` if nothing exists there.
    async fn stat(&self, path: &str) -> FsResult<FileInfo>;

    /// List the immediate children of a directory (one level, unsorted).
    async fn list_dir(&self, dir: &str) -> FsResult<Vec<FileInfo>>;

    /// Every entry below `prefix`, at any depth.
    ///
    /// The default walks [`list_dir`](Filesystem::list_dir); flat stores
    /// override it with their native paginated listing.
    fn list_recursive<'a>(&'a self, prefix: &'a str) -> BoxStream<'a, FsResult<FileInfo>> {
        resolver::walk(self, prefix, None)
    }

    /// List entries matching `pattern`, which may be a glob.
    ///
    /// A pattern without meta characters names a file (returned alone) or a
    /// directory (its children are returned). The adapter's list items cap
    /// applies.
    ///
    /// Glob results depend on [`Layout`]: hierarchical backends return the
    /// directories a pattern matches, while flat stores only ever return
    /// objects because their directories are implied by key prefixes.
    async fn read_dir(&self, pattern: &str) -> FsResult<Listing> {
        let options = ListOptions {
            max_items: self.max_list_items(),
            cancel: None,
        };
        resolver::list(self, pattern, &options).await
    }

    /// Open a file for streaming reads.
    async fn read(&self, path: &str) -> FsResult<ByteStream<'static>>;

    /// Write `body` to `path`, replacing anything already there.
    ///
    /// Hierarchical backends create missing parent directories. Returns the
    /// post-write metadata of the stored object.
    async fn write(&self, path: &str, body: WriteBody<'_>) -> FsResult<FileInfo>;
}
