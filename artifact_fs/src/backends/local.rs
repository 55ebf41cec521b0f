//! Local filesystem backend.

use std::path::PathBuf;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::{
    file_info::{join_path, relative_segments},
    ByteStream,
    FileInfo,
    Filesystem,
    FsError,
    FsResult,
    Layout,
    WriteBody,
};

const READ_CHUNK_SIZE: usize = 64 * 1024;

/// A directory tree on local disk.
///
/// All paths are relative to `root`; `..` segments are rejected so callers
/// can't escape it.
#[derive(Debug, Clone)]
pub struct LocalFs {
    root: PathBuf,
    max_list_items: Option<usize>,
}

impl LocalFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_list_items: None,
        }
    }

    pub fn with_max_list_items(mut self, max_list_items: usize) -> Self {
        self.max_list_items = Some(max_list_items);
        self
    }

    /// Normalise `path` into its canonical relative form and the on-disk path.
    fn resolve(&self, path: &str) -> FsResult<(String, PathBuf)> {
        let relative = relative_segments(path)?;
        let on_disk = relative.iter().fold(self.root.clone(), |acc, s| acc.join(s));
        Ok((relative.join("/"), on_disk))
    }
}

#[async_trait]
impl Filesystem for LocalFs {
    fn layout(&self) -> Layout {
        Layout::Hierarchical
    }

    fn max_list_items(&self) -> Option<usize> {
        self.max_list_items
    }

    async fn stat(&self, path: &str) -> FsResult<FileInfo> {
        let (relative, on_disk) = self.resolve(path)?;
        let metadata = tokio::fs::metadata(&on_disk)
            .await
            .map_err(|e| FsError::io(path, e))?;
        Ok(FileInfo::from_metadata(relative, &metadata))
    }

    async fn list_dir(&self, dir: &str) -> FsResult<Vec<FileInfo>> {
        let (relative, on_disk) = self.resolve(dir)?;
        let mut entries = tokio::fs::read_dir(&on_disk)
            .await
            .map_err(|e| FsError::io(dir, e))?;

        let mut infos = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| FsError::io(dir, e))? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let full_path = join_path(&relative, &name);
            // Does not follow symlinks, so walks can't loop.
            let metadata = entry
                .metadata()
                .await
                .map_err(|e| FsError::io(full_path.as_str(), e))?;
            infos.push(FileInfo::from_metadata(full_path, &metadata));
        }
        Ok(infos)
    }

    async fn read(&self, path: &str) -> FsResult<ByteStream<'static>> {
        let (_, on_disk) = self.resolve(path)?;
        let file = tokio::fs::File::open(&on_disk)
            .await
            .map_err(|e| FsError::io(path, e))?;
        Ok(ReaderStream::with_capacity(file, READ_CHUNK_SIZE).boxed())
    }

    async fn write(&self, path: &str, body: WriteBody<'_>) -> FsResult<FileInfo> {
        let (relative, on_disk) = self.resolve(path)?;
        if relative.is_empty() {
            return Err(FsError::InvalidPath {
                path: path.to_string(),
                reason: "cannot write to the root directory".to_string(),
            });
        }

        if let Some(parent) = on_disk.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| FsError::io(path, e))?;
        }

        let mut file = tokio::fs::File::create(&on_disk)
            .await
            .map_err(|e| FsError::io(path, e))?;
        let mut stream = body.stream;
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| FsError::io(path, e))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| FsError::io(path, e))?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| FsError::io(path, e))?;

        debug!(path = %relative, bytes = written, "wrote local file");
        self.stat(&relative).await
    }
}
