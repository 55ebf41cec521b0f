//! Byte sources an artifact can be ingested from.

use std::io::{self, SeekFrom};

use artifact_fs::{ByteStream, ContentLength};
use bytes::Bytes;
use futures::{stream, StreamExt};
use tokio::io::{AsyncRead, AsyncSeek, AsyncSeekExt};
use tokio_util::io::ReaderStream;

const CHUNK_SIZE: usize = 64 * 1024;

/// A reader that can also seek, so its length can be found without
/// consuming it.
pub trait SeekableRead: AsyncRead + AsyncSeek + Send + Unpin {}

impl<T: AsyncRead + AsyncSeek + Send + Unpin> SeekableRead for T {}

/// The bytes to ingest.
pub enum ArtifactContent {
    /// Data already in memory.
    Bytes(Bytes),

    /// An open file, read from its current position.
    File(tokio::fs::File),

    /// Any seekable reader, read from its current position.
    Seekable(Box<dyn SeekableRead>),

    /// A plain reader. Its length is never known up front.
    Reader(Box<dyn AsyncRead + Send + Unpin>),

    /// A chunk stream with an optional declared length.
    Stream {
        stream: ByteStream<'static>,
        length: Option<u64>,
    },
}

impl ArtifactContent {
    pub fn from_stream(stream: ByteStream<'static>, length: Option<u64>) -> Self {
        ArtifactContent::Stream { stream, length }
    }

    pub fn from_reader(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        ArtifactContent::Reader(Box::new(reader))
    }

    pub fn from_seekable(reader: impl SeekableRead + 'static) -> Self {
        ArtifactContent::Seekable(Box::new(reader))
    }

    /// Find the number of bytes left to read without consuming any.
    ///
    /// Seekable sources are moved to their end and back; an error restoring
    /// the position is returned rather than risk skipping data.
    pub async fn introspect_length(&mut self) -> io::Result<ContentLength> {
        match self {
            ArtifactContent::Bytes(data) => Ok(ContentLength::Known(data.len() as u64)),
            ArtifactContent::File(file) => {
                let metadata = file.metadata().await?;
                if !metadata.is_file() {
                    return Ok(ContentLength::Unknown);
                }
                let position = file.stream_position().await?;
                Ok(ContentLength::Known(metadata.len().saturating_sub(position)))
            }
            ArtifactContent::Seekable(reader) => {
                let position = reader.stream_position().await?;
                let end = reader.seek(SeekFrom::End(0)).await?;
                reader.seek(SeekFrom::Start(position)).await?;
                Ok(ContentLength::Known(end.saturating_sub(position)))
            }
            ArtifactContent::Reader(_) => Ok(ContentLength::Unknown),
            ArtifactContent::Stream { length, .. } => Ok((*length).into()),
        }
    }

    pub fn into_stream(self) -> ByteStream<'static> {
        match self {
            ArtifactContent::Bytes(data) => {
                stream::iter((!data.is_empty()).then_some(Ok(data))).boxed()
            }
            ArtifactContent::File(file) => ReaderStream::with_capacity(file, CHUNK_SIZE).boxed(),
            ArtifactContent::Seekable(reader) => {
                ReaderStream::with_capacity(reader, CHUNK_SIZE).boxed()
            }
            ArtifactContent::Reader(reader) => {
                ReaderStream::with_capacity(reader, CHUNK_SIZE).boxed()
            }
            ArtifactContent::Stream { stream, .. } => stream,
        }
    }
}

impl From<Bytes> for ArtifactContent {
    fn from(data: Bytes) -> Self {
        ArtifactContent::Bytes(data)
    }
}

impl From<Vec<u8>> for ArtifactContent {
    fn from(data: Vec<u8>) -> Self {
        ArtifactContent::Bytes(data.into())
    }
}

impl From<String> for ArtifactContent {
    fn from(data: String) -> Self {
        ArtifactContent::Bytes(data.into())
    }
}

impl From<&'static str> for ArtifactContent {
    fn from(data: &'static str) -> Self {
        ArtifactContent::Bytes(Bytes::from_static(data.as_bytes()))
    }
}

impl From<tokio::fs::File> for ArtifactContent {
    fn from(file: tokio::fs::File) -> Self {
        ArtifactContent::File(file)
    }
}
