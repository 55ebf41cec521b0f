//! Runs a blocking network client on a thread of its own.
//!
//! The SFTP and SMB client libraries are synchronous and their sessions are
//! not meant to be shared across threads. Each adapter therefore owns a
//! [`Worker`]: one thread holding the session, fed with jobs that run in the
//! order they were queued. Async callers wait on the job's result.
//!
//! Streaming transfers occupy the worker for their whole duration, so other
//! calls on the same adapter queue up behind them.

use std::{
    io::{self, Read, Write},
    sync::mpsc as std_mpsc,
    thread,
};

use async_stream::stream;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::{ByteStream, FsError, FsResult, WriteBody};

const CHUNK_SIZE: usize = 64 * 1024;
const QUEUE_DEPTH: usize = 8;

type Job<C> = Box<dyn FnOnce(&mut C) + Send>;

/// Writer an upload streams into.
pub(crate) type Sink<'a> = Box<dyn Write + 'a>;

/// Reader a download streams from.
pub(crate) type Source<'a> = Box<dyn Read + 'a>;

enum Upload {
    Chunk(Bytes),
    Finish,
}

pub(crate) struct Worker<C> {
    name: String,
    jobs: std_mpsc::Sender<Job<C>>,
}

impl<C: 'static> Worker<C> {
    /// Start the worker thread and build the client on it with `connect`.
    pub(crate) async fn spawn<F>(name: impl Into<String>, connect: F) -> FsResult<Self>
    where
        F: FnOnce() -> FsResult<C> + Send + 'static,
    {
        let name = name.into();
        let (jobs, queue) = std_mpsc::channel::<Job<C>>();
        let (ready_tx, ready_rx) = oneshot::channel();
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let mut client = match connect() {
                    Ok(client) => {
                        let _ = ready_tx.send(Ok(()));
                        client
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                while let Ok(job) = queue.recv() {
                    job(&mut client);
                }
            })
            .map_err(|e| FsError::backend(name.as_str(), e))?;

        ready_rx.await.map_err(|_| stopped(&name))??;
        debug!(worker = %name, "client connected");
        Ok(Self { name, jobs })
    }

    fn execute(&self, job: impl FnOnce(&mut C) + Send + 'static) -> FsResult<()> {
        self.jobs
            .send(Box::new(job))
            .map_err(|_| stopped(&self.name))
    }

    /// Run `job` against the client and wait for its result.
    pub(crate) async fn run<T, F>(&self, job: F) -> FsResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut C) -> FsResult<T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.execute(move |client| {
            let _ = tx.send(job(client));
        })?;
        rx.await.map_err(|_| stopped(&self.name))?
    }

    /// Stream `body` into the writer returned by `open`. Returns the number of
    /// bytes written.
    ///
    /// When the body fails, or this future is dropped before the body ends,
    /// `discard` runs on the worker to remove the partial file.
    pub(crate) async fn upload<O, D>(
        &self,
        path: &str,
        body: WriteBody<'_>,
        open: O,
        discard: D,
    ) -> FsResult<u64>
    where
        O: for<'a> FnOnce(&'a mut C) -> FsResult<Sink<'a>> + Send + 'static,
        D: FnOnce(&mut C) + Send + 'static,
    {
        let (chunks, mut queue) = mpsc::channel::<Upload>(QUEUE_DEPTH);
        let (done_tx, done_rx) = oneshot::channel();
        let target = path.to_string();
        self.execute(move |client| {
            let mut sink = match open(&mut *client) {
                Ok(sink) => sink,
                Err(e) => {
                    let _ = done_tx.send(Err(e));
                    return;
                }
            };
            let pumped = pump(&mut sink, &mut queue, &target);
            drop(sink);
            let result = match pumped {
                Ok(Some(written)) => Ok(written),
                Ok(None) => {
                    discard(client);
                    warn!(path = %target, "upload abandoned, partial file removed");
                    Err(FsError::Cancelled)
                }
                Err(e) => {
                    discard(client);
                    Err(e)
                }
            };
            let _ = done_tx.send(result);
        })?;

        let mut stream = body.stream;
        while let Some(chunk) = stream.next().await {
            // Dropping `chunks` early tells the job to discard the file.
            let chunk = chunk.map_err(|e| FsError::io(path, e))?;
            if chunks.send(Upload::Chunk(chunk)).await.is_err() {
                // The job already failed; its result says why.
                break;
            }
        }
        let _ = chunks.send(Upload::Finish).await;
        done_rx.await.map_err(|_| stopped(&self.name))?
    }

    /// Open a reader with `open` and stream its contents.
    ///
    /// Errors opening the file are returned here; read errors surface as
    /// items of the stream.
    pub(crate) async fn download<O>(&self, open: O) -> FsResult<ByteStream<'static>>
    where
        O: for<'a> FnOnce(&'a mut C) -> FsResult<Source<'a>> + Send + 'static,
    {
        let (opened_tx, opened_rx) = oneshot::channel();
        let (chunks_tx, mut chunks) = mpsc::channel::<io::Result<Bytes>>(QUEUE_DEPTH);
        self.execute(move |client| {
            let mut source = match open(client) {
                Ok(source) => {
                    let _ = opened_tx.send(Ok(()));
                    source
                }
                Err(e) => {
                    let _ = opened_tx.send(Err(e));
                    return;
                }
            };
            let mut buf = vec![0u8; CHUNK_SIZE];
            loop {
                let chunk = match source.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => Ok(Bytes::copy_from_slice(&buf[..n])),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => Err(e),
                };
                let failed = chunk.is_err();
                // A closed channel means the reader dropped the stream.
                if chunks_tx.blocking_send(chunk).is_err() || failed {
                    break;
                }
            }
        })?;
        opened_rx.await.map_err(|_| stopped(&self.name))??;

        Ok(stream! {
            while let Some(chunk) = chunks.recv().await {
                yield chunk;
            }
        }
        .boxed())
    }
}

/// Copy queued chunks into `sink`. `None` means the sender went away
/// without finishing.
fn pump(
    sink: &mut Sink<'_>,
    queue: &mut mpsc::Receiver<Upload>,
    path: &str,
) -> FsResult<Option<u64>> {
    let mut written = 0u64;
    loop {
        match queue.blocking_recv() {
            Some(Upload::Chunk(chunk)) => {
                sink.write_all(&chunk).map_err(|e| FsError::io(path, e))?;
                written += chunk.len() as u64;
            }
            Some(Upload::Finish) => {
                sink.flush().map_err(|e| FsError::io(path, e))?;
                return Ok(Some(written));
            }
            None => return Ok(None),
        }
    }
}

fn stopped(name: &str) -> FsError {
    FsError::backend(name, "connection worker has stopped")
}
