//! SFTP backend over libssh2.

use std::{
    fmt,
    net::TcpStream,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ssh2::{ErrorCode, FileStat, Session, Sftp};
use tracing::{debug, warn};

use crate::{
    backends::worker::{Sink, Source, Worker},
    connection::SftpOptions,
    file_info::{join_path, relative_segments},
    ByteStream,
    FileInfo,
    Filesystem,
    FsError,
    FsResult,
    Layout,
    WriteBody,
};

/// `LIBSSH2_FX_NO_SUCH_FILE`
const NO_SUCH_FILE: i32 = 2;

const DIR_MODE: i32 = 0o755;

struct Connection {
    session: Session,
    sftp: Sftp,
}

/// A remote directory tree reached over SFTP.
///
/// Authenticates with the configured password, else the private key file,
/// else the running ssh agent.
pub struct SftpFs {
    worker: Worker<Connection>,
    label: String,
    root: PathBuf,
    max_list_items: Option<usize>,
}

impl fmt::Debug for SftpFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SftpFs")
            .field("label", &self.label)
            .field("root", &self.root)
            .field("max_list_items", &self.max_list_items)
            .finish()
    }
}

impl SftpFs {
    pub async fn connect(options: &SftpOptions) -> FsResult<Self> {
        let user = options
            .user
            .clone()
            .or_else(|| std::env::var("USER").ok())
            .ok_or_else(|| FsError::config(format!("sftp {}: no user configured", options.host)))?;
        let label = format!("{}@{}:{}", user, options.host, options.port);
        let root = PathBuf::from(options.root.as_deref().unwrap_or("."));

        let session_options = options.clone();
        let worker = Worker::spawn(format!("sftp-{}", options.host), move || {
            open_session(&session_options, &user)
        })
        .await?;

        debug!(remote = %label, root = %root.display(), "connected SFTP filesystem");
        Ok(Self {
            worker,
            label,
            root,
            max_list_items: None,
        })
    }

    pub fn with_max_list_items(mut self, max_list_items: usize) -> Self {
        self.max_list_items = Some(max_list_items);
        self
    }
}

fn open_session(options: &SftpOptions, user: &str) -> FsResult<Connection> {
    let address = format!("{}:{}", options.host, options.port);
    let tcp = TcpStream::connect(&address).map_err(|e| FsError::backend(address.as_str(), e))?;

    let mut session = Session::new().map_err(|e| FsError::backend(address.as_str(), e))?;
    session.set_tcp_stream(tcp);
    session
        .handshake()
        .map_err(|e| FsError::backend(address.as_str(), e))?;

    let auth = match (&options.password, &options.key) {
        (Some(password), _) => session.userauth_password(user, password),
        (None, Some(key)) => session.userauth_pubkey_file(user, None, Path::new(key), None),
        (None, None) => session.userauth_agent(user),
    };
    auth.map_err(|e| {
        FsError::config(format!("sftp {}: authentication failed for {}: {}", address, user, e))
    })?;

    let sftp = session
        .sftp()
        .map_err(|e| FsError::backend(address.as_str(), e))?;
    Ok(Connection { session, sftp })
}

fn sftp_error(path: &str, e: ssh2::Error) -> FsError {
    if matches!(e.code(), ErrorCode::SFTP(NO_SUCH_FILE)) {
        FsError::NotFound {
            path: path.to_string(),
        }
    } else {
        FsError::backend(path, e)
    }
}

/// Canonical relative path plus the remote path below `root`.
fn remote_path(root: &Path, path: &str) -> FsResult<(String, PathBuf)> {
    let segments = relative_segments(path)?;
    let remote = segments.iter().fold(root.to_path_buf(), |acc, s| acc.join(s));
    Ok((segments.join("/"), remote))
}

/// Directories between `root` and the parent of `relative`, outermost first.
fn parent_dirs(root: &Path, relative: &str) -> Vec<PathBuf> {
    let segments: Vec<&str> = relative.split('/').collect();
    (1..segments.len())
        .map(|n| segments[..n].iter().fold(root.to_path_buf(), |acc, s| acc.join(s)))
        .collect()
}

fn file_info(full_path: String, stat: &FileStat) -> FileInfo {
    let mod_time = stat
        .mtime
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs as i64, 0))
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    if stat.is_dir() {
        FileInfo::dir(full_path, mod_time)
    } else {
        FileInfo::file(full_path, stat.size.unwrap_or(0), mod_time)
    }
}

fn create_dirs(sftp: &Sftp, dirs: &[PathBuf], path: &str) -> FsResult<()> {
    for dir in dirs {
        match sftp.stat(dir) {
            Ok(_) => continue,
            Err(e) if matches!(e.code(), ErrorCode::SFTP(NO_SUCH_FILE)) => {
                sftp.mkdir(dir, DIR_MODE).map_err(|e| sftp_error(path, e))?
            }
            Err(e) => return Err(sftp_error(path, e)),
        }
    }
    Ok(())
}

#[async_trait]
impl Filesystem for SftpFs {
    fn layout(&self) -> Layout {
        Layout::Hierarchical
    }

    fn max_list_items(&self) -> Option<usize> {
        self.max_list_items
    }

    async fn close(&self) -> FsResult<()> {
        let label = self.label.clone();
        self.worker
            .run(move |conn| {
                conn.session
                    .disconnect(None, "closing", None)
                    .map_err(|e| FsError::backend(label.as_str(), e))
            })
            .await
    }

    async fn stat(&self, path: &str) -> FsResult<FileInfo> {
        let (relative, remote) = remote_path(&self.root, path)?;
        let target = path.to_string();
        let stat = self
            .worker
            .run(move |conn| conn.sftp.stat(&remote).map_err(|e| sftp_error(&target, e)))
            .await?;
        Ok(file_info(relative, &stat))
    }

    async fn list_dir(&self, dir: &str) -> FsResult<Vec<FileInfo>> {
        let (relative, remote) = remote_path(&self.root, dir)?;
        let target = dir.to_string();
        let entries = self
            .worker
            .run(move |conn| conn.sftp.readdir(&remote).map_err(|e| sftp_error(&target, e)))
            .await?;

        Ok(entries
            .into_iter()
            .filter_map(|(path, stat)| {
                let name = path.file_name()?.to_string_lossy().into_owned();
                Some(file_info(join_path(&relative, &name), &stat))
            })
            .collect())
    }

    async fn read(&self, path: &str) -> FsResult<ByteStream<'static>> {
        let (_, remote) = remote_path(&self.root, path)?;
        let target = path.to_string();
        self.worker
            .download(move |conn| {
                let file = conn.sftp.open(&remote).map_err(|e| sftp_error(&target, e))?;
                Ok(Box::new(file) as Source<'_>)
            })
            .await
    }

    async fn write(&self, path: &str, body: WriteBody<'_>) -> FsResult<FileInfo> {
        let (relative, remote) = remote_path(&self.root, path)?;
        if relative.is_empty() {
            return Err(FsError::InvalidPath {
                path: path.to_string(),
                reason: "cannot write to the root directory".to_string(),
            });
        }

        let parents = parent_dirs(&self.root, &relative);
        let target = path.to_string();
        let partial = remote.clone();
        let written = self
            .worker
            .upload(
                path,
                body,
                move |conn| {
                    create_dirs(&conn.sftp, &parents, &target)?;
                    let file = conn.sftp.create(&remote).map_err(|e| sftp_error(&target, e))?;
                    Ok(Box::new(file) as Sink<'_>)
                },
                move |conn| {
                    if let Err(e) = conn.sftp.unlink(&partial) {
                        warn!(path = %partial.display(), error = %e, "failed to remove partial sftp file");
                    }
                },
            )
            .await?;

        debug!(path = %relative, bytes = written, "wrote sftp file");
        self.stat(&relative).await
    }
}
