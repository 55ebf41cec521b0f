//! SMB backend speaking to the server directly through libsmbclient.

use std::{fmt, time::SystemTime};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pavao::{
    SmbClient,
    SmbCredentials,
    SmbDirentType,
    SmbError,
    SmbMode,
    SmbOpenOptions,
    SmbOptions as ClientOptions,
};
use tracing::{debug, warn};

use crate::{
    backends::worker::{Sink, Source, Worker},
    connection::SmbOptions,
    file_info::{join_path, relative_segments},
    ByteStream,
    FileInfo,
    Filesystem,
    FsError,
    FsResult,
    Layout,
    WriteBody,
};

const DIR_MODE: u32 = 0o755;

fn credentials(options: &SmbOptions) -> SmbCredentials {
    let mut credentials = SmbCredentials::default()
        .server(format!("smb://{}:{}", options.server, options.port))
        .share(format!("/{}", options.share.trim_matches('/')));
    if let Some(username) = &options.username {
        credentials = credentials.username(username);
    }
    if let Some(password) = &options.password {
        credentials = credentials.password(password);
    }
    if let Some(workgroup) = &options.workgroup {
        credentials = credentials.workgroup(workgroup);
    }
    credentials
}

/// A directory tree on an SMB share.
pub struct SmbFs {
    worker: Worker<SmbClient>,
    unc_path: String,
    root: String,
    max_list_items: Option<usize>,
}

impl fmt::Debug for SmbFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmbFs")
            .field("unc_path", &self.unc_path)
            .field("root", &self.root)
            .field("max_list_items", &self.max_list_items)
            .finish()
    }
}

impl SmbFs {
    pub async fn connect(options: SmbOptions) -> FsResult<Self> {
        let unc_path = options.unc_path();
        let root = options.share_root();

        let credentials = credentials(&options);
        let label = unc_path.clone();
        let worker = Worker::spawn(format!("smb-{}", options.server), move || {
            SmbClient::new(credentials, ClientOptions::default().one_share_per_server(true))
                .map_err(|e| FsError::config(format!("share {}: {}", label, e)))
        })
        .await?;

        let fs = Self {
            worker,
            unc_path,
            root,
            max_list_items: None,
        };
        // libsmbclient connects lazily; fail here rather than on first use.
        let root_info = fs.stat("").await?;
        if !root_info.is_dir {
            return Err(FsError::config(format!(
                "{}{} is not a directory",
                fs.unc_path, fs.root
            )));
        }
        debug!(share = %fs.unc_path, root = %fs.root, "connected SMB filesystem");
        Ok(fs)
    }

    pub fn with_max_list_items(mut self, max_list_items: usize) -> Self {
        self.max_list_items = Some(max_list_items);
        self
    }
}

/// Canonical relative path plus the share path below `root`.
fn share_path(root: &str, path: &str) -> FsResult<(String, String)> {
    let relative = relative_segments(path)?.join("/");
    let remote = if relative.is_empty() {
        if root.is_empty() {
            "/".to_string()
        } else {
            root.to_string()
        }
    } else {
        format!("{}/{}", root, relative)
    };
    Ok((relative, remote))
}

fn smb_error(path: &str, e: SmbError) -> FsError {
    match e {
        SmbError::Io(source) => FsError::io(path, source),
        other => FsError::backend(path, other),
    }
}

fn mod_time(time: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(time)
}

/// Share paths of the directories above `relative`, outermost first.
fn parent_dirs(root: &str, relative: &str) -> Vec<String> {
    let segments: Vec<&str> = relative.split('/').collect();
    (1..segments.len())
        .map(|n| format!("{}/{}", root, segments[..n].join("/")))
        .collect()
}

fn stat_entry(client: &SmbClient, relative: String, remote: &str, path: &str) -> FsResult<FileInfo> {
    let stat = client.stat(remote).map_err(|e| smb_error(path, e))?;
    let modified = mod_time(stat.modified);
    if relative.is_empty() {
        return Ok(FileInfo::dir(relative, modified));
    }

    // The stat mode is not portable across servers; the parent listing
    // carries the entry type.
    let (parent, name) = match remote.rsplit_once('/') {
        Some(("", name)) => ("/", name),
        Some((parent, name)) => (parent, name),
        None => ("/", remote),
    };
    let is_dir = client
        .list_dir(parent)
        .map_err(|e| smb_error(path, e))?
        .iter()
        .any(|entry| entry.name() == name && matches!(entry.get_type(), SmbDirentType::Dir));
    if is_dir {
        Ok(FileInfo::dir(relative, modified))
    } else {
        Ok(FileInfo::file(relative, stat.size, modified))
    }
}

fn create_dirs(client: &SmbClient, dirs: &[String], path: &str) -> FsResult<()> {
    for dir in dirs {
        match client.stat(dir) {
            Ok(_) => continue,
            Err(SmbError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => client
                .mkdir(dir, SmbMode::from(DIR_MODE))
                .map_err(|e| smb_error(path, e))?,
            Err(e) => return Err(smb_error(path, e)),
        }
    }
    Ok(())
}

#[async_trait]
impl Filesystem for SmbFs {
    fn layout(&self) -> Layout {
        Layout::Hierarchical
    }

    fn max_list_items(&self) -> Option<usize> {
        self.max_list_items
    }

    async fn stat(&self, path: &str) -> FsResult<FileInfo> {
        let (relative, remote) = share_path(&self.root, path)?;
        let target = path.to_string();
        self.worker
            .run(move |client| stat_entry(client, relative, &remote, &target))
            .await
    }

    async fn list_dir(&self, dir: &str) -> FsResult<Vec<FileInfo>> {
        let (relative, remote) = share_path(&self.root, dir)?;
        let target = dir.to_string();
        self.worker
            .run(move |client| {
                let entries = client.list_dir(&remote).map_err(|e| smb_error(&target, e))?;
                let mut infos = Vec::with_capacity(entries.len());
                for entry in entries {
                    let name = entry.name();
                    if name == "." || name == ".." {
                        continue;
                    }
                    let full_path = join_path(&relative, name);
                    let child = format!("{}/{}", remote.trim_end_matches('/'), name);
                    let stat = client
                        .stat(&child)
                        .map_err(|e| smb_error(full_path.as_str(), e))?;
                    let modified = mod_time(stat.modified);
                    infos.push(match entry.get_type() {
                        SmbDirentType::Dir => FileInfo::dir(full_path, modified),
                        _ => FileInfo::file(full_path, stat.size, modified),
                    });
                }
                Ok(infos)
            })
            .await
    }

    async fn read(&self, path: &str) -> FsResult<ByteStream<'static>> {
        let (_, remote) = share_path(&self.root, path)?;
        let target = path.to_string();
        self.worker
            .download(move |client| {
                let file = client
                    .open_with(&remote, SmbOpenOptions::default().read(true))
                    .map_err(|e| smb_error(&target, e))?;
                Ok(Box::new(file) as Source<'_>)
            })
            .await
    }

    async fn write(&self, path: &str, body: WriteBody<'_>) -> FsResult<FileInfo> {
        let (relative, remote) = share_path(&self.root, path)?;
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
                move |client| {
                    create_dirs(client, &parents, &target)?;
                    let file = client
                        .open_with(
                            &remote,
                            SmbOpenOptions::default().create(true).write(true).truncate(true),
                        )
                        .map_err(|e| smb_error(&target, e))?;
                    Ok(Box::new(file) as Sink<'_>)
                },
                move |client| {
                    if let Err(e) = client.unlink(&partial) {
                        warn!(path = %partial, error = %e, "failed to remove partial smb file");
                    }
                },
            )
            .await?;

        debug!(share = %self.unc_path, path = %relative, bytes = written, "wrote smb file");
        self.stat(&relative).await
    }
}
