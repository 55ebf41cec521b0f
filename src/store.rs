//! Persistence of artifact records.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use tokio::{
    io::AsyncWriteExt,
    sync::{Mutex, RwLock},
};
use uuid::Uuid;

use crate::Artifact;

/// Create-only store for artifact records.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Persist a new record. Fails if a record with the same id exists.
    async fn create(&self, artifact: &Artifact) -> Result<()>;
}

/// Records kept in memory.
#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    artifacts: RwLock<Vec<Artifact>>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn list(&self) -> Vec<Artifact> {
        self.artifacts.read().await.clone()
    }

    pub async fn get(&self, id: &Uuid) -> Option<Artifact> {
        self.artifacts
            .read()
            .await
            .iter()
            .find(|a| a.id == *id)
            .cloned()
    }

    /// Every record written to `path`, oldest first.
    pub async fn find_by_path(&self, path: &str) -> Vec<Artifact> {
        self.artifacts
            .read()
            .await
            .iter()
            .filter(|a| a.path == path)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn create(&self, artifact: &Artifact) -> Result<()> {
        let mut artifacts = self.artifacts.write().await;
        if artifacts.iter().any(|a| a.id == artifact.id) {
            return Err(anyhow!("artifact {} already exists", artifact.id));
        }
        artifacts.push(artifact.clone());
        Ok(())
    }
}

/// Records appended as JSON lines to a local file.
///
/// The file is read once, on the first `create`, to index existing ids.
/// Later appends go through this store only.
#[derive(Debug)]
pub struct JsonLinesArtifactStore {
    path: PathBuf,
    ids: Mutex<Option<HashSet<Uuid>>>,
}

impl JsonLinesArtifactStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ids: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record in the file. A missing file holds no records.
    pub async fn load(&self) -> Result<Vec<Artifact>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", self.path.display()))
            }
        };
        contents
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str(line)
                    .with_context(|| format!("{}:{}: invalid record", self.path.display(), n + 1))
            })
            .collect()
    }
}

#[async_trait]
impl ArtifactStore for JsonLinesArtifactStore {
    async fn create(&self, artifact: &Artifact) -> Result<()> {
        let mut index = self.ids.lock().await;
        if index.is_none() {
            *index = Some(self.load().await?.into_iter().map(|a| a.id).collect());
        }
        let ids = index.get_or_insert_with(HashSet::new);
        if ids.contains(&artifact.id) {
            return Err(anyhow!("artifact {} already exists", artifact.id));
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut line = serde_json::to_vec(artifact)?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("opening {}", self.path.display()))?;
        file.write_all(&line).await?;
        file.flush().await?;
        ids.insert(artifact.id);
        Ok(())
    }
}
