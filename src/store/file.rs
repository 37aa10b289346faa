//! JSON-file store under the local state directory

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::CheckpointStore;
use crate::cluster::{ClusterPatch, ClusterRecord};
use crate::{Error, Result};

/// One `<name>.json` file per cluster
#[derive(Clone, Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Store rooted at `dir` (created on first write)
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the record files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    async fn read(&self, name: &str) -> Result<ClusterRecord> {
        let path = self.path(name);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(name.to_string()))
            }
            Err(e) => {
                return Err(Error::store(format!(
                    "failed to read {}: {e}",
                    path.display()
                )))
            }
        };
        serde_json::from_slice(&bytes).map_err(|e| {
            Error::serialization(format!("cannot decode {}: {e}", path.display()))
        })
    }

    async fn write(&self, record: &ClusterRecord) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::store(format!("failed to create {}: {e}", self.dir.display())))?;

        let path = self.path(&record.cluster_name);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(record)?;

        write_private(&tmp, &body)
            .await
            .map_err(|e| Error::store(format!("failed to write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| Error::store(format!("failed to replace {}: {e}", path.display())))?;

        debug!(cluster = %record.cluster_name, path = %path.display(), "Record written");
        Ok(())
    }
}

/// Write `body` to a fresh file readable only by the owner.
///
/// Records carry the bot private key and the Vault root token.
async fn write_private(path: &Path, body: &[u8]) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await?;
    file.write_all(body).await?;
    file.sync_all().await
}

#[async_trait]
impl CheckpointStore for FileStore {
    async fn get_cluster(&self, name: &str) -> Result<ClusterRecord> {
        self.read(name).await
    }

    async fn insert_cluster(&self, record: &ClusterRecord) -> Result<()> {
        if tokio::fs::try_exists(self.path(&record.cluster_name))
            .await
            .unwrap_or(false)
        {
            return Err(Error::store(format!(
                "cluster {} already exists",
                record.cluster_name
            )));
        }
        self.write(record).await
    }

    async fn update_cluster(&self, name: &str, patch: ClusterPatch) -> Result<ClusterRecord> {
        let mut record = self.read(name).await?;
        record.apply(&patch)?;
        self.write(&record).await?;
        Ok(record)
    }

    async fn delete_cluster(&self, name: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::store(format!("failed to delete {name}: {e}"))),
        }
    }

    async fn list_clusters(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(Error::store(format!("failed to list records: {e}"))),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}
