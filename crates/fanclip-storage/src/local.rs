//! Shared storage on a mounted directory.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};
use crate::shared::{validate_key, validate_prefix, SharedStorage};

/// Keys map to files under `root`. Suitable for a single host or a network
/// volume mounted at the same path on every worker.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    /// Open (and create if needed) a storage root.
    pub async fn open(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await.map_err(|e| {
            StorageError::config_error(format!(
                "Cannot create storage root {}: {}",
                root.display(),
                e
            ))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl SharedStorage for LocalStorage {
    async fn put_file(&self, local: &Path, key: &str) -> StorageResult<()> {
        let dst = self.path_for(key)?;
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Copy beside the destination, then rename, so readers never see a
        // partially written object.
        let partial = dst.with_extension("partial");
        fs::copy(local, &partial)
            .await
            .map_err(|e| StorageError::upload_failed(format!("{}: {}", local.display(), e)))?;
        if let Err(e) = fs::rename(&partial, &dst).await {
            let _ = fs::remove_file(&partial).await;
            return Err(StorageError::upload_failed(format!("{key}: {e}")));
        }

        debug!(key, "Stored file");
        Ok(())
    }

    async fn fetch_to_local(&self, key: &str, local: &Path) -> StorageResult<()> {
        let src = self.path_for(key)?;
        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent).await?;
        }
        match fs::copy(&src, local).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::not_found(key)),
            Err(e) => Err(StorageError::DownloadFailed(format!("{key}: {e}"))),
        }
    }

    async fn read_bytes(&self, key: &str) -> StorageResult<Vec<u8>> {
        let src = self.path_for(key)?;
        match fs::read(&src).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::not_found(key)),
            Err(e) => Err(StorageError::DownloadFailed(format!("{key}: {e}"))),
        }
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.path_for(key)?;
        Ok(fs::try_exists(&path).await? && fs::metadata(&path).await?.is_file())
    }

    async fn delete_prefix(&self, prefix: &str) -> StorageResult<u32> {
        validate_prefix(prefix)?;
        let target = self.root.join(prefix.trim_end_matches('/'));

        let metadata = match fs::metadata(&target).await {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(StorageError::delete_failed(e.to_string())),
        };

        if metadata.is_file() {
            fs::remove_file(&target)
                .await
                .map_err(|e| StorageError::delete_failed(e.to_string()))?;
            return Ok(1);
        }

        let removed = count_files(&target).await?;
        fs::remove_dir_all(&target)
            .await
            .map_err(|e| StorageError::delete_failed(e.to_string()))?;

        info!(prefix, removed, "Deleted prefix");
        Ok(removed)
    }

    fn local_path(&self, key: &str) -> Option<PathBuf> {
        self.path_for(key).ok()
    }

    fn backend(&self) -> &'static str {
        "local"
    }
}

async fn count_files(dir: &Path) -> StorageResult<u32> {
    let mut count = 0;
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let mut entries = fs::read_dir(&current).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                pending.push(entry.path());
            } else {
                count += 1;
            }
        }
    }
    Ok(count)
}
