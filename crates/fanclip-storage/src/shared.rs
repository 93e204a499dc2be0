//! The storage seam every pipeline stage writes through.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use fanclip_models::{run_prefix, RunId};

use crate::error::{StorageError, StorageResult};

/// Durable storage reachable by the coordinator and every chunk worker.
///
/// Keys are `/`-separated relative paths. Each chunk writes only its own
/// key, so implementations need no locking beyond per-object atomicity.
#[async_trait]
pub trait SharedStorage: Send + Sync {
    /// Store a local file under `key`, replacing any previous object.
    async fn put_file(&self, local: &Path, key: &str) -> StorageResult<()>;

    /// Copy the object at `key` into `local`, creating parent directories.
    async fn fetch_to_local(&self, key: &str, local: &Path) -> StorageResult<()>;

    /// Read a whole object into memory.
    async fn read_bytes(&self, key: &str) -> StorageResult<Vec<u8>>;

    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Delete every object under `prefix`. Returns the number removed.
    async fn delete_prefix(&self, prefix: &str) -> StorageResult<u32>;

    /// Direct filesystem path for `key`, when the backend is a mounted
    /// directory. Lets readers skip a copy.
    fn local_path(&self, _key: &str) -> Option<PathBuf> {
        None
    }

    /// Backend name for logging.
    fn backend(&self) -> &'static str;

    /// Remove everything a run wrote.
    async fn delete_run(&self, run: &RunId) -> StorageResult<u32> {
        self.delete_prefix(&run_prefix(run)).await
    }
}

/// Reject keys that are empty, absolute, or escape their namespace.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() || key.starts_with('/') || key.contains('\\') {
        return Err(StorageError::invalid_key(key));
    }
    if key
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(StorageError::invalid_key(key));
    }
    Ok(())
}

/// Prefixes may end with `/`; otherwise they follow key rules.
pub fn validate_prefix(prefix: &str) -> StorageResult<()> {
    validate_key(prefix.strip_suffix('/').unwrap_or(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert!(validate_key("runs/abc/clips/0000-000.mp4").is_ok());
        assert!(validate_key("out.mp4").is_ok());

        for bad in ["", "/abs", "runs//x", "runs/../etc", "./x", "a\\b", "runs/"] {
            assert!(
                matches!(validate_key(bad), Err(StorageError::InvalidKey(_))),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn test_validate_prefix() {
        assert!(validate_prefix("runs/abc/").is_ok());
        assert!(validate_prefix("runs/abc").is_ok());
        assert!(validate_prefix("/").is_err());
        assert!(validate_prefix("../").is_err());
    }
}
