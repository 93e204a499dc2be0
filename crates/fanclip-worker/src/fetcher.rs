//! Source acquisition: download, probe, publish into the run namespace.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use fanclip_media::{download_video, probe_video, validate_source_url, DownloadOptions};
use fanclip_models::{source_key, RunId, SourceAsset};
use fanclip_storage::SharedStorage;

use crate::error::FetchError;

/// Turns a URL into a [`SourceAsset`] stored under the run's namespace.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, url: &str, run: &RunId) -> Result<SourceAsset, FetchError>;
}

/// Fetcher backed by yt-dlp and ffprobe.
pub struct YtDlpFetcher {
    storage: Arc<dyn SharedStorage>,
    work_dir: PathBuf,
    options: DownloadOptions,
}

impl YtDlpFetcher {
    pub fn new(
        storage: Arc<dyn SharedStorage>,
        work_dir: impl Into<PathBuf>,
        options: DownloadOptions,
    ) -> Self {
        Self {
            storage,
            work_dir: work_dir.into(),
            options,
        }
    }
}

#[async_trait]
impl SourceFetcher for YtDlpFetcher {
    async fn fetch(&self, url: &str, run: &RunId) -> Result<SourceAsset, FetchError> {
        let url = validate_source_url(url)?;

        let download_dir = self.work_dir.join(run.as_str()).join("download");
        let path = download_video(url.as_str(), &download_dir, &self.options).await?;
        let info = probe_video(&path).await?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "source.mp4".to_string());

        let key = source_key(run, &name);
        self.storage.put_file(&path, &key).await?;

        info!(
            run_id = %run,
            name = %name,
            duration = info.duration,
            fps = info.fps,
            width = info.width,
            height = info.height,
            "Source fetched"
        );

        if let Err(e) = tokio::fs::remove_dir_all(&download_dir).await {
            debug!(error = %e, "Failed to clean download directory");
        }

        Ok(SourceAsset::new(key, info.duration, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fanclip_storage::LocalStorage;

    #[tokio::test]
    async fn test_rejects_invalid_url_before_downloading() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(LocalStorage::open(dir.path().join("s")).await.unwrap());
        let fetcher = YtDlpFetcher::new(storage, dir.path(), DownloadOptions::default());

        for bad in ["not a url", "ftp://example.com/v.mp4", "file:///etc/passwd"] {
            let err = fetcher.fetch(bad, &RunId::new()).await.unwrap_err();
            assert!(matches!(err, FetchError::InvalidUrl(_)), "{bad}: {err}");
        }
        assert!(!dir.path().join("download").exists());
    }
}
