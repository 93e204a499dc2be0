//! Per-chunk processing: decode a range, annotate faces, re-encode, store.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use fanclip_media::{annotate_clip, probe_video, FaceDetector, MediaError};
use fanclip_models::{clip_key, ChunkResult, ChunkSpec, EncodingConfig, RunId};
use fanclip_storage::SharedStorage;

use crate::error::ChunkError;

/// Processes one chunk. Implementations must be independent per chunk and
/// write only the chunk's own artifact key.
#[async_trait]
pub trait ChunkWorker: Send + Sync {
    async fn process(&self, spec: ChunkSpec) -> Result<ChunkResult, ChunkError>;
}

/// Builds the chunk worker for one pipeline attempt.
pub trait ChunkWorkerFactory: Send + Sync {
    fn for_run(&self, run: &RunId) -> Arc<dyn ChunkWorker>;
}

/// Factory for [`FfmpegChunkProcessor`]s sharing storage and detector.
pub struct FfmpegWorkerFactory {
    storage: Arc<dyn SharedStorage>,
    detector: Arc<dyn FaceDetector>,
    encoding: EncodingConfig,
    work_dir: PathBuf,
}

impl FfmpegWorkerFactory {
    pub fn new(
        storage: Arc<dyn SharedStorage>,
        detector: Arc<dyn FaceDetector>,
        encoding: EncodingConfig,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            storage,
            detector,
            encoding,
            work_dir: work_dir.into(),
        }
    }
}

impl ChunkWorkerFactory for FfmpegWorkerFactory {
    fn for_run(&self, run: &RunId) -> Arc<dyn ChunkWorker> {
        Arc::new(FfmpegChunkProcessor::new(
            run.clone(),
            Arc::clone(&self.storage),
            Arc::clone(&self.detector),
            self.encoding.clone(),
            self.work_dir.join(run.as_str()).join("chunks"),
        ))
    }
}

/// Chunk worker that draws detected faces on every frame.
pub struct FfmpegChunkProcessor {
    run: RunId,
    storage: Arc<dyn SharedStorage>,
    detector: Arc<dyn FaceDetector>,
    encoding: EncodingConfig,
    scratch_dir: PathBuf,
}

impl FfmpegChunkProcessor {
    pub fn new(
        run: RunId,
        storage: Arc<dyn SharedStorage>,
        detector: Arc<dyn FaceDetector>,
        encoding: EncodingConfig,
        scratch_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            run,
            storage,
            detector,
            encoding,
            scratch_dir: scratch_dir.into(),
        }
    }

    /// A readable local copy of the source. Mounted backends are read in
    /// place; remote ones are copied into the chunk's scratch directory.
    async fn local_source(&self, spec: &ChunkSpec, scratch: &Path) -> Result<PathBuf, ChunkError> {
        if let Some(path) = self.storage.local_path(&spec.source_ref) {
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Ok(path);
            }
        }

        let path = scratch.join("source.mp4");
        self.storage
            .fetch_to_local(&spec.source_ref, &path)
            .await
            .map_err(|e| ChunkError::storage(spec.index, e))?;
        Ok(path)
    }
}

#[async_trait]
impl ChunkWorker for FfmpegChunkProcessor {
    async fn process(&self, spec: ChunkSpec) -> Result<ChunkResult, ChunkError> {
        let index = spec.index;
        let media_err = |e: MediaError| ChunkError::media(index, e);

        tokio::fs::create_dir_all(&self.scratch_dir)
            .await
            .map_err(|e| media_err(e.into()))?;
        // Removed on drop, including when the task is aborted.
        let scratch = tempfile::Builder::new()
            .prefix(&format!("chunk-{index:05}-"))
            .tempdir_in(&self.scratch_dir)
            .map_err(|e| media_err(e.into()))?;

        let source = self.local_source(&spec, scratch.path()).await?;
        let info = probe_video(&source).await.map_err(media_err)?;

        let clip_path = scratch.path().join("clip.mp4");
        let stats = annotate_clip(
            &source,
            spec.start_seconds,
            spec.stop_seconds,
            &clip_path,
            &info,
            Arc::clone(&self.detector),
            &self.encoding,
        )
        .await
        .map_err(media_err)?;

        let key = clip_key(&self.run, spec.index, spec.start_seconds);
        if stats.frames == 0 {
            debug!(index, start = spec.start_seconds, "Chunk decoded to no frames");
            return Ok(ChunkResult {
                index,
                artifact_ref: key,
                frame_count: 0,
                duration_seconds: 0.0,
            });
        }

        self.storage
            .put_file(&clip_path, &key)
            .await
            .map_err(|e| ChunkError::storage(index, e))?;

        info!(
            index,
            key = %key,
            frames = stats.frames,
            faces = stats.faces,
            detector = self.detector.name(),
            "Chunk processed"
        );

        Ok(ChunkResult {
            index,
            artifact_ref: key,
            frame_count: stats.frames,
            duration_seconds: stats.duration(),
        })
    }
}
