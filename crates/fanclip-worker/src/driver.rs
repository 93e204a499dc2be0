//! End-to-end orchestration: fetch, plan, fan out, stitch.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn, Instrument};

#[cfg(feature = "opencv")]
use fanclip_media::{find_cascade, HaarCascadeDetector};
use fanclip_media::{DownloadOptions, FaceDetector, NoopDetector, SkinToneDetector};
use fanclip_models::{FinalArtifact, PipelineStage, RunId};
use fanclip_storage::{LocalStorage, R2Client, SharedStorage};

use crate::config::{DetectorKind, PipelineConfig, StorageKind};
use crate::coordinator::FanOutCoordinator;
use crate::dispatcher::{Dispatcher, TaskPoolDispatcher};
use crate::error::{PipelineError, PipelineResult};
use crate::fetcher::{SourceFetcher, YtDlpFetcher};
use crate::logging::RunLogger;
use crate::metrics;
use crate::planner::plan;
use crate::processor::{ChunkWorkerFactory, FfmpegWorkerFactory};
use crate::retry::{retry_async, RetryConfig};
use crate::stitcher::{ArtifactStitcher, FfmpegStitcher};

/// What a successful run hands back to the entrypoint.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Run ID of the attempt that succeeded
    pub run_id: RunId,
    /// Basename of the downloaded source
    pub source_name: String,
    pub artifact: FinalArtifact,
    /// Chunks planned for the successful attempt
    pub chunks: usize,
    /// Attempts made, including the successful one
    pub attempts: u32,
}

/// Forward-only stage tracking with a log line per transition.
#[derive(Debug)]
pub struct StageTracker {
    stage: PipelineStage,
    logger: RunLogger,
}

impl StageTracker {
    pub fn new(logger: RunLogger) -> Self {
        Self {
            stage: PipelineStage::default(),
            logger,
        }
    }

    pub fn current(&self) -> PipelineStage {
        self.stage
    }

    pub fn advance(&mut self, to: PipelineStage) -> PipelineResult<()> {
        let from = self.stage;
        self.stage = from.transition(to)?;
        self.logger.log_stage(from, to);
        Ok(())
    }

    /// Mark the attempt failed. No-op once terminal.
    pub fn fail(&mut self) {
        if let Ok(next) = self.stage.transition(PipelineStage::Failed) {
            self.logger.log_stage(self.stage, next);
            self.stage = next;
        }
    }
}

/// Build the configured detector. A Haar cascade that cannot be loaded falls
/// back to the skin-tone heuristic with a warning.
pub fn build_detector(kind: DetectorKind, cascade_path: Option<&Path>) -> Arc<dyn FaceDetector> {
    match kind {
        DetectorKind::Haar => haar_or_fallback(cascade_path),
        DetectorKind::SkinTone => Arc::new(SkinToneDetector::default()),
        DetectorKind::None => Arc::new(NoopDetector),
    }
}

#[cfg(feature = "opencv")]
fn haar_or_fallback(cascade_path: Option<&Path>) -> Arc<dyn FaceDetector> {
    let Some(path) = find_cascade(cascade_path) else {
        warn!(
            requested = ?cascade_path,
            "No Haar cascade found, falling back to skin-tone detection"
        );
        return Arc::new(SkinToneDetector::default());
    };
    match HaarCascadeDetector::new(&path) {
        Ok(detector) => {
            info!(path = %path.display(), "Using Haar cascade face detector");
            Arc::new(detector)
        }
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "Haar cascade failed to load, falling back to skin-tone detection"
            );
            Arc::new(SkinToneDetector::default())
        }
    }
}

#[cfg(not(feature = "opencv"))]
fn haar_or_fallback(_cascade_path: Option<&Path>) -> Arc<dyn FaceDetector> {
    warn!("Built without opencv, falling back to skin-tone detection");
    Arc::new(SkinToneDetector::default())
}

/// Runs the pipeline for one URL, retrying whole attempts.
pub struct PipelineDriver {
    config: PipelineConfig,
    storage: Arc<dyn SharedStorage>,
    fetcher: Arc<dyn SourceFetcher>,
    dispatcher: Arc<dyn Dispatcher>,
    workers: Arc<dyn ChunkWorkerFactory>,
    stitcher: Arc<dyn ArtifactStitcher>,
}

impl PipelineDriver {
    pub fn new(
        config: PipelineConfig,
        storage: Arc<dyn SharedStorage>,
        fetcher: Arc<dyn SourceFetcher>,
        dispatcher: Arc<dyn Dispatcher>,
        workers: Arc<dyn ChunkWorkerFactory>,
        stitcher: Arc<dyn ArtifactStitcher>,
    ) -> Self {
        Self {
            config,
            storage,
            fetcher,
            dispatcher,
            workers,
            stitcher,
        }
    }

    /// Wire the production collaborators from configuration.
    pub async fn from_config(config: PipelineConfig) -> PipelineResult<Self> {
        config.validate()?;

        let storage: Arc<dyn SharedStorage> = match &config.storage {
            StorageKind::Local { root } => Arc::new(
                LocalStorage::open(root.clone())
                    .await
                    .map_err(|e| PipelineError::config(e.to_string()))?,
            ),
            StorageKind::R2 => Arc::new(
                R2Client::from_env().map_err(|e| PipelineError::config(e.to_string()))?,
            ),
        };

        let detector = build_detector(config.detector, config.cascade_path.as_deref());
        let detector_name = detector.name();

        let fetcher = YtDlpFetcher::new(
            Arc::clone(&storage),
            config.work_dir.clone(),
            DownloadOptions {
                retries: config.download_retries,
                timeout: config.download_timeout,
            },
        );
        let workers = FfmpegWorkerFactory::new(
            Arc::clone(&storage),
            detector,
            config.encoding.clone(),
            config.work_dir.clone(),
        );
        let stitcher = FfmpegStitcher::new(Arc::clone(&storage), config.work_dir.join("stitch"));
        let dispatcher = TaskPoolDispatcher::from_config(&config);

        info!(
            storage = storage.backend(),
            detector = detector_name,
            max_parallel = config.max_parallel_chunks,
            chunk_seconds = config.chunk_length_secs,
            tail_policy = %config.tail_policy,
            "Pipeline configured"
        );

        Ok(Self::new(
            config,
            storage,
            Arc::new(fetcher),
            Arc::new(dispatcher),
            Arc::new(workers),
            Arc::new(stitcher),
        ))
    }

    /// Run the pipeline, retrying failed attempts up to `max_retries` times.
    pub async fn run(&self, source_url: &str) -> PipelineResult<PipelineOutput> {
        let retry = RetryConfig::new("pipeline")
            .with_max_retries(self.config.max_retries)
            .with_base_delay(self.config.retry_base_delay);

        let outcome = retry_async(&retry, |attempt| self.run_attempt(source_url, attempt)).await;
        let attempts = outcome.attempts();

        outcome.into_result().map(|mut output| {
            output.attempts = attempts;
            output
        })
    }

    async fn run_attempt(&self, source_url: &str, attempt: u32) -> PipelineResult<PipelineOutput> {
        let run = RunId::new();
        let logger = RunLogger::new(&run, "pipeline");
        let span = logger.create_span();

        async {
            logger.log_start(&format!("attempt {} for {}", attempt + 1, source_url));

            let mut tracker = StageTracker::new(logger.clone());
            let result = self.execute(source_url, &run, &logger, &mut tracker).await;

            self.cleanup(&run, &logger).await;

            match &result {
                Ok(output) => {
                    metrics::record_attempt("ok");
                    logger.log_completion(&format!(
                        "{} chunks, {} bytes",
                        output.chunks,
                        output.artifact.len()
                    ));
                }
                Err(e) => {
                    metrics::record_attempt("failed");
                    logger.log_error(&format!("{} (failed chunks: {:?})", e, e.failed_indices()));
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    /// One attempt, bounded by `run_timeout`. The tracker ends `Failed` on any
    /// error, including the timeout.
    async fn execute(
        &self,
        source_url: &str,
        run: &RunId,
        logger: &RunLogger,
        tracker: &mut StageTracker,
    ) -> PipelineResult<PipelineOutput> {
        let staged = self.staged(source_url, run, logger, tracker);
        let result = match self.config.run_timeout {
            Some(limit) => tokio::time::timeout(limit, staged)
                .await
                .unwrap_or_else(|_| Err(PipelineError::Timeout(limit.as_secs()))),
            None => staged.await,
        };

        if result.is_err() {
            tracker.fail();
        }
        result
    }

    async fn staged(
        &self,
        source_url: &str,
        run: &RunId,
        logger: &RunLogger,
        tracker: &mut StageTracker,
    ) -> PipelineResult<PipelineOutput> {
        let source = self.fetcher.fetch(source_url, run).await?;

        tracker.advance(PipelineStage::Planning)?;
        let specs = plan(
            &source,
            self.config.chunk_length_secs,
            self.config.tail_policy,
        )?;
        logger.log_progress(&format!(
            "planned {} chunks over {:.3}s",
            specs.len(),
            source.duration_seconds
        ));

        tracker.advance(PipelineStage::FanningOut)?;
        let coordinator =
            FanOutCoordinator::new(Arc::clone(&self.dispatcher), self.workers.for_run(run));
        let results = coordinator.map_ordered(&specs).await?;

        tracker.advance(PipelineStage::Stitching)?;
        let artifact = self.stitcher.stitch(run, &results).await?;

        tracker.advance(PipelineStage::Done)?;
        Ok(PipelineOutput {
            run_id: run.clone(),
            source_name: source.name,
            artifact,
            chunks: specs.len(),
            attempts: 1,
        })
    }

    /// Drop everything the attempt wrote, unless asked to keep it.
    async fn cleanup(&self, run: &RunId, logger: &RunLogger) {
        if self.config.keep_artifacts {
            logger.log_progress("keeping run artifacts");
            return;
        }

        if let Err(e) = self.storage.delete_run(run).await {
            logger.log_warning(&format!("failed to delete run namespace: {e}"));
        }

        let scratch = self.config.work_dir.join(run.as_str());
        match tokio::fs::remove_dir_all(&scratch).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %scratch.display(), error = %e, "Failed to remove scratch"),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}
