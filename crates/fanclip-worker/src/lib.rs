//! Chunked parallel clip pipeline.
//!
//! This crate provides:
//! - Chunk planning over a source's duration
//! - Per-chunk face annotation through FFmpeg
//! - Ordered fan-out on a bounded tokio task pool
//! - Ordered stitching into the final artifact
//! - A driver with stage tracking, whole-run retries and cleanup

pub mod config;
pub mod coordinator;
pub mod dispatcher;
pub mod driver;
pub mod error;
pub mod fetcher;
pub mod logging;
pub mod metrics;
pub mod planner;
pub mod processor;
pub mod retry;
pub mod stitcher;

pub use config::{DetectorKind, PipelineConfig, StorageKind};
pub use coordinator::FanOutCoordinator;
pub use dispatcher::{Dispatcher, TaskPoolDispatcher};
pub use driver::{build_detector, PipelineDriver, PipelineOutput, StageTracker};
pub use error::{
    ChunkError, ChunkErrorKind, FetchError, PipelineError, PipelineResult, PlanError, StitchError,
};
pub use fetcher::{SourceFetcher, YtDlpFetcher};
pub use logging::{init_tracing, RunLogger};
pub use planner::{plan, TailPolicy};
pub use processor::{ChunkWorker, ChunkWorkerFactory, FfmpegChunkProcessor, FfmpegWorkerFactory};
pub use retry::{retry_async, retry_async_if, RetryConfig, RetryResult};
pub use stitcher::{ArtifactStitcher, FfmpegStitcher};
