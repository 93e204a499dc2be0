//! Pipeline error types.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use fanclip_media::MediaError;
use fanclip_models::StageTransitionError;
use fanclip_storage::StorageError;

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Acquiring the source failed.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Invalid source URL: {0}")]
    InvalidUrl(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Probe failed: {0}")]
    ProbeFailed(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<MediaError> for FetchError {
    fn from(e: MediaError) -> Self {
        match e {
            MediaError::UnsupportedUrl(url) => Self::InvalidUrl(url),
            MediaError::DownloadFailed { message } => Self::DownloadFailed(message),
            MediaError::YtDlpNotFound | MediaError::Timeout(_) => Self::DownloadFailed(e.to_string()),
            other => Self::ProbeFailed(other.to_string()),
        }
    }
}

/// Chunk planning rejected its inputs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlanError {
    #[error("Source duration must be finite and non-negative, got {0}")]
    InvalidDuration(f64),

    #[error("Chunk length must be finite and positive, got {0}")]
    InvalidChunkLength(f64),

    #[error("Plan would produce {count} chunks, limit is {limit}")]
    TooManyChunks { count: u64, limit: u64 },
}

/// What went wrong inside one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkErrorKind {
    Media,
    Storage,
    Detection,
    Timeout,
    Panicked,
}

impl ChunkErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Media => "media",
            Self::Storage => "storage",
            Self::Detection => "detection",
            Self::Timeout => "timeout",
            Self::Panicked => "panicked",
        }
    }
}

impl fmt::Display for ChunkErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single chunk, tagged with its index.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Chunk {index} failed ({kind}): {message}")]
pub struct ChunkError {
    pub index: usize,
    pub kind: ChunkErrorKind,
    pub message: String,
}

impl ChunkError {
    pub fn new(index: usize, kind: ChunkErrorKind, message: impl Into<String>) -> Self {
        Self {
            index,
            kind,
            message: message.into(),
        }
    }

    pub fn media(index: usize, e: MediaError) -> Self {
        let kind = match e {
            MediaError::DetectionFailed(_) => ChunkErrorKind::Detection,
            MediaError::Timeout(_) => ChunkErrorKind::Timeout,
            _ => ChunkErrorKind::Media,
        };
        Self::new(index, kind, e.to_string())
    }

    pub fn storage(index: usize, e: StorageError) -> Self {
        Self::new(index, ChunkErrorKind::Storage, e.to_string())
    }

    pub fn timeout(index: usize, limit: Duration) -> Self {
        Self::new(
            index,
            ChunkErrorKind::Timeout,
            format!("no result after {limit:?}"),
        )
    }

    pub fn panicked(index: usize, message: impl Into<String>) -> Self {
        Self::new(index, ChunkErrorKind::Panicked, message)
    }

    /// Check if another attempt at the same chunk could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ChunkErrorKind::Media | ChunkErrorKind::Storage | ChunkErrorKind::Timeout
        )
    }
}

/// Stitching the chunk artifacts failed.
#[derive(Debug, Error)]
pub enum StitchError {
    #[error("Artifact for chunk {index} is missing: {key}")]
    MissingArtifact { index: usize, key: String },

    #[error("No non-empty chunk results to stitch")]
    NothingToStitch,

    #[error("Stitched output is {actual:.3}s, chunks add up to {expected:.3}s")]
    DurationMismatch { expected: f64, actual: f64 },

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Top-level pipeline failure.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Planning failed: {0}")]
    Plan(#[from] PlanError),

    #[error("{} chunk(s) failed: {:?}", .indices.len(), .indices)]
    ChunksFailed {
        indices: Vec<usize>,
        errors: Vec<ChunkError>,
    },

    #[error("Chunk results out of order: {0}")]
    OrderViolation(String),

    #[error("Stitch failed: {0}")]
    Stitch(#[from] StitchError),

    #[error("Pipeline attempt timed out after {0} seconds")]
    Timeout(u64),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid stage transition: {0}")]
    Stage(#[from] StageTransitionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Build `ChunksFailed` from collected errors, sorted by index.
    pub fn chunks_failed(mut errors: Vec<ChunkError>) -> Self {
        errors.sort_by_key(|e| e.index);
        let indices = errors.iter().map(|e| e.index).collect();
        Self::ChunksFailed { indices, errors }
    }

    /// Every chunk index implicated in this failure.
    pub fn failed_indices(&self) -> Vec<usize> {
        match self {
            Self::ChunksFailed { indices, .. } => indices.clone(),
            Self::Stitch(StitchError::MissingArtifact { index, .. }) => vec![*index],
            _ => Vec::new(),
        }
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Fetch(_) => "fetch",
            Self::Plan(_) => "plan",
            Self::ChunksFailed { .. } => "chunks_failed",
            Self::OrderViolation(_) => "order_violation",
            Self::Stitch(_) => "stitch",
            Self::Timeout(_) => "timeout",
            Self::Config(_) => "config",
            Self::Stage(_) => "stage",
            Self::Io(_) => "io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunks_failed_sorts_indices() {
        let err = PipelineError::chunks_failed(vec![
            ChunkError::timeout(4, Duration::from_secs(600)),
            ChunkError::new(1, ChunkErrorKind::Media, "decode"),
        ]);
        assert_eq!(err.failed_indices(), vec![1, 4]);
        assert_eq!(err.to_string(), "2 chunk(s) failed: [1, 4]");
        assert_eq!(err.kind(), "chunks_failed");
    }

    #[test]
    fn test_missing_artifact_reports_index() {
        let err = PipelineError::from(StitchError::MissingArtifact {
            index: 3,
            key: "runs/r/clips/0003-000.mp4".into(),
        });
        assert_eq!(err.failed_indices(), vec![3]);
        assert!(PipelineError::Timeout(5).failed_indices().is_empty());
    }

    #[test]
    fn test_chunk_error_from_media() {
        let e = ChunkError::media(2, MediaError::detection_failed("bad frame"));
        assert_eq!(e.kind, ChunkErrorKind::Detection);
        assert!(!e.is_retryable());

        let e = ChunkError::media(2, MediaError::Timeout(30));
        assert_eq!(e.kind, ChunkErrorKind::Timeout);
        assert!(e.is_retryable());

        assert!(!ChunkError::panicked(0, "boom").is_retryable());
    }

    #[test]
    fn test_fetch_error_from_media() {
        assert!(matches!(
            FetchError::from(MediaError::UnsupportedUrl("ftp://x".into())),
            FetchError::InvalidUrl(_)
        ));
        assert!(matches!(
            FetchError::from(MediaError::download_failed("403")),
            FetchError::DownloadFailed(_)
        ));
        assert!(matches!(
            FetchError::from(MediaError::InvalidVideo("no stream".into())),
            FetchError::ProbeFailed(_)
        ));
    }
}
