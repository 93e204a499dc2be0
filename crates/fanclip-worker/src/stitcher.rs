//! Ordered reassembly of chunk clips into the final artifact.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use fanclip_media::{concat_clips, probe_video};
use fanclip_models::{final_key, ChunkResult, FinalArtifact, RunId};
use fanclip_storage::SharedStorage;

use crate::error::StitchError;

/// Slack allowed between expected and measured duration when the frame
/// interval is unknown.
const FALLBACK_TOLERANCE_SECS: f64 = 0.05;

/// Joins chunk artifacts, strictly in the order given.
#[async_trait]
pub trait ArtifactStitcher: Send + Sync {
    async fn stitch(&self, run: &RunId, results: &[ChunkResult]) -> Result<FinalArtifact, StitchError>;
}

/// Stitcher using FFmpeg's concat demuxer with stream copy.
pub struct FfmpegStitcher {
    storage: Arc<dyn SharedStorage>,
    scratch_dir: PathBuf,
}

impl FfmpegStitcher {
    pub fn new(storage: Arc<dyn SharedStorage>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage,
            scratch_dir: scratch_dir.into(),
        }
    }
}

#[async_trait]
impl ArtifactStitcher for FfmpegStitcher {
    async fn stitch(&self, run: &RunId, results: &[ChunkResult]) -> Result<FinalArtifact, StitchError> {
        // Chunks that decoded to no frames have no artifact.
        let parts: Vec<&ChunkResult> = results.iter().filter(|r| !r.is_empty()).collect();
        if parts.is_empty() {
            return Err(StitchError::NothingToStitch);
        }

        for part in &parts {
            if !self.storage.exists(&part.artifact_ref).await? {
                return Err(StitchError::MissingArtifact {
                    index: part.index,
                    key: part.artifact_ref.clone(),
                });
            }
        }

        tokio::fs::create_dir_all(&self.scratch_dir).await?;
        let scratch = tempfile::Builder::new()
            .prefix("stitch-")
            .tempdir_in(&self.scratch_dir)?;

        let mut inputs = Vec::with_capacity(parts.len());
        for (position, part) in parts.iter().enumerate() {
            let path = match self.storage.local_path(&part.artifact_ref) {
                Some(path) => path,
                None => {
                    let path = scratch.path().join(format!("{position:05}.mp4"));
                    self.storage.fetch_to_local(&part.artifact_ref, &path).await?;
                    path
                }
            };
            inputs.push(path);
        }

        let output = scratch.path().join("out.mp4");
        concat_clips(&inputs, &output, scratch.path()).await?;

        let expected: f64 = parts.iter().map(|p| p.duration_seconds).sum();
        let info = probe_video(&output).await?;
        check_duration(run, expected, info.duration, info.frame_interval(), parts.len())?;

        let key = final_key(run);
        self.storage.put_file(&output, &key).await?;
        let bytes = self.storage.read_bytes(&key).await?;

        info!(
            run_id = %run,
            clips = parts.len(),
            skipped = results.len() - parts.len(),
            bytes = bytes.len(),
            duration = info.duration,
            "Stitched final artifact"
        );

        Ok(FinalArtifact::new(key, bytes))
    }
}

/// Compare the stitched duration with the sum of chunk durations.
///
/// Up to one frame interval is exact. Each join may add or lose one more
/// frame, which is logged. Anything past that means frames went missing.
fn check_duration(
    run: &RunId,
    expected: f64,
    actual: f64,
    frame_interval: f64,
    clips: usize,
) -> Result<(), StitchError> {
    let tolerance = if frame_interval > 0.0 {
        frame_interval
    } else {
        FALLBACK_TOLERANCE_SECS
    };
    let deviation = (actual - expected).abs();
    if deviation <= tolerance {
        return Ok(());
    }
    if deviation > tolerance * (clips as f64 + 1.0) {
        return Err(StitchError::DurationMismatch { expected, actual });
    }
    warn!(
        run_id = %run,
        expected,
        actual,
        "Stitched duration differs from the sum of chunk durations"
    );
    Ok(())
}
