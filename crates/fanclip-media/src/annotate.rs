//! Decode a time range, draw detected faces on every frame, re-encode.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use fanclip_models::EncodingConfig;

use crate::detection::{draw_boxes, FaceDetector, BOX_COLOR, BOX_THICKNESS};
use crate::error::{MediaError, MediaResult};
use crate::frames::{FrameGeometry, RawFrameReader, RawFrameWriter};
use crate::probe::VideoInfo;

/// Outcome of annotating one clip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnnotateStats {
    /// Frames decoded and re-encoded.
    pub frames: u64,
    /// Boxes drawn across all frames.
    pub faces: u64,
    pub fps: f64,
}

impl AnnotateStats {
    /// Playback length of the encoded clip.
    pub fn duration(&self) -> f64 {
        if self.fps > 0.0 {
            self.frames as f64 / self.fps
        } else {
            0.0
        }
    }
}

/// Annotate `[start_secs, stop_secs)` of `source` into `output`.
///
/// Adjacent ranges share their boundary exactly, so annotating consecutive
/// chunks yields every source frame once.
///
/// Every decoded frame is written exactly once, in order, so the output has
/// the same frame count and rate as the input range. When the range decodes
/// to no frames at all, no output file is created and `frames` is zero.
pub async fn annotate_clip(
    source: &Path,
    start_secs: f64,
    stop_secs: f64,
    output: &Path,
    info: &VideoInfo,
    detector: Arc<dyn FaceDetector>,
    encoding: &EncodingConfig,
) -> MediaResult<AnnotateStats> {
    if !source.exists() {
        return Err(MediaError::FileNotFound(source.to_path_buf()));
    }
    if info.fps <= 0.0 {
        return Err(MediaError::InvalidVideo(format!(
            "Unusable frame rate {} for {}",
            info.fps,
            source.display()
        )));
    }

    let geometry = FrameGeometry::new(info.width, info.height);
    let mut reader = RawFrameReader::open(source, start_secs, stop_secs, geometry)?;
    let mut writer: Option<RawFrameWriter> = None;
    let mut faces = 0u64;

    while let Some(frame) = reader.next_frame().await? {
        let detector = Arc::clone(&detector);
        let (frame, found) = tokio::task::spawn_blocking(move || {
            let mut frame = frame;
            let boxes = detector.detect(&frame)?;
            draw_boxes(&mut frame, &boxes, BOX_COLOR, BOX_THICKNESS);
            Ok::<_, MediaError>((frame, boxes.len() as u64))
        })
        .await
        .map_err(|e| MediaError::detection_failed(format!("Detector task failed: {e}")))??;
        faces += found;

        // Opened lazily so an empty range leaves no output behind.
        if writer.is_none() {
            writer = Some(RawFrameWriter::create(output, geometry, info.fps, encoding)?);
        }
        if let Some(sink) = writer.as_mut() {
            sink.write_frame(&frame).await?;
        }
    }

    let decoded = reader.finish().await?;
    let written = match writer {
        Some(sink) => sink.finish().await?,
        None => 0,
    };
    if decoded != written {
        return Err(MediaError::FrameCountMismatch {
            decoded,
            encoded: written,
        });
    }

    let stats = AnnotateStats {
        frames: written,
        faces,
        fps: info.fps,
    };

    if written == 0 {
        debug!(
            start = start_secs,
            stop = stop_secs,
            "Range decoded to no frames, skipping encode"
        );
    } else {
        info!(
            output = %output.display(),
            frames = stats.frames,
            faces = stats.faces,
            "Annotated clip"
        );
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::NoopDetector;

    fn info(fps: f64) -> VideoInfo {
        VideoInfo {
            duration: 10.0,
            width: 64,
            height: 48,
            fps,
            codec: "h264".to_string(),
            frame_count: None,
            size: 0,
        }
    }

    #[test]
    fn test_stats_duration() {
        let stats = AnnotateStats {
            frames: 90,
            faces: 0,
            fps: 30.0,
        };
        assert!((stats.duration() - 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let err = annotate_clip(
            &dir.path().join("missing.mp4"),
            0.0,
            1.0,
            &dir.path().join("out.mp4"),
            &info(30.0),
            Arc::new(NoopDetector),
            &EncodingConfig::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }

    #[tokio::test]
    async fn test_rejects_zero_fps() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("src.mp4");
        std::fs::write(&source, b"not a video").unwrap();
        let err = annotate_clip(
            &source,
            0.0,
            1.0,
            &dir.path().join("out.mp4"),
            &info(0.0),
            Arc::new(NoopDetector),
            &EncodingConfig::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, MediaError::InvalidVideo(_)));
    }
}
