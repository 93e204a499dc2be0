//! Chunk specifications and results.
//!
//! A chunk is a bounded time-slice of the source video. Ordering by `index`
//! is significant and must be preserved from planning through stitching.

use serde::{Deserialize, Serialize};

/// One unit of fan-out work: the interval `[start_seconds, stop_seconds)`
/// of the source referenced by `source_ref`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkSpec {
    /// Position of the chunk in the plan
    pub index: usize,
    /// Start of the interval in seconds (inclusive)
    pub start_seconds: f64,
    /// End of the interval in seconds (exclusive)
    pub stop_seconds: f64,
    /// Storage key of the source video
    pub source_ref: String,
}

impl ChunkSpec {
    /// Length of the interval in seconds.
    #[inline]
    pub fn duration(&self) -> f64 {
        self.stop_seconds - self.start_seconds
    }
}

/// The output of processing one chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkResult {
    /// Index of the chunk this result belongs to
    pub index: usize,
    /// Storage key of the annotated clip
    pub artifact_ref: String,
    /// Number of frames written to the clip
    pub frame_count: u64,
    /// Duration of the written clip in seconds
    pub duration_seconds: f64,
}

impl ChunkResult {
    /// A chunk whose interval decoded to no frames. No artifact is written
    /// for it and the stitcher skips it.
    pub fn is_empty(&self) -> bool {
        self.frame_count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_duration() {
        let spec = ChunkSpec {
            index: 2,
            start_seconds: 2.0,
            stop_seconds: 2.5,
            source_ref: "runs/x/source/a.mp4".to_string(),
        };
        assert!((spec.duration() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_empty_result() {
        let result = ChunkResult {
            index: 0,
            artifact_ref: "runs/x/clips/0000-000.mp4".to_string(),
            frame_count: 0,
            duration_seconds: 0.0,
        };
        assert!(result.is_empty());
    }
}
