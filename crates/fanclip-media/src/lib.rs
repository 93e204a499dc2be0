//! FFmpeg CLI wrapper for chunked clip processing.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building and process supervision
//! - Source download through yt-dlp and probing through ffprobe
//! - Raw RGB frame streaming over FFmpeg pipes
//! - Per-frame face detection with box annotation (OpenCV Haar cascade
//!   behind the `opencv` feature, skin-tone heuristic otherwise)
//! - Lossless concatenation of encoded clips

pub mod annotate;
pub mod cascade;
pub mod command;
pub mod concat;
pub mod detection;
pub mod download;
pub mod error;
pub mod filters;
pub mod frames;
pub mod probe;

pub use annotate::{annotate_clip, AnnotateStats};
#[cfg(feature = "opencv")]
pub use cascade::HaarCascadeDetector;
pub use cascade::find_cascade;
pub use command::{check_ffmpeg, check_ffprobe, check_ytdlp, FfmpegCommand, FfmpegRunner};
pub use concat::concat_clips;
pub use detection::{
    BoundingBox, FaceDetector, NoopDetector, SkinToneConfig, SkinToneDetector,
};
pub use download::{download_video, validate_source_url, DownloadOptions};
pub use error::{MediaError, MediaResult};
pub use frames::{FrameGeometry, RawFrameReader, RawFrameWriter};
pub use probe::{probe_video, VideoInfo};
