//! Raw RGB24 frame streams over FFmpeg pipes.
//!
//! [`RawFrameReader`] decodes a time range of a video into packed RGB24
//! frames on FFmpeg's stdout; [`RawFrameWriter`] feeds frames into an FFmpeg
//! encoder on stdin. Together they let per-frame work run in Rust while
//! FFmpeg handles demuxing and encoding.

use std::path::Path;
use std::process::Stdio;

use image::RgbImage;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tracing::debug;

use fanclip_models::EncodingConfig;

use crate::command::{
    attach_stderr, collect_stderr, FfmpegCommand, FfmpegRunner, StderrTail, STDIN_PIPE,
    STDOUT_PIPE,
};
use crate::error::{MediaError, MediaResult};
use crate::filters::FILTER_EVEN_DIMENSIONS;

/// Pipe buffer sized for a few 1080p frames.
const PIPE_BUFFER_BYTES: usize = 8 * 1024 * 1024;

/// Dimensions of a raw frame stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
}

impl FrameGeometry {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Bytes in one packed RGB24 frame.
    pub fn frame_bytes(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

/// Decodes `[start, stop)` of a video into RGB24 frames.
pub struct RawFrameReader {
    child: Child,
    stdout: BufReader<ChildStdout>,
    stderr: StderrTail,
    geometry: FrameGeometry,
    frames_read: u64,
}

impl RawFrameReader {
    /// Start decoding. Frames are scaled to `geometry` so every read has a
    /// fixed size.
    pub fn open(
        source: impl AsRef<Path>,
        start_secs: f64,
        stop_secs: f64,
        geometry: FrameGeometry,
    ) -> MediaResult<Self> {
        let cmd = FfmpegCommand::new(source, STDOUT_PIPE)
            .time_range(start_secs, stop_secs)
            .no_audio()
            .output_args(["-sn", "-dn"])
            .video_filter(format!("scale={}:{}", geometry.width, geometry.height))
            .raw_rgb_output();

        let mut child = FfmpegRunner::new().spawn(&cmd, Stdio::null(), Stdio::piped())?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::internal("FFmpeg stdout not captured"))?;
        let stderr = collect_stderr(&mut child);

        Ok(Self {
            child,
            stdout: BufReader::with_capacity(PIPE_BUFFER_BYTES, stdout),
            stderr,
            geometry,
            frames_read: 0,
        })
    }

    /// Read the next frame, or `None` once the stream is exhausted.
    pub async fn next_frame(&mut self) -> MediaResult<Option<RgbImage>> {
        let expected = self.geometry.frame_bytes();
        let mut buf = vec![0u8; expected];
        let mut filled = 0;

        while filled < expected {
            let n = self.stdout.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        if filled == 0 {
            return Ok(None);
        }
        if filled < expected {
            return Err(MediaError::TruncatedFrame {
                got: filled,
                expected,
            });
        }

        self.frames_read += 1;
        RgbImage::from_raw(self.geometry.width, self.geometry.height, buf)
            .map(Some)
            .ok_or_else(|| MediaError::internal("Frame buffer does not match geometry"))
    }

    /// Wait for the decoder to exit and return the number of frames read.
    pub async fn finish(mut self) -> MediaResult<u64> {
        let result = FfmpegRunner::new().wait_for_completion(&mut self.child).await;
        attach_stderr(result, self.stderr.finish().await)?;
        debug!(frames = self.frames_read, "Decoder finished");
        Ok(self.frames_read)
    }
}

/// Encodes RGB24 frames into a video file at a fixed frame rate.
pub struct RawFrameWriter {
    child: Child,
    stdin: BufWriter<ChildStdin>,
    stderr: StderrTail,
    geometry: FrameGeometry,
    frames_written: u64,
}

impl RawFrameWriter {
    /// Start an encoder writing to `output`.
    pub fn create(
        output: impl AsRef<Path>,
        geometry: FrameGeometry,
        fps: f64,
        encoding: &EncodingConfig,
    ) -> MediaResult<Self> {
        let cmd = FfmpegCommand::new(STDIN_PIPE, output)
            .raw_rgb_input(geometry.width, geometry.height, fps)
            .video_filter(FILTER_EVEN_DIMENSIONS)
            .encoding(encoding)
            .no_audio()
            .output_args(["-movflags", "+faststart"]);

        let mut child = FfmpegRunner::new().spawn(&cmd, Stdio::piped(), Stdio::null())?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MediaError::internal("FFmpeg stdin not captured"))?;
        let stderr = collect_stderr(&mut child);

        Ok(Self {
            child,
            stdin: BufWriter::with_capacity(PIPE_BUFFER_BYTES, stdin),
            stderr,
            geometry,
            frames_written: 0,
        })
    }

    /// Append one frame.
    pub async fn write_frame(&mut self, frame: &RgbImage) -> MediaResult<()> {
        if frame.dimensions() != (self.geometry.width, self.geometry.height) {
            return Err(MediaError::FrameSizeMismatch {
                got_width: frame.width(),
                got_height: frame.height(),
                width: self.geometry.width,
                height: self.geometry.height,
            });
        }
        self.stdin.write_all(frame.as_raw()).await?;
        self.frames_written += 1;
        Ok(())
    }

    /// Close the input, wait for the encoder and return the frame count.
    pub async fn finish(mut self) -> MediaResult<u64> {
        self.stdin.flush().await?;
        self.stdin.shutdown().await?;
        drop(self.stdin);

        let result = FfmpegRunner::new().wait_for_completion(&mut self.child).await;
        attach_stderr(result, self.stderr.finish().await)?;
        debug!(frames = self.frames_written, "Encoder finished");
        Ok(self.frames_written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_bytes() {
        assert_eq!(FrameGeometry::new(640, 360).frame_bytes(), 640 * 360 * 3);
        assert_eq!(FrameGeometry::new(1, 1).frame_bytes(), 3);
    }
}
