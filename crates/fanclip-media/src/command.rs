//! FFmpeg command builder and runner.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::debug;

use fanclip_models::EncodingConfig;

use crate::error::{MediaError, MediaResult};

/// Input/output path FFmpeg reads from or writes to a pipe.
pub const STDIN_PIPE: &str = "pipe:0";
pub const STDOUT_PIPE: &str = "pipe:1";

/// Number of trailing stderr lines kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Input file path
    input: PathBuf,
    /// Output file path
    output: PathBuf,
    /// Input arguments (before -i)
    input_args: Vec<String>,
    /// Output arguments (after -i)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
    /// Log level
    log_level: String,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            input_args: Vec::new(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Add input arguments (before -i).
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    /// Add multiple input arguments.
    pub fn input_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add output arguments (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Read only `[start, stop)` of the input (input-side `-ss` and `-t`).
    ///
    /// Both bounds are snapped to whole microseconds before the length is
    /// taken, so a range ending at `x` and one starting at `x` meet exactly.
    pub fn time_range(self, start_secs: f64, stop_secs: f64) -> Self {
        let start = to_micros(start_secs);
        let stop = to_micros(stop_secs).max(start);
        self.input_args([
            "-ss".to_string(),
            format_micros(start),
            "-t".to_string(),
            format_micros(stop - start),
        ])
    }

    /// Read raw RGB24 frames of the given geometry from the input.
    pub fn raw_rgb_input(self, width: u32, height: u32, fps: f64) -> Self {
        self.input_args([
            "-f".to_string(),
            "rawvideo".to_string(),
            "-pix_fmt".to_string(),
            "rgb24".to_string(),
            "-s".to_string(),
            format!("{}x{}", width, height),
            "-framerate".to_string(),
            format_fps(fps),
        ])
    }

    /// Write raw RGB24 frames to the output.
    pub fn raw_rgb_output(self) -> Self {
        self.output_args(["-f", "rawvideo", "-pix_fmt", "rgb24"])
    }

    /// Treat the input as an FFmpeg concat list.
    pub fn concat_input(self) -> Self {
        self.input_args(["-f", "concat", "-safe", "0"])
    }

    /// Set video filter.
    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    /// Copy streams without re-encoding.
    pub fn codec_copy(self) -> Self {
        self.output_arg("-c").output_arg("copy")
    }

    /// Drop audio from the output.
    pub fn no_audio(self) -> Self {
        self.output_arg("-an")
    }

    /// Apply an encoding configuration.
    pub fn encoding(self, encoding: &EncodingConfig) -> Self {
        self.output_args(encoding.to_ffmpeg_args())
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-hide_banner".to_string());
        args.push("-nostdin".to_string());
        args.push("-v".to_string());
        args.push(self.log_level.clone());

        args.extend(self.input_args.clone());

        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());

        args.extend(self.output_args.clone());

        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// Seconds to FFmpeg's microsecond time base.
fn to_micros(seconds: f64) -> u64 {
    (seconds.max(0.0) * 1_000_000.0).round() as u64
}

fn format_micros(micros: u64) -> String {
    format!("{}.{:06}", micros / 1_000_000, micros % 1_000_000)
}

/// Format a frame rate for FFmpeg without losing NTSC precision.
pub fn format_fps(fps: f64) -> String {
    // 29.97 and friends are 30000/1001 etc.
    for base in [24.0, 30.0, 60.0, 120.0] {
        let ntsc = base * 1000.0 / 1001.0;
        if (fps - ntsc).abs() < 0.005 {
            return format!("{}/1001", (base * 1000.0) as u64);
        }
    }
    let trimmed = format!("{:.6}", fps);
    trimmed.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// Spawns FFmpeg children and collects their exit status.
///
/// Callers bound run time from outside; dropping the future kills the child.
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegRunner;

impl FfmpegRunner {
    pub fn new() -> Self {
        Self
    }

    /// Run an FFmpeg command to completion.
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        let mut child = self.spawn(cmd, Stdio::null(), Stdio::null())?;
        let stderr = collect_stderr(&mut child);
        let result = self.wait_for_completion(&mut child).await;
        let tail = stderr.finish().await;
        attach_stderr(result, tail)
    }

    /// Spawn an FFmpeg command with the given stdin/stdout wiring.
    ///
    /// Stderr is always piped; the child is killed if its handle is dropped.
    pub fn spawn(&self, cmd: &FfmpegCommand, stdin: Stdio, stdout: Stdio) -> MediaResult<Child> {
        check_ffmpeg()?;

        let args = cmd.build_args();
        debug!("Running FFmpeg: ffmpeg {}", args.join(" "));

        let child = Command::new("ffmpeg")
            .args(&args)
            .stdin(stdin)
            .stdout(stdout)
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        Ok(child)
    }

    /// Wait for the child to exit.
    pub async fn wait_for_completion(&self, child: &mut Child) -> MediaResult<()> {
        let status = child.wait().await?;
        if status.success() {
            Ok(())
        } else {
            Err(MediaError::ffmpeg_failed(
                "FFmpeg exited with non-zero status",
                None,
                status.code(),
            ))
        }
    }
}

/// Background reader that keeps the last lines of a child's stderr.
pub struct StderrTail {
    handle: Option<JoinHandle<String>>,
}

impl StderrTail {
    /// Start draining `reader` in the background.
    pub fn spawn<R>(reader: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            let mut tail: Vec<String> = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                if tail.len() == STDERR_TAIL_LINES {
                    tail.remove(0);
                }
                tail.push(line);
            }
            tail.join("\n")
        });
        Self { handle: Some(handle) }
    }

    fn empty() -> Self {
        Self { handle: None }
    }

    /// Wait for the stream to close and return the collected tail.
    pub async fn finish(self) -> Option<String> {
        let handle = self.handle?;
        match handle.await {
            Ok(tail) if !tail.trim().is_empty() => Some(tail),
            _ => None,
        }
    }
}

/// Take the child's stderr and start draining it.
pub fn collect_stderr(child: &mut Child) -> StderrTail {
    match child.stderr.take() {
        Some(stderr) => StderrTail::spawn(stderr),
        None => StderrTail::empty(),
    }
}

/// Fill in the stderr tail of an FFmpeg failure.
pub fn attach_stderr(result: MediaResult<()>, tail: Option<String>) -> MediaResult<()> {
    match result {
        Err(MediaError::FfmpegFailed {
            message,
            stderr: None,
            exit_code,
        }) => Err(MediaError::FfmpegFailed {
            message,
            stderr: tail,
            exit_code,
        }),
        other => other,
    }
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

/// Check if FFprobe is available.
pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}

/// Check if yt-dlp is available.
pub fn check_ytdlp() -> MediaResult<PathBuf> {
    which::which("yt-dlp").map_err(|_| MediaError::YtDlpNotFound)
}
