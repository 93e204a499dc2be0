//! Video download using yt-dlp.
//!
//! Downloads the first MP4 rendition of a video into a scratch directory and
//! reports the path yt-dlp actually wrote.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};
use url::Url;

use crate::command::check_ytdlp;
use crate::error::{MediaError, MediaResult};

/// Network retries yt-dlp performs on its own before giving up.
pub const DEFAULT_DOWNLOAD_RETRIES: u32 = 5;

/// Prefer a single progressive MP4 stream; fall back to any MP4.
const FORMAT_SELECTOR: &str = "best[ext=mp4]/bestvideo[ext=mp4]/mp4";

/// Options for a single download.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// yt-dlp `--retries`
    pub retries: u32,
    /// Hard limit on the whole download
    pub timeout: Duration,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            retries: DEFAULT_DOWNLOAD_RETRIES,
            timeout: Duration::from_secs(1800),
        }
    }
}

/// Validate that a URL is something yt-dlp can be pointed at.
pub fn validate_source_url(url: &str) -> MediaResult<Url> {
    let parsed = Url::parse(url.trim())
        .map_err(|e| MediaError::UnsupportedUrl(format!("{}: {}", url, e)))?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(MediaError::UnsupportedUrl(format!(
                "{}: unsupported scheme '{}'",
                url, other
            )))
        }
    }

    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(MediaError::UnsupportedUrl(format!("{}: missing host", url)));
    }

    Ok(parsed)
}

/// Check if a URL is a well-known video platform.
pub fn is_known_platform(url: &str) -> bool {
    let known_domains = [
        "youtube.com",
        "youtu.be",
        "vimeo.com",
        "twitter.com",
        "x.com",
        "twitch.tv",
        "tiktok.com",
    ];

    validate_source_url(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
        .map_or(false, |host| {
            known_domains
                .iter()
                .any(|d| host == *d || host.ends_with(&format!(".{}", d)))
        })
}

/// Download a video from URL using yt-dlp.
///
/// Returns the path of the downloaded file inside `output_dir`.
pub async fn download_video(
    url: &str,
    output_dir: impl AsRef<Path>,
    options: &DownloadOptions,
) -> MediaResult<PathBuf> {
    let output_dir = output_dir.as_ref();
    let url = validate_source_url(url)?;

    check_ytdlp()?;
    tokio::fs::create_dir_all(output_dir).await?;

    if !is_known_platform(url.as_str()) {
        debug!(url = %url, "URL is not a known platform, trying anyway");
    }

    info!("Downloading video from {} to {}", url, output_dir.display());

    let template = output_dir.join("%(title)s.%(ext)s");
    let args = build_download_args(url.as_str(), &template, options.retries);

    let child = Command::new("yt-dlp")
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let output = match tokio::time::timeout(options.timeout, child.wait_with_output()).await {
        Ok(result) => result?,
        Err(_) => {
            warn!(url = %url, "yt-dlp timed out");
            return Err(MediaError::Timeout(options.timeout.as_secs()));
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!("yt-dlp stderr: {}", stderr);

        let error_msg = stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("Unknown error");
        return Err(MediaError::download_failed(format!(
            "yt-dlp failed: {}",
            error_msg
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let path = parse_downloaded_path(&stdout)
        .ok_or_else(|| MediaError::download_failed("yt-dlp did not report an output file"))?;

    if !path.exists() {
        return Err(MediaError::download_failed(format!(
            "Output file not created: {}",
            path.display()
        )));
    }

    let file_size = path.metadata()?.len();
    info!(
        output = %path.display(),
        size_mb = file_size as f64 / (1024.0 * 1024.0),
        "Downloaded video successfully"
    );

    Ok(path)
}

fn build_download_args(url: &str, template: &Path, retries: u32) -> Vec<String> {
    vec![
        "--no-playlist".to_string(),
        "--no-progress".to_string(),
        "--restrict-filenames".to_string(),
        "--retries".to_string(),
        retries.to_string(),
        "-f".to_string(),
        FORMAT_SELECTOR.to_string(),
        "-o".to_string(),
        template.to_string_lossy().to_string(),
        "--no-simulate".to_string(),
        "--print".to_string(),
        "after_move:filepath".to_string(),
        url.to_string(),
    ]
}

/// The final file path is the last non-empty line yt-dlp prints.
fn parse_downloaded_path(stdout: &str) -> Option<PathBuf> {
    stdout
        .lines()
        .map(str::trim)
        .rfind(|l| !l.is_empty())
        .map(PathBuf::from)
}
