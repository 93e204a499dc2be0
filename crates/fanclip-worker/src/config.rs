//! Pipeline configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use fanclip_models::EncodingConfig;

use crate::error::PipelineError;
use crate::planner::TailPolicy;

/// Where run artifacts are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageKind {
    /// A directory, shared by every worker when mounted at the same path.
    Local { root: PathBuf },
    /// Cloudflare R2, configured from `R2_*` variables.
    R2,
}

/// Which per-frame detector annotates clips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DetectorKind {
    /// OpenCV Haar cascade; falls back to `SkinTone` when unavailable.
    #[default]
    Haar,
    SkinTone,
    None,
}

impl FromStr for DetectorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "haar" | "haar_cascade" | "cascade" | "opencv" => Ok(Self::Haar),
            "skin" | "skin_tone" | "heuristic" => Ok(Self::SkinTone),
            "none" | "off" => Ok(Self::None),
            other => Err(format!("unknown detector: {other}")),
        }
    }
}

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Chunk length in seconds
    pub chunk_length_secs: f64,
    /// Handling of a trailing partial chunk
    pub tail_policy: TailPolicy,
    /// Chunks processed at once
    pub max_parallel_chunks: usize,
    /// Wall-time bound on one chunk
    pub chunk_timeout: Duration,
    /// Extra attempts per chunk inside the dispatcher
    pub chunk_retries: u32,
    /// Extra attempts of the whole pipeline
    pub max_retries: u32,
    /// Base delay for exponential backoff between attempts
    pub retry_base_delay: Duration,
    /// Optional bound on one whole attempt
    pub run_timeout: Option<Duration>,
    /// yt-dlp retry count
    pub download_retries: u32,
    /// yt-dlp wall-time bound
    pub download_timeout: Duration,
    /// Scratch space for downloads, clips and the stitched file
    pub work_dir: PathBuf,
    pub storage: StorageKind,
    pub detector: DetectorKind,
    /// Haar cascade file; the usual OpenCV install paths are searched when unset
    pub cascade_path: Option<PathBuf>,
    /// Leave the run namespace in storage after the attempt
    pub keep_artifacts: bool,
    pub encoding: EncodingConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let work_dir = PathBuf::from("/tmp/fanclip");
        Self {
            chunk_length_secs: 1.0,
            tail_policy: TailPolicy::IncludePartial,
            max_parallel_chunks: default_parallelism(),
            chunk_timeout: Duration::from_secs(600),
            chunk_retries: 0,
            max_retries: 1,
            retry_base_delay: Duration::from_millis(500),
            run_timeout: None,
            download_retries: 5,
            download_timeout: Duration::from_secs(1800),
            storage: StorageKind::Local {
                root: work_dir.join("storage"),
            },
            work_dir,
            detector: DetectorKind::Haar,
            cascade_path: None,
            keep_artifacts: false,
            encoding: EncodingConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Result<Self, PipelineError> {
        let defaults = Self::default();

        let work_dir = std::env::var("FANCLIP_WORK_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.work_dir);

        let storage = match std::env::var("FANCLIP_STORAGE")
            .unwrap_or_else(|_| "local".to_string())
            .to_lowercase()
            .as_str()
        {
            "local" => StorageKind::Local {
                root: std::env::var("FANCLIP_STORAGE_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| work_dir.join("storage")),
            },
            "r2" => StorageKind::R2,
            other => {
                return Err(PipelineError::config(format!(
                    "FANCLIP_STORAGE must be local or r2, got {other}"
                )))
            }
        };

        let mut encoding = defaults.encoding;
        if let Some(crf) = env_parse("FANCLIP_CRF")? {
            encoding = encoding.with_crf(crf);
        }
        if let Ok(preset) = std::env::var("FANCLIP_PRESET") {
            encoding = encoding.with_preset(preset);
        }

        let config = Self {
            chunk_length_secs: env_parse("FANCLIP_CHUNK_SECONDS")?
                .unwrap_or(defaults.chunk_length_secs),
            tail_policy: env_parse("FANCLIP_TAIL_POLICY")?.unwrap_or(defaults.tail_policy),
            max_parallel_chunks: env_parse("FANCLIP_MAX_PARALLEL")?
                .unwrap_or(defaults.max_parallel_chunks),
            chunk_timeout: env_parse("FANCLIP_CHUNK_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.chunk_timeout),
            chunk_retries: env_parse("FANCLIP_CHUNK_RETRIES")?.unwrap_or(defaults.chunk_retries),
            max_retries: env_parse("FANCLIP_MAX_RETRIES")?.unwrap_or(defaults.max_retries),
            retry_base_delay: env_parse("FANCLIP_RETRY_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_base_delay),
            run_timeout: env_parse("FANCLIP_RUN_TIMEOUT_SECS")?.map(Duration::from_secs),
            download_retries: env_parse("FANCLIP_DOWNLOAD_RETRIES")?
                .unwrap_or(defaults.download_retries),
            download_timeout: env_parse("FANCLIP_DOWNLOAD_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.download_timeout),
            work_dir,
            storage,
            detector: env_parse("DETECTOR")?.unwrap_or(defaults.detector),
            cascade_path: std::env::var("FANCLIP_CASCADE_PATH").ok().map(PathBuf::from),
            keep_artifacts: env_parse("FANCLIP_KEEP_ARTIFACTS")?.unwrap_or(false),
            encoding,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !self.chunk_length_secs.is_finite() || self.chunk_length_secs <= 0.0 {
            return Err(PipelineError::config(format!(
                "chunk length must be positive, got {}",
                self.chunk_length_secs
            )));
        }
        if self.max_parallel_chunks == 0 {
            return Err(PipelineError::config("max_parallel_chunks must be at least 1"));
        }
        if self.chunk_timeout.is_zero() {
            return Err(PipelineError::config("chunk_timeout must be non-zero"));
        }
        if self.run_timeout.is_some_and(|t| t.is_zero()) {
            return Err(PipelineError::config("run_timeout must be non-zero when set"));
        }
        if self.encoding.crf > 51 {
            return Err(PipelineError::config(format!(
                "CRF must be 0-51, got {}",
                self.encoding.crf
            )));
        }
        Ok(())
    }
}

fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Parse an optional variable. Unset is `None`; set but malformed is an error.
fn env_parse<T>(name: &str) -> Result<Option<T>, PipelineError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| PipelineError::config(format!("{name}={raw:?}: {e}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.chunk_retries, 0);
        assert_eq!(config.chunk_timeout, Duration::from_secs(600));
        assert_eq!(config.download_retries, 5);
        assert_eq!(config.tail_policy, TailPolicy::IncludePartial);
        assert!(config.max_parallel_chunks >= 1);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = PipelineConfig::default();
        config.chunk_length_secs = 0.0;
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));

        let mut config = PipelineConfig::default();
        config.max_parallel_chunks = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.run_timeout = Some(Duration::ZERO);
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.encoding.crf = 60;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_parse() {
        std::env::set_var("FANCLIP_TEST_PARSE_OK", " 3 ");
        std::env::set_var("FANCLIP_TEST_PARSE_BAD", "three");
        assert_eq!(env_parse::<u32>("FANCLIP_TEST_PARSE_OK").unwrap(), Some(3));
        assert!(env_parse::<u32>("FANCLIP_TEST_PARSE_BAD").is_err());
        assert_eq!(env_parse::<u32>("FANCLIP_TEST_PARSE_UNSET").unwrap(), None);
    }

    #[test]
    fn test_detector_kind_parse() {
        assert_eq!("none".parse::<DetectorKind>(), Ok(DetectorKind::None));
        assert_eq!("skin".parse::<DetectorKind>(), Ok(DetectorKind::SkinTone));
        assert_eq!("haar".parse::<DetectorKind>(), Ok(DetectorKind::Haar));
        assert_eq!(" OpenCV ".parse::<DetectorKind>(), Ok(DetectorKind::Haar));
        assert_eq!(DetectorKind::default(), DetectorKind::Haar);
        assert!("yunet".parse::<DetectorKind>().is_err());
    }
}
