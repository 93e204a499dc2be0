use std::path::Path;
use std::process::Command;

use anyhow::Context;

use fanclip_media::{check_ffmpeg, check_ffprobe, check_ytdlp};
use fanclip_storage::R2Client;
use fanclip_worker::{build_detector, PipelineConfig, StorageKind};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = PipelineConfig::from_env().context("invalid configuration")?;

    println!(
        "fanclip-selfcheck: starting with work_dir={}",
        config.work_dir.display()
    );
    ensure_workdir(&config.work_dir).await?;
    check_ffmpeg().context("ffmpeg")?;
    check_ffprobe().context("ffprobe")?;
    check_ytdlp().context("yt-dlp")?;
    ensure_version("ffmpeg")?;

    let detector = build_detector(config.detector, config.cascade_path.as_deref());
    println!("fanclip-selfcheck: face detector {}", detector.name());

    if config.storage == StorageKind::R2 {
        ensure_env_present(&[
            "R2_ENDPOINT_URL",
            "R2_ACCESS_KEY_ID",
            "R2_SECRET_ACCESS_KEY",
            "R2_BUCKET_NAME",
        ])?;
        R2Client::from_env()?
            .check_connectivity()
            .await
            .context("r2 bucket unreachable")?;
    }

    println!("fanclip-selfcheck: ok");
    Ok(())
}

async fn ensure_workdir<P: AsRef<Path>>(path: P) -> anyhow::Result<()> {
    let path = path.as_ref();
    tokio::fs::create_dir_all(path).await?;
    let probe = path.join(".selfcheck");
    tokio::fs::write(&probe, b"ok")
        .await
        .with_context(|| format!("work dir {} is not writable", path.display()))?;
    tokio::fs::remove_file(&probe).await?;
    Ok(())
}

fn ensure_version(binary: &str) -> anyhow::Result<()> {
    let output = Command::new(binary)
        .arg("-version")
        .output()
        .map_err(|e| anyhow::anyhow!("{} not available: {}", binary, e))?;

    if !output.status.success() {
        return Err(anyhow::anyhow!(
            "{} -version failed: {:?}",
            binary,
            output.status
        ));
    }
    Ok(())
}

fn ensure_env_present(vars: &[&str]) -> anyhow::Result<()> {
    for var in vars {
        if std::env::var(var).is_err() {
            return Err(anyhow::anyhow!("missing required env var {}", var));
        }
    }
    Ok(())
}
