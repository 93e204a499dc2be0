//! fanclip: annotate every face in a video, chunk by chunk, in parallel.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use fanclip_worker::{init_tracing, PipelineConfig, PipelineDriver};

const DEFAULT_URL: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

#[derive(Debug, Parser)]
#[command(name = "fanclip", version, about = "Chunked parallel face annotation")]
struct Cli {
    /// Source video URL
    #[arg(default_value = DEFAULT_URL)]
    url: String,

    /// Directory the annotated video is written to
    #[arg(short, long, env = "FANCLIP_OUTPUT_DIR", default_value = "/tmp")]
    output_dir: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(path) => {
            info!(path = %path.display(), "Wrote annotated video");
            println!("{}", path.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<PathBuf> {
    let config = PipelineConfig::from_env().context("invalid configuration")?;
    info!("Pipeline config: {:?}", config);

    let driver = PipelineDriver::from_config(config).await?;
    let output = tokio::select! {
        result = driver.run(&cli.url) => result?,
        _ = tokio::signal::ctrl_c() => anyhow::bail!("interrupted"),
    };

    tokio::fs::create_dir_all(&cli.output_dir)
        .await
        .with_context(|| format!("creating {}", cli.output_dir.display()))?;
    let path = cli.output_dir.join(&output.source_name);
    tokio::fs::write(&path, &output.artifact.bytes)
        .await
        .with_context(|| format!("writing {}", path.display()))?;

    info!(
        run_id = %output.run_id,
        attempts = output.attempts,
        chunks = output.chunks,
        "Pipeline finished"
    );
    Ok(path)
}
