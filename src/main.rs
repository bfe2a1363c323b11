use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;

use herdtrack::video::RawVideoBackend;
use herdtrack::{Config, JobManager, JobStatus, ReplayDetector, storage};

#[derive(Parser)]
#[command(name = "herdtrack", version, about = "Count and track livestock in video")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "HERDTRACK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process one video and write the annotated copy to the processed folder
    Process {
        input: PathBuf,

        /// Precomputed detections, one JSON object per frame
        #[arg(long)]
        detections: PathBuf,

        /// How often progress is logged, in milliseconds
        #[arg(long, default_value_t = 1000)]
        poll_ms: u64,
    },
    /// Delete uploads and outputs older than the retention window
    Sweep,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    herdtrack::logging::init(&config.logging.level)
        .map_err(|e| anyhow::anyhow!(e))
        .context("initializing logging")?;

    match cli.command {
        Command::Process {
            input,
            detections,
            poll_ms,
        } => process(&config, input, detections, Duration::from_millis(poll_ms)).await,
        Command::Sweep => {
            let dirs = [
                config.storage.upload_dir.clone(),
                config.storage.processed_dir.clone(),
            ];
            let report = storage::sweep_expired(
                &dirs,
                config.storage.retention(),
                SystemTime::now(),
                &Default::default(),
            );
            for failure in &report.failed {
                tracing::warn!(error = %failure, "could not remove file");
            }
            info!(removed = report.removed.len(), "sweep finished");
            Ok(())
        }
    }
}

async fn process(
    config: &Config,
    input: PathBuf,
    detections: PathBuf,
    poll: Duration,
) -> Result<()> {
    let detector = ReplayDetector::from_path(&detections)
        .with_context(|| format!("loading detections from {}", detections.display()))?;
    let annotator = config.annotator().context("building annotator")?;
    let manager = JobManager::new(
        config,
        Arc::new(detector),
        Arc::new(RawVideoBackend),
        annotator,
    );

    let ticket = manager
        .submit(&input)
        .with_context(|| format!("submitting {}", input.display()))?;

    let mut ticker = tokio::time::interval(poll);
    let status = loop {
        tokio::select! {
            status = manager.wait(ticket.job_id) => break status,
            _ = ticker.tick() => {
                let report = manager.report(ticket.job_id);
                info!(job_id = %ticket.job_id, progress = report.progress, "processing");
            }
        }
    };

    match status {
        Some(JobStatus::Succeeded) => {
            println!("{}", ticket.output_path.display());
            Ok(())
        }
        other => {
            let reason = manager
                .store()
                .get(ticket.job_id)
                .and_then(|r| r.error)
                .unwrap_or_else(|| format!("{other:?}"));
            bail!("job {} did not succeed: {reason}", ticket.job_id)
        }
    }
}
