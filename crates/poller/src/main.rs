//! NexoraOS Poller
//!
//! Drives an ebook job to completion from outside the gateway:
//! 1. Optionally starts a new job (`--topic`)
//! 2. Polls the job status on a fixed interval
//! 3. Requests the next missing chapter on each tick
//! 4. With `--finalize`, fetches the assembled Markdown once the job
//!    completes

mod client;

use anyhow::{bail, Context};
use clap::Parser;
use client::HttpDriver;
use nexora_common::{
    config::AppConfig,
    pipeline::{JobDriver, PollOutcome, Poller},
    VERSION,
};
use std::path::PathBuf;
use std::time::Duration;
use tokio::{signal, sync::watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// What to poll
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Job(Uuid),
    NewEbook { topic: String, length: Option<String> },
}

/// Drive an ebook job to completion through the NexoraOS gateway
#[derive(Parser, Debug, Clone)]
#[command(name = "poller", version, about)]
struct Args {
    /// Existing job to resume
    #[arg(value_name = "JOB_ID", required_unless_present = "topic", conflicts_with = "topic")]
    job_id: Option<Uuid>,

    /// Start a new ebook on this topic
    #[arg(long)]
    topic: Option<String>,

    /// Length of the new ebook
    #[arg(long, requires = "topic", value_parser = ["short", "medium", "long"])]
    length: Option<String>,

    /// Gateway base URL
    #[arg(long, default_value = "http://localhost:8080", env = "NEXORA_API_URL")]
    api_url: String,

    /// Bearer token
    #[arg(long, env = "NEXORA_TOKEN", hide_env_values = true)]
    token: String,

    /// Give up after this many status polls
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    max_polls: Option<u32>,

    /// Print the final Markdown once the job completes
    #[arg(long, default_value_t = false)]
    finalize: bool,

    /// Write the final Markdown to a file (implies --finalize)
    #[arg(long)]
    output: Option<PathBuf>,
}

impl Args {
    fn target(&self) -> Target {
        match (self.job_id, &self.topic) {
            (Some(id), _) => Target::Job(id),
            (None, topic) => Target::NewEbook {
                topic: topic.clone().unwrap_or_default(),
                length: self.length.clone(),
            },
        }
    }

    fn wants_markdown(&self) -> bool {
        self.finalize || self.output.is_some()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let config = AppConfig::load().context("failed to load configuration")?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("Starting NexoraOS Poller v{}", VERSION);

    let driver = HttpDriver::new(&args.api_url, &args.token, request_timeout(&config))?;

    let job_id = match args.target() {
        Target::Job(id) => id,
        Target::NewEbook { topic, length } => {
            let started = driver.start_ebook(&topic, length.as_deref()).await?;
            info!(
                job_id = %started.job_id,
                title = ?started.title,
                chapters = started.total_chapters,
                "Ebook started"
            );
            started.job_id
        }
    };

    let mut poller = Poller::new(driver, interval(&config));
    if let Some(max) = args.max_polls {
        poller = poller.with_max_polls(max);
    }

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, stopping after the current request...");
            let _ = cancel_tx.send(true);
        }
    });

    match poller.run(job_id, cancel_rx).await {
        PollOutcome::Complete(progress) => {
            info!(%job_id, chapters = progress.total_chapters, "Job complete");
            if args.wants_markdown() {
                let markdown = poller.driver().finalize(job_id).await?;
                match &args.output {
                    Some(path) => {
                        tokio::fs::write(path, markdown)
                            .await
                            .with_context(|| format!("failed to write {}", path.display()))?;
                        info!(path = %path.display(), "Ebook written");
                    }
                    None => println!("{}", markdown),
                }
            }
            Ok(())
        }
        PollOutcome::Failed(progress) => {
            let message = progress.error_message.unwrap_or_else(|| "unknown error".to_string());
            error!(%job_id, progress = progress.progress, error = %message, "Job failed");
            bail!("job {} failed: {}", job_id, message)
        }
        PollOutcome::Cancelled => {
            warn!(%job_id, "Polling cancelled; rerun with the job id to resume");
            Ok(())
        }
        PollOutcome::Exhausted(last) => {
            let progress = last.map(|p| format!("{}/{}", p.progress, p.total_chapters));
            bail!(
                "job {} not complete after {} polls (progress {})",
                job_id,
                args.max_polls.unwrap_or_default(),
                progress.as_deref().unwrap_or("unknown")
            )
        }
    }
}

fn interval(config: &AppConfig) -> Duration {
    config.poll_interval().max(Duration::from_millis(100))
}

/// A chapter request may spend every LLM attempt before answering
fn request_timeout(config: &AppConfig) -> Duration {
    let llm = &config.llm;
    Duration::from_secs(llm.timeout_secs * u64::from(llm.max_attempts.max(1)) + 30)
}
