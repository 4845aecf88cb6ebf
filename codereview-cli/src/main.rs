use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use codereview_core::{
    HttpTransport, RetryPolicy, ReviewClient, ReviewPhase, ReviewResult, ReviewSession,
};
use std::io::{IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Codereview: submit source code for an AI review
#[derive(Parser, Debug)]
#[command(name = "codereview")]
#[command(about = "Submit source code to the review service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Review a file, or standard input when no file is given
    Review(ReviewArgs),
    /// Check that the review service is up
    Health(HealthArgs),
}

#[derive(Parser, Debug)]
struct ReviewArgs {
    /// File to review; `-` or nothing reads standard input
    file: Option<PathBuf>,

    /// Base URL of the review service
    #[arg(long, env = "CODEREVIEW_URL", default_value = "http://localhost:5000")]
    server_url: String,

    /// Total attempts before giving up
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u32).range(1..))]
    max_attempts: u32,

    /// Base of the exponential backoff between attempts, in milliseconds
    #[arg(long, default_value_t = 1000)]
    base_delay_ms: u64,

    /// Per-attempt timeout in seconds (no limit by default)
    #[arg(long)]
    timeout_secs: Option<u64>,
}

#[derive(Parser, Debug)]
struct HealthArgs {
    /// Base URL of the review service
    #[arg(long, env = "CODEREVIEW_URL", default_value = "http://localhost:5000")]
    server_url: String,
}

impl ReviewArgs {
    fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
        }
    }
}

/// Read the code to review from `file`, or stdin for `None` and `-`.
fn read_code(file: Option<&Path>) -> Result<String> {
    match file {
        Some(path) if path != Path::new("-") => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display())),
        _ => {
            let stdin = std::io::stdin();
            if stdin.is_terminal() {
                eprintln!("Reading code from standard input (end with Ctrl-D)...");
            }
            let mut code = String::new();
            stdin
                .lock()
                .read_to_string(&mut code)
                .context("Failed to read code from standard input")?;
            Ok(code)
        }
    }
}

/// One status line for a phase change, or `None` for phases not worth showing.
fn describe_phase(phase: &ReviewPhase, max_attempts: u32) -> Option<String> {
    match phase {
        ReviewPhase::Attempting { attempt: 1 } => Some("Requesting review...".to_string()),
        ReviewPhase::Attempting { attempt } => Some(format!(
            "Requesting review (attempt {}/{})...",
            attempt, max_attempts
        )),
        ReviewPhase::Retrying {
            next_attempt,
            delay,
        } => Some(format!(
            "Attempt {} failed, retrying in {:.1}s",
            next_attempt - 1,
            delay.as_secs_f64()
        )),
        ReviewPhase::Idle | ReviewPhase::Succeeded | ReviewPhase::Failed => None,
    }
}

async fn run_review(args: ReviewArgs) -> Result<bool> {
    let code = read_code(args.file.as_deref())?;

    let timeout = args.timeout_secs.map(Duration::from_secs);
    let transport = HttpTransport::with_timeout(&args.server_url, timeout)?;
    debug!("Submitting review to {}", transport.endpoint());

    let policy = args.policy();
    let session = Arc::new(ReviewSession::new(ReviewClient::new(transport, policy)));

    let mut phases = session.subscribe();
    let progress = tokio::spawn(async move {
        while phases.changed().await.is_ok() {
            let phase = phases.borrow_and_update().clone();
            if let Some(line) = describe_phase(&phase, policy.max_attempts) {
                eprintln!("{}", line);
            }
        }
    });

    let interrupt = {
        let session = session.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Cancelling...");
                session.cancel().await;
            }
        })
    };

    let result = session.submit(&code).await;
    interrupt.abort();
    progress.abort();

    let result = result.ok_or_else(|| anyhow!("Review was superseded before completing"))?;
    match &result {
        ReviewResult::Success { .. } => println!("{}", result.to_markdown()),
        ReviewResult::Failure { .. } => eprintln!("{}", result.to_markdown()),
    }

    Ok(result.is_success())
}

async fn run_health(args: HealthArgs) -> Result<bool> {
    let url = format!("{}/health", args.server_url.trim_end_matches('/'));
    let response = reqwest::Client::new()
        .get(&url)
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .with_context(|| format!("Failed to reach {}", url))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .context("Failed to read health response")?;

    match serde_json::from_str::<serde_json::Value>(&body) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", body),
    }

    Ok(status.is_success())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();

    let succeeded = match cli.command {
        Commands::Review(args) => run_review(args).await?,
        Commands::Health(args) => run_health(args).await?,
    };

    if !succeeded {
        std::process::exit(1);
    }

    Ok(())
}
