//! schedule-engine: runs one scheduling request from a JSON file.
//!
//! ```text
//! schedule-engine detect-conflicts request.json
//! schedule-engine optimize request.json --config engine.toml --pretty
//! cat freeze.json | schedule-engine impact-analysis
//! ```
//!
//! The result is printed to stdout; logs go to stderr.

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use therapy_schedule::api::{error_body, handle_json, Operation};
use therapy_schedule::{EngineConfig, Error};

#[derive(Parser, Debug)]
#[command(name = "schedule-engine")]
#[command(about = "Therapy schedule conflict detection and optimization")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Engine configuration (TOML)
    #[arg(short, long, global = true, env = "SCHEDULE_ENGINE_CONFIG")]
    config: Option<PathBuf>,

    /// Pretty-print the JSON result
    #[arg(long, global = true)]
    pretty: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check one candidate session against a snapshot
    DetectConflicts { input: Option<PathBuf> },
    /// Produce an optimized schedule proposal
    Optimize { input: Option<PathBuf> },
    /// Compute the impact of a subscription freeze
    ImpactAnalysis { input: Option<PathBuf> },
}

impl Command {
    fn split(self) -> (Operation, Option<PathBuf>) {
        match self {
            Command::DetectConflicts { input } => (Operation::DetectConflicts, input),
            Command::Optimize { input } => (Operation::Optimize, input),
            Command::ImpactAnalysis { input } => (Operation::ImpactAnalysis, input),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let pretty = args.pretty;
    let output = match run(args).await {
        Ok(value) => value,
        Err(err) => {
            error!(error = %err, "request failed");
            error_body(&err)
        }
    };
    let failed = output.get("success").and_then(|v| v.as_bool()) == Some(false);

    let text = if pretty {
        serde_json::to_string_pretty(&output)
    } else {
        serde_json::to_string(&output)
    };
    match text {
        Ok(text) => println!("{text}"),
        Err(err) => {
            error!(error = %err, "could not serialize result");
            return ExitCode::FAILURE;
        }
    }
    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

async fn run(args: Args) -> Result<serde_json::Value, Error> {
    let config = match &args.config {
        Some(path) => {
            info!(path = %path.display(), "loading configuration");
            let content = tokio::fs::read_to_string(path).await?;
            EngineConfig::from_toml_str(&content)?
        }
        None => EngineConfig::default(),
    };

    let (operation, input) = args.command.split();
    let body = match input {
        Some(path) => tokio::fs::read_to_string(path).await?,
        None => {
            let mut body = String::new();
            std::io::stdin().read_to_string(&mut body)?;
            body
        }
    };

    let started = std::time::Instant::now();
    let value = tokio::task::spawn_blocking(move || handle_json(operation, &body, &config))
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))??;
    info!(?operation, elapsed_ms = started.elapsed().as_millis() as u64, "request done");
    Ok(value)
}
