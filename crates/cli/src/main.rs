//! Gas leak detector CLI
//!
//! Trains and inspects model generations locally, and talks to a running
//! detector to score windows and check its health.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{inspect, predict, status, train, windows};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Gas leak detector CLI
#[derive(Parser)]
#[command(name = "leakctl")]
#[command(author, version, about = "CLI for the gas leak detector", long_about = None)]
pub struct Cli {
    /// Detector URL (can also be set via LEAKCTL_API_URL env var)
    #[arg(long, env = "LEAKCTL_API_URL", default_value = "http://localhost:8000")]
    pub api_url: String,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Train a model generation from labelled sensor readings
    Train {
        /// CSV with timestamp, feature, label, scenario and deviceId columns
        #[arg(long, short)]
        data: PathBuf,

        /// Generation directory to write
        #[arg(long, short, default_value = "models")]
        output: PathBuf,

        /// Pretrained ONNX network to calibrate instead of fitting the logistic model
        #[arg(long)]
        onnx_model: Option<PathBuf>,

        /// Training config file (TOML, YAML or JSON)
        #[arg(long, short)]
        config: Option<PathBuf>,

        #[command(flatten)]
        overrides: config::TrainingOverrides,
    },

    /// Preview windows and splits under both label policies without training
    Windows {
        /// CSV with labelled readings
        #[arg(long, short)]
        data: PathBuf,

        /// Training config file
        #[arg(long, short)]
        config: Option<PathBuf>,

        #[command(flatten)]
        overrides: config::TrainingOverrides,
    },

    /// Show a persisted generation
    Inspect {
        /// Generation directory
        dir: PathBuf,

        /// Verify checksums and load the classifier
        #[arg(long)]
        verify: bool,
    },

    /// Score one window on a running detector
    Predict {
        /// JSON file holding the window matrix
        #[arg(long, short)]
        window: PathBuf,
    },

    /// Show detector health and readiness
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli).await {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Train {
            data,
            output,
            onnx_model,
            config: config_file,
            overrides,
        } => {
            let training = config::resolve(config_file.as_deref(), &overrides)?;
            train::train(data, output, onnx_model, training, cli.format).await
        }
        Commands::Windows {
            data,
            config: config_file,
            overrides,
        } => {
            let training = config::resolve(config_file.as_deref(), &overrides)?;
            windows::preview(data, training, cli.format).await
        }
        Commands::Inspect { dir, verify } => inspect::inspect(dir, verify, cli.format).await,
        Commands::Predict { window } => {
            let client = client::ApiClient::new(&cli.api_url)?;
            predict::predict(&client, &window, cli.format).await
        }
        Commands::Status => {
            let client = client::ApiClient::new(&cli.api_url)?;
            status::status(&client, cli.format).await
        }
    }
}
