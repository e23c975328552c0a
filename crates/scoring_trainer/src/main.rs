//! Credit scoring CLI
//!
//! Offline training, single-record scoring and drift reporting.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use credit_scoring_core::ScoringConfig;
use credit_scoring_trainer::{predict_record, run_drift, run_training};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "credit-scoring")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Credit default scoring: train, score and monitor", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the raw data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Override the artifact directory
    #[arg(long, global = true)]
    models_dir: Option<PathBuf>,

    /// Override the report directory
    #[arg(long, global = true)]
    reports_dir: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train, calibrate and persist the model, then score the test table
    Train,

    /// Score one applicant record with the persisted artifacts
    Predict {
        /// Applicant record as a JSON object
        #[arg(short, long)]
        record: String,
    },

    /// Compare application_train against application_test
    Drift,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    info!("credit-scoring v{}", env!("CARGO_PKG_VERSION"));

    let mut config =
        ScoringConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(dir) = cli.data_dir {
        config.paths.data_dir = dir;
    }
    if let Some(dir) = cli.models_dir {
        config.paths.models_dir = dir;
    }
    if let Some(dir) = cli.reports_dir {
        config.paths.reports_dir = dir;
    }

    match cli.command {
        Commands::Train => {
            let report = run_training(&config).context("Training failed")?;
            info!(
                threshold = report.threshold,
                business_score = report.threshold_score,
                baseline_score = report.baseline.business_score,
                model_hash = %report.model_hash,
                predictions = %report.predictions_path.display(),
                "training completed"
            );
        }
        Commands::Predict { record } => {
            let response = predict_record(&config, &record).context("Scoring failed")?;
            println!(
                "{}",
                serde_json::to_string_pretty(&response).context("Failed to encode response")?
            );
        }
        Commands::Drift => {
            let report = run_drift(&config).context("Drift report failed")?;
            let drifted: Vec<&str> = report.drifted_columns().collect();
            info!(
                dataset_drift = report.dataset_drift,
                drifted = ?drifted,
                "drift report completed"
            );
        }
    }

    Ok(())
}

/// `RUST_LOG` wins; otherwise `info`, or `debug` with `--verbose`.
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
