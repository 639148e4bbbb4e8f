//! livetrend - Command-line live trend viewer
//!
//! Follows one vehicle metric from a live telemetry feed and prints samples
//! as they arrive.

mod commands;
mod config;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use telemetry_stream::SubscriptionController;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{CliOverrides, Config};
use crate::output::{OutputContext, OutputFormat};

#[derive(Parser)]
#[command(name = "livetrend")]
#[command(author, version, about = "Live vehicle telemetry trend viewer")]
#[command(propagate_version = true)]
struct Cli {
    /// Live feed endpoint (ws:// or wss://)
    #[arg(short, long, env = "LIVETREND_ENDPOINT")]
    endpoint: Option<String>,

    /// Configuration file path
    #[arg(short, long, env = "LIVETREND_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum)]
    output: Option<OutputFormat>,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Minimal output (for scripting)
    #[arg(short, long)]
    quiet: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow a vehicle metric in real time
    Watch {
        /// Vehicle ID (e.g. B183)
        #[arg(long)]
        vehicle: Option<String>,

        /// Metric name (speed, temp, power, traction, brake)
        #[arg(long)]
        metric: Option<String>,

        /// Number of samples kept in the window
        #[arg(long)]
        window: Option<usize>,
    },

    /// List known metrics
    Metrics,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    // Load config file
    let config = if let Some(config_path) = &cli.config {
        Config::load_from(config_path)?
    } else {
        Config::load().unwrap_or_default()
    };

    let (vehicle, metric, window) = match &cli.command {
        Commands::Watch {
            vehicle,
            metric,
            window,
        } => (vehicle.as_deref(), metric.as_deref(), *window),
        Commands::Metrics => (None, None, None),
    };

    // Merge CLI args with config
    let merged = config.merge_with_args(&CliOverrides {
        endpoint: cli.endpoint.as_deref(),
        vehicle,
        metric,
        history_capacity: window,
        output: cli.output,
        no_color: cli.no_color,
    });

    tracing::debug!(
        endpoint = %merged.stream.endpoint,
        target = %merged.target,
        output = merged.output.as_str(),
        "Configuration loaded"
    );

    // Create output context
    let ctx = OutputContext::new(merged.output, merged.no_color, cli.quiet);

    // Execute command
    match &cli.command {
        Commands::Watch { .. } => {
            let controller = SubscriptionController::from_config(&merged.stream)
                .context("Failed to create live trend controller")?;
            commands::watch(&controller, merged.target.clone(), &ctx).await?;
        }

        Commands::Metrics => {
            commands::metrics(&ctx)?;
        }
    }

    Ok(())
}
