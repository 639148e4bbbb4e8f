//! Configuration file handling for livetrend

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use telemetry_stream::{StreamConfig, SubscriptionTarget, HISTORY_CAPACITY};

use crate::output::OutputFormat;

const DEFAULT_VEHICLE: &str = "B183";
const DEFAULT_METRIC: &str = "speed";

/// Configuration for the CLI tool
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// Live feed endpoint
    pub endpoint: Option<String>,
    /// Vehicle to watch when none is given
    pub vehicle: Option<String>,
    /// Metric to watch when none is given
    pub metric: Option<String>,
    /// Number of samples kept in the window
    pub history_capacity: Option<usize>,
    /// Default output format
    pub output: Option<String>,
    /// Disable colored output
    pub no_color: Option<bool>,
}

/// Values given on the command line, overriding the file
#[derive(Debug, Default)]
pub struct CliOverrides<'a> {
    pub endpoint: Option<&'a str>,
    pub vehicle: Option<&'a str>,
    pub metric: Option<&'a str>,
    pub history_capacity: Option<usize>,
    pub output: Option<OutputFormat>,
    pub no_color: bool,
}

impl Config {
    /// Load configuration from the default config file
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Get the default config file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("livetrend");

        Ok(config_dir.join("config.toml"))
    }

    /// Merge CLI arguments over config file values
    pub fn merge_with_args(&self, args: &CliOverrides<'_>) -> MergedConfig {
        let defaults = StreamConfig::default();

        MergedConfig {
            stream: StreamConfig {
                endpoint: args
                    .endpoint
                    .map(String::from)
                    .or_else(|| self.endpoint.clone())
                    .unwrap_or(defaults.endpoint),
                history_capacity: args
                    .history_capacity
                    .or(self.history_capacity)
                    .unwrap_or(HISTORY_CAPACITY),
            },
            target: SubscriptionTarget::new(
                args.vehicle
                    .map(String::from)
                    .or_else(|| self.vehicle.clone())
                    .unwrap_or_else(|| DEFAULT_VEHICLE.to_string()),
                args.metric
                    .map(String::from)
                    .or_else(|| self.metric.clone())
                    .unwrap_or_else(|| DEFAULT_METRIC.to_string()),
            ),
            output: args
                .output
                .or_else(|| self.output.as_deref().and_then(OutputFormat::parse))
                .unwrap_or_default(),
            no_color: args.no_color || self.no_color.unwrap_or(false),
        }
    }
}

/// Fully resolved configuration after merging CLI args
#[derive(Debug, Clone)]
pub struct MergedConfig {
    pub stream: StreamConfig,
    pub target: SubscriptionTarget,
    pub output: OutputFormat,
    pub no_color: bool,
}
