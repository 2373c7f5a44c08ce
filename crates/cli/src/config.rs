//! Training configuration for the CLI
//!
//! Sources, lowest to highest precedence: built-in defaults, an optional
//! config file, `LEAKCTL_*` environment variables, then command-line flags.

use anyhow::{Context, Result};
use clap::Args;
use config::{Config, Environment, File};
use detector_lib::training::TrainingConfig;
use detector_lib::LabelPolicy;
use std::path::Path;
use tracing::debug;

/// Load a [`TrainingConfig`] from an optional file plus the environment
///
/// Nested keys use a double underscore, e.g. `LEAKCTL_CLASSIFIER__EPOCHS=40`.
pub fn load_training_config(path: Option<&Path>) -> Result<TrainingConfig> {
    let mut builder = Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(File::from(path).required(true));
    }
    let config: TrainingConfig = builder
        .add_source(
            Environment::with_prefix("LEAKCTL")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("Failed to read training configuration")?
        .try_deserialize()
        .context("Invalid training configuration")?;

    Ok(config)
}

fn parse_policy(raw: &str) -> std::result::Result<LabelPolicy, String> {
    raw.parse::<LabelPolicy>().map_err(|e| e.to_string())
}

/// Flags that override individual training settings
#[derive(Debug, Clone, Default, Args)]
pub struct TrainingOverrides {
    /// Window length in readings
    #[arg(long)]
    pub seq_len: Option<usize>,

    /// Window labelling policy (last, any)
    #[arg(long, value_parser = parse_policy)]
    pub label_policy: Option<LabelPolicy>,

    /// Only use readings from this device
    #[arg(long)]
    pub device_id: Option<String>,

    /// Seed for the stratified split
    #[arg(long)]
    pub seed: Option<u64>,

    /// Quantile of normal gas readings used as the safety threshold
    #[arg(long)]
    pub safe_quantile: Option<f64>,

    /// Maximum training epochs
    #[arg(long)]
    pub epochs: Option<usize>,
}

impl TrainingOverrides {
    pub fn apply(&self, config: &mut TrainingConfig) {
        if let Some(seq_len) = self.seq_len {
            config.seq_len = seq_len;
        }
        if let Some(policy) = self.label_policy {
            config.label_policy = policy;
        }
        if let Some(device) = &self.device_id {
            config.device_id = Some(device.clone());
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(q) = self.safe_quantile {
            config.safe_quantile = q;
        }
        if let Some(epochs) = self.epochs {
            config.classifier.epochs = epochs;
        }
    }
}

/// Resolve the effective configuration for a command
pub fn resolve(path: Option<&Path>, overrides: &TrainingOverrides) -> Result<TrainingConfig> {
    let mut config = load_training_config(path)?;
    overrides.apply(&mut config);
    config.validate().context("Invalid training configuration")?;
    debug!(?config, "Resolved training configuration");
    Ok(config)
}
