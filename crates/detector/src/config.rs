//! Detector server configuration

use anyhow::{Context, Result};
use detector_lib::LabelPolicy;
use serde::Deserialize;
use std::path::PathBuf;

/// Environment variable naming an optional config file
pub const CONFIG_PATH_ENV: &str = "DETECTOR_CONFIG";

const DEFAULT_CONFIG_FILE: &str = "detector.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    /// Name attached to every structured log event
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    /// Port for the prediction, health and metrics API
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Model generation directory to serve
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,

    /// Upper bound on windows being classified at the same time
    #[serde(default = "default_max_concurrent_inferences")]
    pub max_concurrent_inferences: usize,

    /// Refuse generations trained with a different label policy
    #[serde(default)]
    pub expected_label_policy: Option<LabelPolicy>,
}

fn default_instance_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "leak-detector".to_string())
}

fn default_api_port() -> u16 {
    8000
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from("models")
}

fn default_max_concurrent_inferences() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            instance_name: default_instance_name(),
            api_port: default_api_port(),
            artifact_dir: default_artifact_dir(),
            max_concurrent_inferences: default_max_concurrent_inferences(),
            expected_label_policy: None,
        }
    }
}

impl DetectorConfig {
    /// Load from the optional config file, overridden by `DETECTOR_*` variables
    pub fn load() -> Result<Self> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_from(&path)
    }

    pub fn load_from(path: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("DETECTOR"))
            .build()
            .context("Failed to read detector configuration")?;

        let config: Self = config
            .try_deserialize()
            .context("Invalid detector configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_inferences == 0 {
            anyhow::bail!("max_concurrent_inferences must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = DetectorConfig::default();
        assert_eq!(config.api_port, 8000);
        assert_eq!(config.artifact_dir, PathBuf::from("models"));
        assert!(config.max_concurrent_inferences >= 1);
        assert!(config.expected_label_policy.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "api_port = 9100\nartifact_dir = \"/srv/gas/current\"\nmax_concurrent_inferences = 2\nexpected_label_policy = \"any\""
        )
        .unwrap();

        let config = DetectorConfig::load_from(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.api_port, 9100);
        assert_eq!(config.artifact_dir, PathBuf::from("/srv/gas/current"));
        assert_eq!(config.max_concurrent_inferences, 2);
        assert_eq!(config.expected_label_policy, Some(LabelPolicy::Any));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "max_concurrent_inferences = 0").unwrap();
        assert!(DetectorConfig::load_from(file.path().to_str().unwrap()).is_err());
    }
}
