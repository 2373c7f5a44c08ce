//! Decision and safety threshold calibration
//!
//! Two independent numbers come out of a training run: the probability
//! cut-off that maximizes leak-class F1 on the validation partition, and a
//! raw-unit safety level taken as a quantile of readings labelled normal.

use super::metrics::ConfusionMatrix;
use crate::error::{DetectorError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Default quantile of normal readings used as the safety level
pub const DEFAULT_SAFE_QUANTILE: f64 = 0.95;

/// Decision threshold used when no calibrated thresholds exist
pub const DEFAULT_DECISION_THRESHOLD: f64 = 0.5;

/// Candidate probability thresholds: 0.10, 0.11, ..., 0.90
pub fn candidate_thresholds() -> impl Iterator<Item = f64> {
    (10..=90).map(|c| c as f64 / 100.0)
}

/// Best threshold found by [`search_decision_threshold`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSearch {
    pub threshold: f64,
    pub f1: f64,
}

/// Scan the candidate grid and keep the first threshold with maximal F1
///
/// Only a strictly greater F1 replaces the current best, so ties resolve
/// to the lowest threshold.
pub fn search_decision_threshold(probabilities: &[f64], labels: &[u8]) -> Result<ThresholdSearch> {
    if probabilities.len() != labels.len() {
        return Err(DetectorError::InvalidConfig(format!(
            "{} probabilities but {} labels",
            probabilities.len(),
            labels.len()
        )));
    }
    if probabilities.is_empty() {
        return Err(DetectorError::InsufficientData(
            "cannot calibrate a decision threshold on an empty validation set".to_string(),
        ));
    }
    if !labels.contains(&1) {
        warn!("Validation set has no leak windows; every threshold scores F1 = 0");
    }

    let mut best = ThresholdSearch {
        threshold: DEFAULT_DECISION_THRESHOLD,
        f1: -1.0,
    };
    for threshold in candidate_thresholds() {
        let f1 = ConfusionMatrix::at_threshold(probabilities, labels, threshold).f1();
        if f1 > best.f1 {
            best = ThresholdSearch { threshold, f1 };
        }
    }
    debug!(threshold = best.threshold, f1 = best.f1, "Decision threshold search done");
    Ok(best)
}

/// Quantile with linear interpolation between order statistics
///
/// `q` must lie in [0, 1]; returns `None` for an empty input.
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * frac)
}

/// Safety level over normal-labelled primary values
///
/// An empty set means no safety threshold can be derived; serving then
/// reports the safety signal as absent.
pub fn safety_threshold(normal_values: &[f64], q: f64) -> Result<Option<f64>> {
    validate_quantile(q)?;
    let value = quantile(normal_values, q);
    if value.is_none() {
        warn!("No normal readings available; safety threshold left unset");
    }
    Ok(value)
}

fn validate_quantile(q: f64) -> Result<()> {
    if q > 0.0 && q < 1.0 {
        Ok(())
    } else {
        Err(DetectorError::InvalidConfig(format!(
            "safe quantile must be in (0, 1), got {}",
            q
        )))
    }
}

/// Persisted thresholds of one model generation
///
/// Fields are private so a loaded or calibrated config is never modified.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    decision_threshold: f64,
    #[serde(alias = "safe_gas_threshold_ppm")]
    safe_value_threshold_ppm: Option<f64>,
    #[serde(alias = "safe_gas_quantile", default = "default_safe_quantile")]
    safe_quantile: f64,
}

fn default_safe_quantile() -> f64 {
    DEFAULT_SAFE_QUANTILE
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            decision_threshold: DEFAULT_DECISION_THRESHOLD,
            safe_value_threshold_ppm: None,
            safe_quantile: DEFAULT_SAFE_QUANTILE,
        }
    }
}

impl ThresholdConfig {
    pub fn new(
        decision_threshold: f64,
        safe_value_threshold: Option<f64>,
        safe_quantile: f64,
    ) -> Result<Self> {
        let config = Self {
            decision_threshold,
            safe_value_threshold_ppm: safe_value_threshold,
            safe_quantile,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check ranges after deserialization
    pub fn validate(&self) -> Result<()> {
        if !(self.decision_threshold > 0.0 && self.decision_threshold < 1.0) {
            return Err(DetectorError::InvalidConfig(format!(
                "decision threshold must be in (0, 1), got {}",
                self.decision_threshold
            )));
        }
        if let Some(v) = self.safe_value_threshold_ppm {
            if !v.is_finite() {
                return Err(DetectorError::InvalidConfig(format!(
                    "safety threshold must be finite, got {}",
                    v
                )));
            }
        }
        validate_quantile(self.safe_quantile)
    }

    pub fn decision_threshold(&self) -> f64 {
        self.decision_threshold
    }

    pub fn safe_value_threshold(&self) -> Option<f64> {
        self.safe_value_threshold_ppm
    }

    pub fn safe_quantile(&self) -> f64 {
        self.safe_quantile
    }
}

/// Produces a [`ThresholdConfig`] from validation probabilities and raw
/// normal readings
#[derive(Debug, Clone, Copy)]
pub struct ThresholdCalibrator {
    safe_quantile: f64,
}

impl Default for ThresholdCalibrator {
    fn default() -> Self {
        Self {
            safe_quantile: DEFAULT_SAFE_QUANTILE,
        }
    }
}

impl ThresholdCalibrator {
    pub fn new(safe_quantile: f64) -> Result<Self> {
        validate_quantile(safe_quantile)?;
        Ok(Self { safe_quantile })
    }

    pub fn calibrate(
        &self,
        validation_probabilities: &[f64],
        validation_labels: &[u8],
        normal_primary_values: &[f64],
    ) -> Result<(ThresholdConfig, ThresholdSearch)> {
        let search = search_decision_threshold(validation_probabilities, validation_labels)?;
        let safe = safety_threshold(normal_primary_values, self.safe_quantile)?;
        let config = ThresholdConfig::new(search.threshold, safe, self.safe_quantile)?;
        info!(
            decision_threshold = search.threshold,
            validation_f1 = search.f1,
            safe_value_threshold = ?safe,
            safe_quantile = self.safe_quantile,
            "Calibrated thresholds"
        );
        Ok((config, search))
    }
}
