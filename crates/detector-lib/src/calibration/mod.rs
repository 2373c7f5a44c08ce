//! Threshold calibration and evaluation metrics

mod metrics;
mod threshold;

pub use metrics::{ClassMetrics, ClassificationReport, ConfusionMatrix};
pub use threshold::{
    candidate_thresholds, quantile, safety_threshold, search_decision_threshold,
    ThresholdCalibrator, ThresholdConfig, ThresholdSearch, DEFAULT_DECISION_THRESHOLD,
    DEFAULT_SAFE_QUANTILE,
};
