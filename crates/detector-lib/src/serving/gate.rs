//! Per-request inference over one window
//!
//! The gate owns an immutable model generation and turns a raw window into
//! two independent signals: the classifier's leak probability against the
//! calibrated decision threshold, and the raw primary-feature mean against
//! the safety threshold. It never combines them.

use super::artifacts::{LoadedArtifacts, ThresholdsSource};
use crate::calibration::ThresholdConfig;
use crate::classifier::SequenceClassifier;
use crate::error::{DetectorError, Result, WindowShape};
use crate::models::FeatureMatrix;
use crate::preprocess::FeatureScaler;
use serde::{Deserialize, Serialize};

/// Body of `POST /predict-window`: rows are time steps, columns features
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowRequest {
    pub window: Vec<Vec<f64>>,
}

/// Result of evaluating one window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeakAssessment {
    pub prob_leak: f64,
    pub decision_threshold: f64,
    /// 1 when `prob_leak >= decision_threshold`
    pub label: u8,
    /// Mean of the unscaled primary feature
    #[serde(rename = "gas_mean")]
    pub raw_mean: f64,
    #[serde(rename = "gas_max")]
    pub raw_max: f64,
    #[serde(rename = "safe_gas_threshold_ppm")]
    pub safe_value_threshold: Option<f64>,
    /// `None` when no safety threshold is configured
    #[serde(rename = "above_safe_threshold")]
    pub above_safe: Option<bool>,
}

/// Wire response: an assessment, or a shape error reported as data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GateResponse {
    Assessment(LeakAssessment),
    Rejected { error: String },
}

pub struct InferenceGate {
    shape: WindowShape,
    scaler: FeatureScaler,
    classifier: Box<dyn SequenceClassifier>,
    thresholds: ThresholdConfig,
    thresholds_source: ThresholdsSource,
    generation_id: String,
}

impl std::fmt::Debug for InferenceGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceGate")
            .field("shape", &self.shape)
            .field("classifier", &self.classifier.kind())
            .field("thresholds", &self.thresholds)
            .field("generation_id", &self.generation_id)
            .finish()
    }
}

impl InferenceGate {
    /// Assemble a gate, checking that every part agrees on the window shape
    pub fn new(
        shape: WindowShape,
        scaler: FeatureScaler,
        classifier: Box<dyn SequenceClassifier>,
        thresholds: ThresholdConfig,
        generation_id: impl Into<String>,
    ) -> Result<Self> {
        if shape.is_empty() {
            return Err(DetectorError::InvalidConfig(format!(
                "window shape {} is empty",
                shape
            )));
        }
        if scaler.num_features() != shape.cols {
            return Err(DetectorError::InvalidConfig(format!(
                "scaler has {} features, window shape is {}",
                scaler.num_features(),
                shape
            )));
        }
        if classifier.input_shape() != shape {
            return Err(DetectorError::InvalidConfig(format!(
                "classifier expects {}, window shape is {}",
                classifier.input_shape(),
                shape
            )));
        }
        Ok(Self {
            shape,
            scaler,
            classifier,
            thresholds,
            thresholds_source: ThresholdsSource::Loaded,
            generation_id: generation_id.into(),
        })
    }

    pub fn from_artifacts(artifacts: LoadedArtifacts) -> Result<Self> {
        let mut gate = Self::new(
            artifacts.manifest.window_shape(),
            artifacts.scaler,
            artifacts.classifier,
            artifacts.thresholds,
            artifacts.manifest.generation_id,
        )?;
        gate.thresholds_source = artifacts.thresholds_source;
        Ok(gate)
    }

    pub fn shape(&self) -> WindowShape {
        self.shape
    }

    pub fn thresholds(&self) -> &ThresholdConfig {
        &self.thresholds
    }

    pub fn thresholds_source(&self) -> ThresholdsSource {
        self.thresholds_source
    }

    pub fn generation_id(&self) -> &str {
        &self.generation_id
    }

    pub fn classifier(&self) -> &dyn SequenceClassifier {
        self.classifier.as_ref()
    }

    /// Evaluate one window of `seq_len` rows by `num_features` columns
    pub fn evaluate(&self, window: &[Vec<f64>]) -> Result<LeakAssessment> {
        let raw = FeatureMatrix::from_rows(window, self.shape)?;

        let n = self.shape.rows as f64;
        let (sum, max) = raw
            .column(0)
            .fold((0.0, f64::NEG_INFINITY), |(sum, max), v| (sum + v, max.max(v)));
        let raw_mean = sum / n;

        let scaled = self.scaler.transform(&raw)?;
        let prob_leak = self
            .classifier
            .predict_proba(std::slice::from_ref(&scaled))?
            .first()
            .copied()
            .ok_or_else(|| DetectorError::Classifier("classifier returned no output".to_string()))?;

        let decision_threshold = self.thresholds.decision_threshold();
        let safe_value_threshold = self.thresholds.safe_value_threshold();
        Ok(LeakAssessment {
            prob_leak,
            decision_threshold,
            label: u8::from(prob_leak >= decision_threshold),
            raw_mean,
            raw_max: max,
            safe_value_threshold,
            above_safe: safe_value_threshold.map(|t| raw_mean >= t),
        })
    }

    /// Like [`evaluate`](Self::evaluate), but a shape mismatch becomes a
    /// [`GateResponse::Rejected`] instead of an error
    pub fn respond(&self, window: &[Vec<f64>]) -> Result<GateResponse> {
        match self.evaluate(window) {
            Ok(assessment) => Ok(GateResponse::Assessment(assessment)),
            Err(e) if e.is_request_error() => Ok(GateResponse::Rejected {
                error: e.to_string(),
            }),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ClassifierKind;
    use crate::models::Window;

    /// Returns a fixed probability for every window
    struct FixedClassifier {
        shape: WindowShape,
        prob: f64,
    }

    impl SequenceClassifier for FixedClassifier {
        fn predict_proba(&self, batch: &[FeatureMatrix]) -> Result<Vec<f64>> {
            Ok(vec![self.prob; batch.len()])
        }

        fn input_shape(&self) -> WindowShape {
            self.shape
        }

        fn kind(&self) -> ClassifierKind {
            ClassifierKind::Logistic
        }
    }

    fn gate(prob: f64, thresholds: ThresholdConfig) -> InferenceGate {
        let shape = WindowShape::new(3, 2);
        let fit_window = Window::new(
            FeatureMatrix::new(shape, vec![100.0, 400.0, 200.0, 500.0, 300.0, 600.0]).unwrap(),
            0,
        );
        let names = vec!["gas".to_string(), "rawAdc".to_string()];
        let scaler = FeatureScaler::fit(&names, &[fit_window]).unwrap();
        InferenceGate::new(
            shape,
            scaler,
            Box::new(FixedClassifier { shape, prob }),
            thresholds,
            "test",
        )
        .unwrap()
    }

    fn window() -> Vec<Vec<f64>> {
        vec![vec![100.0, 400.0], vec![200.0, 410.0], vec![600.0, 420.0]]
    }

    #[test]
    fn test_evaluate_reports_both_signals() {
        let thresholds = ThresholdConfig::new(0.5, Some(250.0), 0.95).unwrap();
        let a = gate(0.9, thresholds).evaluate(&window()).unwrap();
        assert_eq!(a.prob_leak, 0.9);
        assert_eq!(a.label, 1);
        assert!((a.raw_mean - 300.0).abs() < 1e-12);
        assert_eq!(a.raw_max, 600.0);
        assert_eq!(a.safe_value_threshold, Some(250.0));
        assert_eq!(a.above_safe, Some(true));
    }

    #[test]
    fn test_signals_are_independent() {
        // Classifier says normal while the raw mean is above the safety level
        let thresholds = ThresholdConfig::new(0.5, Some(250.0), 0.95).unwrap();
        let a = gate(0.2, thresholds).evaluate(&window()).unwrap();
        assert_eq!(a.label, 0);
        assert_eq!(a.above_safe, Some(true));
    }

    #[test]
    fn test_label_at_threshold_is_leak() {
        let a = gate(0.5, ThresholdConfig::default()).evaluate(&window()).unwrap();
        assert_eq!(a.label, 1);
    }

    #[test]
    fn test_no_safety_threshold_serializes_null() {
        let a = gate(0.1, ThresholdConfig::default()).evaluate(&window()).unwrap();
        assert_eq!(a.above_safe, None);
        let json = serde_json::to_value(&a).unwrap();
        assert!(json["safe_gas_threshold_ppm"].is_null());
        assert!(json["above_safe_threshold"].is_null());
        assert_eq!(json["gas_mean"], 300.0);
        assert_eq!(json["decision_threshold"], 0.5);
    }

    #[test]
    fn test_wrong_shape_is_rejected_not_panicking() {
        let gate = gate(0.9, ThresholdConfig::default());
        let short = vec![vec![1.0, 2.0], vec![3.0, 4.0]];
        let ragged = vec![vec![1.0, 2.0], vec![3.0], vec![5.0, 6.0]];
        for bad in [short, ragged, Vec::new()] {
            match gate.respond(&bad).unwrap() {
                GateResponse::Rejected { error } => {
                    assert!(error.contains("(3, 2)"), "{error}")
                }
                other => panic!("expected rejection, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_rejection_wire_format() {
        let response = GateResponse::Rejected {
            error: "window shape must be (30, 2), got (29, 2)".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&response).unwrap(),
            r#"{"error":"window shape must be (30, 2), got (29, 2)"}"#
        );
    }

    #[test]
    fn test_mismatched_parts_rejected() {
        let shape = WindowShape::new(3, 2);
        let names = vec!["gas".to_string()];
        let w = Window::new(FeatureMatrix::new(WindowShape::new(1, 1), vec![1.0]).unwrap(), 0);
        let scaler = FeatureScaler::fit(&names, &[w]).unwrap();
        let result = InferenceGate::new(
            shape,
            scaler,
            Box::new(FixedClassifier { shape, prob: 0.5 }),
            ThresholdConfig::default(),
            "test",
        );
        assert!(matches!(result, Err(DetectorError::InvalidConfig(_))));
    }
}
