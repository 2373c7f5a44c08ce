//! Weighted logistic regression over flattened windows
//!
//! Full-batch gradient descent with L2 regularization. When a validation set
//! is supplied, training stops after `patience` epochs without validation
//! loss improvement and the best weights are restored.

use super::{
    sigmoid, ClassWeights, ClassifierKind, FitReport, SequenceClassifier, TrainableClassifier,
};
use crate::error::{DetectorError, Result, WindowShape};
use crate::models::FeatureMatrix;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Clamp for log-loss to avoid ln(0)
const PROB_EPSILON: f64 = 1e-7;

/// Hyper-parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogisticConfig {
    pub epochs: usize,
    pub learning_rate: f64,
    pub l2: f64,
    /// Epochs without validation improvement before stopping
    pub patience: usize,
}

impl Default for LogisticConfig {
    fn default() -> Self {
        Self {
            epochs: 80,
            learning_rate: 0.1,
            l2: 1e-4,
            patience: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticClassifier {
    config: LogisticConfig,
    shape: WindowShape,
    weights: Vec<f64>,
    bias: f64,
    fitted: bool,
}

impl LogisticClassifier {
    /// Unfitted model for windows of `shape`; weights start at zero
    pub fn new(shape: WindowShape, config: LogisticConfig) -> Self {
        Self {
            config,
            shape,
            weights: vec![0.0; shape.len()],
            bias: 0.0,
            fitted: false,
        }
    }

    /// Load a model written by [`TrainableClassifier::save`]
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(|e| DetectorError::artifact("model", path, e))?;
        Self::from_bytes(&bytes, path)
    }

    /// Parse a saved model from memory; `path` names it in errors
    pub fn from_bytes(bytes: &[u8], path: &Path) -> Result<Self> {
        let model: Self = serde_json::from_slice(bytes)
            .map_err(|e| DetectorError::artifact("model", path, e))?;
        if !model.fitted {
            return Err(DetectorError::artifact("model", path, "model was never fitted"));
        }
        if model.weights.len() != model.shape.len() {
            return Err(DetectorError::artifact(
                "model",
                path,
                format!(
                    "{} weights for window shape {}",
                    model.weights.len(),
                    model.shape
                ),
            ));
        }
        Ok(model)
    }

    pub fn config(&self) -> &LogisticConfig {
        &self.config
    }

    fn check_shape(&self, m: &FeatureMatrix) -> Result<()> {
        if m.shape() != self.shape {
            return Err(DetectorError::ShapeMismatch {
                expected: self.shape,
                actual: m.shape(),
            });
        }
        Ok(())
    }

    fn logit(&self, m: &FeatureMatrix) -> f64 {
        self.weights
            .iter()
            .zip(m.as_slice())
            .map(|(w, x)| w * x)
            .sum::<f64>()
            + self.bias
    }

    /// Mean (optionally weighted) log-loss
    fn loss(&self, x: &[FeatureMatrix], y: &[u8], weights: Option<&ClassWeights>) -> f64 {
        if x.is_empty() {
            return 0.0;
        }
        let total: f64 = x
            .iter()
            .zip(y)
            .map(|(m, &label)| {
                let p = sigmoid(self.logit(m)).clamp(PROB_EPSILON, 1.0 - PROB_EPSILON);
                let w = weights.map_or(1.0, |cw| cw.for_label(label));
                let target = f64::from(label);
                -w * (target * p.ln() + (1.0 - target) * (1.0 - p).ln())
            })
            .sum();
        total / x.len() as f64
    }

    fn step(&mut self, x: &[FeatureMatrix], y: &[u8], class_weights: &ClassWeights) {
        let n = x.len() as f64;
        let mut grad_w = vec![0.0; self.weights.len()];
        let mut grad_b = 0.0;
        for (m, &label) in x.iter().zip(y) {
            let err = class_weights.for_label(label) * (sigmoid(self.logit(m)) - f64::from(label));
            for (g, v) in grad_w.iter_mut().zip(m.as_slice()) {
                *g += err * v;
            }
            grad_b += err;
        }
        let lr = self.config.learning_rate;
        for (w, g) in self.weights.iter_mut().zip(&grad_w) {
            *w -= lr * (g / n + self.config.l2 * *w);
        }
        self.bias -= lr * grad_b / n;
    }

    fn validate_inputs(&self, x: &[FeatureMatrix], y: &[u8]) -> Result<()> {
        if x.len() != y.len() {
            return Err(DetectorError::Classifier(format!(
                "{} windows but {} labels",
                x.len(),
                y.len()
            )));
        }
        if x.is_empty() {
            return Err(DetectorError::InsufficientData(
                "cannot fit classifier on zero windows".to_string(),
            ));
        }
        x.iter().try_for_each(|m| self.check_shape(m))
    }

    fn train(
        &mut self,
        x: &[FeatureMatrix],
        y: &[u8],
        class_weights: &ClassWeights,
        validation: Option<(&[FeatureMatrix], &[u8])>,
    ) -> Result<FitReport> {
        self.validate_inputs(x, y)?;
        let validation = match validation {
            Some((vx, vy)) if !vx.is_empty() => {
                self.validate_inputs(vx, vy)?;
                Some((vx, vy))
            }
            _ => None,
        };

        let mut best: Option<(f64, Vec<f64>, f64)> = None;
        let mut stale = 0;
        let mut epochs_run = 0;

        for epoch in 0..self.config.epochs {
            self.step(x, y, class_weights);
            epochs_run = epoch + 1;

            if let Some((vx, vy)) = validation {
                let val_loss = self.loss(vx, vy, None);
                let improved = best
                    .as_ref()
                    .map_or(true, |(best_loss, _, _)| val_loss < *best_loss);
                if improved {
                    best = Some((val_loss, self.weights.clone(), self.bias));
                    stale = 0;
                } else {
                    stale += 1;
                    if stale >= self.config.patience {
                        debug!(epoch, val_loss, "Early stopping");
                        break;
                    }
                }
            }
        }

        let best_validation_loss = best.map(|(loss, weights, bias)| {
            self.weights = weights;
            self.bias = bias;
            loss
        });
        self.fitted = true;

        let report = FitReport {
            epochs_run,
            train_loss: self.loss(x, y, Some(class_weights)),
            best_validation_loss,
        };
        info!(
            epochs_run = report.epochs_run,
            train_loss = report.train_loss,
            best_validation_loss = ?report.best_validation_loss,
            "Logistic classifier fitted"
        );
        Ok(report)
    }
}

impl SequenceClassifier for LogisticClassifier {
    fn predict_proba(&self, batch: &[FeatureMatrix]) -> Result<Vec<f64>> {
        if !self.fitted {
            return Err(DetectorError::Classifier(
                "predict called before fit".to_string(),
            ));
        }
        batch
            .iter()
            .map(|m| {
                self.check_shape(m)?;
                Ok(sigmoid(self.logit(m)))
            })
            .collect()
    }

    fn input_shape(&self) -> WindowShape {
        self.shape
    }

    fn kind(&self) -> ClassifierKind {
        ClassifierKind::Logistic
    }
}

impl TrainableClassifier for LogisticClassifier {
    fn fit(
        &mut self,
        x: &[FeatureMatrix],
        y: &[u8],
        class_weights: &ClassWeights,
    ) -> Result<FitReport> {
        self.train(x, y, class_weights, None)
    }

    fn fit_with_validation(
        &mut self,
        x: &[FeatureMatrix],
        y: &[u8],
        class_weights: &ClassWeights,
        validation: (&[FeatureMatrix], &[u8]),
    ) -> Result<FitReport> {
        self.train(x, y, class_weights, Some(validation))
    }

    fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn shape() -> WindowShape {
        WindowShape::new(3, 1)
    }

    /// Leak windows have large values, normal windows small ones
    fn dataset() -> (Vec<FeatureMatrix>, Vec<u8>) {
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..40 {
            let leak = i % 4 == 0;
            let base = if leak { 1.5 } else { -0.5 };
            let jitter = (i as f64 * 0.37).sin() * 0.2;
            x.push(FeatureMatrix::new(shape(), vec![base + jitter; 3]).unwrap());
            y.push(u8::from(leak));
        }
        (x, y)
    }

    #[test]
    fn test_fit_separates_classes() {
        let (x, y) = dataset();
        let mut model = LogisticClassifier::new(shape(), LogisticConfig::default());
        let report = model.fit(&x, &y, &ClassWeights::balanced(&y)).unwrap();
        assert_eq!(report.epochs_run, 80);

        let probs = model.predict_proba(&x).unwrap();
        for (p, &label) in probs.iter().zip(&y) {
            if label == 1 {
                assert!(*p > 0.5, "leak prob {p}");
            } else {
                assert!(*p < 0.5, "normal prob {p}");
            }
        }
    }

    #[test]
    fn test_predict_before_fit_fails() {
        let model = LogisticClassifier::new(shape(), LogisticConfig::default());
        let (x, _) = dataset();
        assert!(matches!(
            model.predict_proba(&x),
            Err(DetectorError::Classifier(_))
        ));
    }

    #[test]
    fn test_early_stopping_restores_best() {
        let (x, y) = dataset();
        let config = LogisticConfig {
            epochs: 500,
            patience: 3,
            ..LogisticConfig::default()
        };
        let mut model = LogisticClassifier::new(shape(), config);
        let report = model
            .fit_with_validation(&x, &y, &ClassWeights::balanced(&y), (&x[..10], &y[..10]))
            .unwrap();
        let best = report.best_validation_loss.unwrap();
        assert!(report.epochs_run <= 500);
        assert!((model.loss(&x[..10], &y[..10], None) - best).abs() < 1e-12);
    }

    #[test]
    fn test_mismatched_lengths_rejected() {
        let (x, _) = dataset();
        let mut model = LogisticClassifier::new(shape(), LogisticConfig::default());
        assert!(model.fit(&x, &[0, 1], &ClassWeights::default()).is_err());
    }

    #[test]
    fn test_save_and_load() {
        let (x, y) = dataset();
        let mut model = LogisticClassifier::new(shape(), LogisticConfig::default());
        model.fit(&x, &y, &ClassWeights::default()).unwrap();

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.json");
        model.save(&path).unwrap();
        let loaded = LogisticClassifier::load(&path).unwrap();
        assert_eq!(loaded, model);
        assert_eq!(loaded.predict_proba(&x).unwrap(), model.predict_proba(&x).unwrap());
    }

    #[test]
    fn test_load_rejects_unfitted_model() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.json");
        LogisticClassifier::new(shape(), LogisticConfig::default())
            .save(&path)
            .unwrap();
        assert!(matches!(
            LogisticClassifier::load(&path),
            Err(DetectorError::ArtifactLoad { .. })
        ));
    }
}
