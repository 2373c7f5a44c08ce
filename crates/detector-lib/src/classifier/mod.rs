//! Sequence classifier capability
//!
//! The windowing, calibration and serving code only sees these traits. Two
//! implementations ship with the crate: a trainable weighted logistic model
//! and a serving-only adapter for externally trained ONNX networks.

mod logistic;
mod onnx;

pub use logistic::{LogisticClassifier, LogisticConfig};
pub use onnx::OnnxClassifier;

use crate::error::{DetectorError, Result, WindowShape};
use crate::models::FeatureMatrix;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Maps scaled windows to leak probabilities
pub trait SequenceClassifier: Send + Sync {
    /// Probability in [0, 1] for each window, in input order
    fn predict_proba(&self, batch: &[FeatureMatrix]) -> Result<Vec<f64>>;

    /// Window shape the model accepts
    fn input_shape(&self) -> WindowShape;

    fn kind(&self) -> ClassifierKind;
}

/// A classifier the training pipeline can fit and persist
pub trait TrainableClassifier: SequenceClassifier {
    fn fit(
        &mut self,
        x: &[FeatureMatrix],
        y: &[u8],
        class_weights: &ClassWeights,
    ) -> Result<FitReport>;

    /// Fit with a validation set available for early stopping
    ///
    /// Implementations without early stopping ignore the validation data.
    fn fit_with_validation(
        &mut self,
        x: &[FeatureMatrix],
        y: &[u8],
        class_weights: &ClassWeights,
        _validation: (&[FeatureMatrix], &[u8]),
    ) -> Result<FitReport> {
        self.fit(x, y, class_weights)
    }

    /// Write the model artifact to `path`
    fn save(&self, path: &Path) -> Result<()>;
}

/// Artifact format of a persisted classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierKind {
    Logistic,
    Onnx,
}

impl ClassifierKind {
    /// File name of the model artifact inside a generation directory
    pub fn file_name(&self) -> &'static str {
        match self {
            ClassifierKind::Logistic => "model.json",
            ClassifierKind::Onnx => "model.onnx",
        }
    }
}

impl fmt::Display for ClassifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassifierKind::Logistic => f.write_str("logistic"),
            ClassifierKind::Onnx => f.write_str("onnx"),
        }
    }
}

/// Outcome of a fit call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FitReport {
    pub epochs_run: usize,
    pub train_loss: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_validation_loss: Option<f64>,
}

/// Per-class sample weights
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassWeights {
    pub normal: f64,
    pub leak: f64,
}

impl Default for ClassWeights {
    fn default() -> Self {
        Self {
            normal: 1.0,
            leak: 1.0,
        }
    }
}

impl ClassWeights {
    /// Balanced weights `n / (2 * n_class)`; a missing class gets weight 1
    pub fn balanced(labels: &[u8]) -> Self {
        let n = labels.len() as f64;
        let leaks = labels.iter().filter(|&&l| l == 1).count() as f64;
        let normals = n - leaks;
        let weight = |count: f64| if count > 0.0 { n / (2.0 * count) } else { 1.0 };
        Self {
            normal: weight(normals),
            leak: weight(leaks),
        }
    }

    pub fn for_label(&self, label: u8) -> f64 {
        if label == 1 {
            self.leak
        } else {
            self.normal
        }
    }
}

/// Build a persisted classifier for serving from its artifact bytes
///
/// `path` is where the bytes were read from and only appears in errors.
pub fn load_classifier(
    kind: ClassifierKind,
    bytes: Vec<u8>,
    path: &Path,
    shape: WindowShape,
) -> Result<Box<dyn SequenceClassifier>> {
    let classifier: Box<dyn SequenceClassifier> = match kind {
        ClassifierKind::Logistic => Box::new(LogisticClassifier::from_bytes(&bytes, path)?),
        ClassifierKind::Onnx => Box::new(OnnxClassifier::from_bytes(bytes, path, shape)?),
    };
    if classifier.input_shape() != shape {
        return Err(DetectorError::artifact(
            "model",
            path,
            format!(
                "model expects windows of shape {}, generation declares {}",
                classifier.input_shape(),
                shape
            ),
        ));
    }
    Ok(classifier)
}

pub(crate) fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}
