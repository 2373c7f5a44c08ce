//! ONNX sequence classifier using tract
//!
//! Serves networks trained outside this crate. The model must take a single
//! `[1, seq_len, num_features]` f32 input and emit either one leak
//! probability or a two-class `[normal, leak]` probability pair.
//!
//! The network is frozen: fitting leaves it unchanged, so the training
//! pipeline only fits the scaler and calibrates thresholds on its outputs.
//! Saving writes back the exact bytes that were loaded.

use super::{ClassWeights, ClassifierKind, FitReport, SequenceClassifier, TrainableClassifier};
use crate::error::{DetectorError, Result, WindowShape};
use crate::models::FeatureMatrix;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tract_onnx::prelude::*;
use tracing::{debug, info, warn};

/// Per-window latency above which a warning is logged
const SLOW_INFERENCE_MS: u128 = 50;

type TractModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

pub struct OnnxClassifier {
    model: TractModel,
    shape: WindowShape,
    source: PathBuf,
    bytes: Vec<u8>,
}

impl std::fmt::Debug for OnnxClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxClassifier")
            .field("shape", &self.shape)
            .field("source", &self.source)
            .field("bytes", &self.bytes.len())
            .finish_non_exhaustive()
    }
}

impl OnnxClassifier {
    /// Load and optimize a model file for windows of `shape`
    pub fn load(path: &Path, shape: WindowShape) -> Result<Self> {
        let bytes = fs::read(path).map_err(|e| DetectorError::artifact("model", path, e))?;
        Self::from_bytes(bytes, path, shape)
    }

    /// Build from model bytes already in memory; `source` is only used in
    /// error messages and logs
    pub fn from_bytes(bytes: Vec<u8>, source: &Path, shape: WindowShape) -> Result<Self> {
        let model = Self::load_model(&bytes, shape)
            .map_err(|e| DetectorError::artifact("model", source, e))?;
        debug!(path = %source.display(), %shape, "Loaded ONNX classifier");
        Ok(Self {
            model,
            shape,
            source: source.to_path_buf(),
            bytes,
        })
    }

    fn load_model(bytes: &[u8], shape: WindowShape) -> TractResult<TractModel> {
        tract_onnx::onnx()
            .model_for_read(&mut std::io::Cursor::new(bytes))?
            .with_input_fact(0, f32::fact([1, shape.rows, shape.cols]).into())?
            .into_optimized()?
            .into_runnable()
    }

    fn to_tensor(&self, matrix: &FeatureMatrix) -> Result<Tensor> {
        let data: Vec<f32> = matrix.as_slice().iter().map(|&v| v as f32).collect();
        let array =
            tract_ndarray::Array3::from_shape_vec((1, self.shape.rows, self.shape.cols), data)
                .map_err(|e| DetectorError::Classifier(e.to_string()))?;
        Ok(array.into())
    }

    fn run_one(&self, matrix: &FeatureMatrix) -> Result<f64> {
        if matrix.shape() != self.shape {
            return Err(DetectorError::ShapeMismatch {
                expected: self.shape,
                actual: matrix.shape(),
            });
        }
        let start = Instant::now();
        let input = self.to_tensor(matrix)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .map_err(|e| DetectorError::Classifier(format!("inference failed: {}", e)))?;
        let output = outputs
            .first()
            .ok_or_else(|| DetectorError::Classifier("model produced no output".to_string()))?;
        let view = output
            .to_array_view::<f32>()
            .map_err(|e| DetectorError::Classifier(e.to_string()))?;
        let values: Vec<f32> = view.iter().copied().collect();

        let elapsed = start.elapsed().as_millis();
        if elapsed > SLOW_INFERENCE_MS {
            warn!(elapsed_ms = elapsed as u64, "Slow ONNX inference");
        }
        leak_probability(&values)
    }
}

/// Leak probability from a model output of `[p]` or `[normal, leak]`
fn leak_probability(values: &[f32]) -> Result<f64> {
    let prob = match values {
        [p] => *p,
        [_, leak] => *leak,
        other => {
            return Err(DetectorError::Classifier(format!(
                "expected 1 or 2 output values, got {}",
                other.len()
            )))
        }
    };
    if !prob.is_finite() {
        return Err(DetectorError::Classifier(format!(
            "model returned non-finite probability {}",
            prob
        )));
    }
    Ok(f64::from(prob).clamp(0.0, 1.0))
}

impl SequenceClassifier for OnnxClassifier {
    fn predict_proba(&self, batch: &[FeatureMatrix]) -> Result<Vec<f64>> {
        batch.iter().map(|m| self.run_one(m)).collect()
    }

    fn input_shape(&self) -> WindowShape {
        self.shape
    }

    fn kind(&self) -> ClassifierKind {
        ClassifierKind::Onnx
    }
}

impl TrainableClassifier for OnnxClassifier {
    fn fit(
        &mut self,
        x: &[FeatureMatrix],
        _y: &[u8],
        _class_weights: &ClassWeights,
    ) -> Result<FitReport> {
        info!(
            path = %self.source.display(),
            windows = x.len(),
            "ONNX classifier is pretrained; keeping weights"
        );
        Ok(FitReport::default())
    }

    fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, &self.bytes)?;
        Ok(())
    }
}
