//! Per-feature standardization fit on the training partition
//!
//! A `FeatureScaler` only exists in a fitted state: it is created by
//! [`FeatureScaler::fit`] on training windows or restored from a persisted
//! [`ScalerState`]. There is no way to refit an existing scaler, so the
//! statistics applied at serving time are the training statistics.

use crate::error::{DetectorError, Result, WindowShape};
use crate::models::{FeatureMatrix, Window};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Scale substituted for zero-variance features
pub const MIN_SCALE: f64 = 1.0;

/// Mean and scale of one feature column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureStats {
    pub name: String,
    pub mean: f64,
    pub scale: f64,
}

/// Persisted scaler statistics, in feature order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalerState {
    pub features: Vec<FeatureStats>,
    /// Number of rows the statistics were computed from
    pub fitted_rows: usize,
}

/// Fitted standard scaler: `(value - mean) / scale`
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureScaler {
    state: ScalerState,
}

impl FeatureScaler {
    /// Fit on the rows of all training windows, flattened
    ///
    /// Uses the population standard deviation.
    pub fn fit(feature_names: &[String], windows: &[Window]) -> Result<Self> {
        let cols = feature_names.len();
        if cols == 0 {
            return Err(DetectorError::InvalidConfig(
                "scaler needs at least one feature".to_string(),
            ));
        }
        if let Some(w) = windows.iter().find(|w| w.shape().cols != cols) {
            return Err(DetectorError::InvalidConfig(format!(
                "window has {} features, scaler schema has {}",
                w.shape().cols,
                cols
            )));
        }

        let rows: usize = windows.iter().map(|w| w.shape().rows).sum();
        if rows == 0 {
            return Err(DetectorError::InsufficientData(
                "cannot fit scaler on an empty training set".to_string(),
            ));
        }

        let mut sums = vec![0.0; cols];
        for row in windows.iter().flat_map(|w| w.matrix().rows()) {
            for (sum, v) in sums.iter_mut().zip(row) {
                *sum += v;
            }
        }
        let means: Vec<f64> = sums.iter().map(|s| s / rows as f64).collect();

        let mut sq = vec![0.0; cols];
        for row in windows.iter().flat_map(|w| w.matrix().rows()) {
            for ((acc, v), mean) in sq.iter_mut().zip(row).zip(&means) {
                *acc += (v - mean).powi(2);
            }
        }

        let features = feature_names
            .iter()
            .zip(means)
            .zip(sq)
            .map(|((name, mean), sq)| {
                let std = (sq / rows as f64).sqrt();
                FeatureStats {
                    name: name.clone(),
                    mean,
                    scale: if std > f64::EPSILON { std } else { MIN_SCALE },
                }
            })
            .collect::<Vec<_>>();

        debug!(rows, features = ?features, "Fitted feature scaler");
        Ok(Self {
            state: ScalerState {
                features,
                fitted_rows: rows,
            },
        })
    }

    /// Restore a scaler from persisted statistics
    pub fn from_state(state: ScalerState) -> Result<Self> {
        if state.features.is_empty() {
            return Err(DetectorError::InvalidConfig(
                "scaler state has no features".to_string(),
            ));
        }
        if let Some(f) = state
            .features
            .iter()
            .find(|f| !f.mean.is_finite() || !f.scale.is_finite() || f.scale <= 0.0)
        {
            return Err(DetectorError::InvalidConfig(format!(
                "invalid statistics for feature '{}': mean {}, scale {}",
                f.name, f.mean, f.scale
            )));
        }
        Ok(Self { state })
    }

    pub fn state(&self) -> &ScalerState {
        &self.state
    }

    pub fn num_features(&self) -> usize {
        self.state.features.len()
    }

    pub fn feature_names(&self) -> Vec<String> {
        self.state.features.iter().map(|f| f.name.clone()).collect()
    }

    /// Scale one matrix; the same code path serves single windows and batches
    pub fn transform(&self, matrix: &FeatureMatrix) -> Result<FeatureMatrix> {
        let shape = matrix.shape();
        if shape.cols != self.num_features() {
            return Err(DetectorError::ShapeMismatch {
                expected: WindowShape::new(shape.rows, self.num_features()),
                actual: shape,
            });
        }
        let data = matrix
            .rows()
            .flat_map(|row| {
                row.iter()
                    .zip(&self.state.features)
                    .map(|(v, f)| (v - f.mean) / f.scale)
            })
            .collect();
        FeatureMatrix::new(shape, data)
    }

    pub fn transform_batch(&self, windows: &[Window]) -> Result<Vec<FeatureMatrix>> {
        windows.iter().map(|w| self.transform(w.matrix())).collect()
    }
}
