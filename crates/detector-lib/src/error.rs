//! Error taxonomy for training and serving
//!
//! Training-time variants are fatal to the pipeline. Serving-time
//! `ShapeMismatch` is recovered per request and returned to the caller as
//! data; `ArtifactLoad` aborts startup.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Shape of a window matrix: rows are time steps, columns are features
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowShape {
    pub rows: usize,
    pub cols: usize,
}

impl WindowShape {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }

    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for WindowShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.rows, self.cols)
    }
}

/// Errors produced by the detector library
#[derive(Debug, Error)]
pub enum DetectorError {
    /// Input rows are missing required columns
    #[error("missing required column(s): {}", .missing.join(", "))]
    Schema { missing: Vec<String> },

    /// Not enough data to split, fit or calibrate
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    /// Window shape differs from the trained (seq_len, features) shape
    #[error("window shape must be {expected}, got {actual}")]
    ShapeMismatch {
        expected: WindowShape,
        actual: WindowShape,
    },

    /// A model generation artifact is missing, corrupt or inconsistent
    #[error("failed to load {artifact} artifact from {}: {reason}", .path.display())]
    ArtifactLoad {
        artifact: &'static str,
        path: PathBuf,
        reason: String,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Row-level parse failure in training input
    #[error("line {line}: {reason}")]
    Parse { line: u64, reason: String },

    #[error("classifier error: {0}")]
    Classifier(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl DetectorError {
    pub(crate) fn artifact(
        artifact: &'static str,
        path: impl Into<PathBuf>,
        reason: impl fmt::Display,
    ) -> Self {
        Self::ArtifactLoad {
            artifact,
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns true for errors that belong to a single serving request
    pub fn is_request_error(&self) -> bool {
        matches!(self, DetectorError::ShapeMismatch { .. })
    }
}

pub type Result<T> = std::result::Result<T, DetectorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_mismatch_message_reports_both_shapes() {
        let err = DetectorError::ShapeMismatch {
            expected: WindowShape::new(30, 2),
            actual: WindowShape::new(29, 2),
        };
        assert_eq!(err.to_string(), "window shape must be (30, 2), got (29, 2)");
        assert!(err.is_request_error());
    }

    #[test]
    fn test_schema_error_names_columns() {
        let err = DetectorError::Schema {
            missing: vec!["label".to_string(), "deviceId".to_string()],
        };
        assert_eq!(err.to_string(), "missing required column(s): label, deviceId");
        assert!(!err.is_request_error());
    }
}
