//! Core data models for the leak detector

use crate::error::{DetectorError, Result, WindowShape};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default feature schema, primary feature first
pub const DEFAULT_FEATURES: [&str; 2] = ["gas", "rawAdc"];

/// A single sensor reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub timestamp: DateTime<Utc>,
    /// Feature values in schema order
    pub features: Vec<f64>,
    /// 1 = leak, 0 = normal
    pub label: u8,
    pub device_id: String,
    pub scenario: String,
}

impl Reading {
    /// Value of the primary feature (gas concentration)
    pub fn primary(&self) -> f64 {
        self.features[0]
    }

    pub fn is_leak(&self) -> bool {
        self.label == 1
    }
}

/// How a window's label is derived from its readings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelPolicy {
    /// Label of the final reading in the window
    #[default]
    Last,
    /// 1 if any reading in the window is labeled 1
    Any,
}

impl LabelPolicy {
    /// Derive a window label from the labels of its readings, in order
    pub fn label<I>(&self, labels: I) -> u8
    where
        I: IntoIterator<Item = u8>,
    {
        match self {
            LabelPolicy::Last => labels.into_iter().last().unwrap_or(0),
            LabelPolicy::Any => u8::from(labels.into_iter().any(|l| l == 1)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LabelPolicy::Last => "last",
            LabelPolicy::Any => "any",
        }
    }
}

impl fmt::Display for LabelPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LabelPolicy {
    type Err = DetectorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "last" => Ok(LabelPolicy::Last),
            "any" => Ok(LabelPolicy::Any),
            other => Err(DetectorError::InvalidConfig(format!(
                "unknown label policy '{}', expected 'last' or 'any'",
                other
            ))),
        }
    }
}

/// Dense row-major L x F matrix of feature values
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    shape: WindowShape,
    data: Vec<f64>,
}

impl FeatureMatrix {
    /// Build a matrix from row-major data
    pub fn new(shape: WindowShape, data: Vec<f64>) -> Result<Self> {
        if data.len() != shape.len() {
            return Err(DetectorError::InvalidConfig(format!(
                "matrix of shape {} needs {} values, got {}",
                shape,
                shape.len(),
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    /// Build a matrix from nested rows, requiring exactly `expected` shape
    ///
    /// For ragged input the reported column count is the width of the first
    /// row that deviates from `expected.cols`.
    pub fn from_rows(rows: &[Vec<f64>], expected: WindowShape) -> Result<Self> {
        let actual_cols = rows
            .iter()
            .map(Vec::len)
            .find(|len| *len != expected.cols)
            .unwrap_or(expected.cols);
        let actual = WindowShape::new(rows.len(), actual_cols);
        if actual != expected {
            return Err(DetectorError::ShapeMismatch { expected, actual });
        }

        let data = rows.iter().flat_map(|r| r.iter().copied()).collect();
        Ok(Self {
            shape: expected,
            data,
        })
    }

    pub fn shape(&self) -> WindowShape {
        self.shape
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        self.data.chunks_exact(self.shape.cols.max(1))
    }

    pub fn row(&self, index: usize) -> Option<&[f64]> {
        let cols = self.shape.cols;
        self.data.get(index * cols..(index + 1) * cols)
    }

    pub fn column(&self, index: usize) -> impl Iterator<Item = f64> + '_ {
        self.rows().map(move |row| row[index])
    }

    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        self.rows().map(<[f64]>::to_vec).collect()
    }
}

/// A labeled, immutable window of consecutive readings
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    matrix: FeatureMatrix,
    label: u8,
}

impl Window {
    pub fn new(matrix: FeatureMatrix, label: u8) -> Self {
        Self { matrix, label }
    }

    pub fn matrix(&self) -> &FeatureMatrix {
        &self.matrix
    }

    pub fn label(&self) -> u8 {
        self.label
    }

    pub fn shape(&self) -> WindowShape {
        self.matrix.shape()
    }
}

/// Fraction of windows labeled 1
pub fn positive_ratio(windows: &[Window]) -> f64 {
    if windows.is_empty() {
        return 0.0;
    }
    let positives = windows.iter().filter(|w| w.label() == 1).count();
    positives as f64 / windows.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_policy_last() {
        assert_eq!(LabelPolicy::Last.label([1, 1, 0]), 0);
        assert_eq!(LabelPolicy::Last.label([0, 0, 1]), 1);
    }

    #[test]
    fn test_label_policy_any() {
        assert_eq!(LabelPolicy::Any.label([0, 1, 0]), 1);
        assert_eq!(LabelPolicy::Any.label([0, 0, 0]), 0);
    }

    #[test]
    fn test_label_policy_parse() {
        assert_eq!("ANY".parse::<LabelPolicy>().unwrap(), LabelPolicy::Any);
        assert_eq!(" last ".parse::<LabelPolicy>().unwrap(), LabelPolicy::Last);
        assert!("first".parse::<LabelPolicy>().is_err());
    }

    #[test]
    fn test_matrix_from_rows_accepts_expected_shape() {
        let rows = vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]];
        let m = FeatureMatrix::from_rows(&rows, WindowShape::new(3, 2)).unwrap();
        assert_eq!(m.as_slice(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(m.row(1), Some(&[3.0, 4.0][..]));
        assert_eq!(m.column(0).collect::<Vec<_>>(), vec![1.0, 3.0, 5.0]);
        assert_eq!(m.to_rows(), rows);
    }

    #[test]
    fn test_matrix_from_rows_reports_row_count_mismatch() {
        let rows = vec![vec![1.0, 2.0]; 2];
        let err = FeatureMatrix::from_rows(&rows, WindowShape::new(3, 2)).unwrap_err();
        match err {
            DetectorError::ShapeMismatch { expected, actual } => {
                assert_eq!(expected, WindowShape::new(3, 2));
                assert_eq!(actual, WindowShape::new(2, 2));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_matrix_from_rows_reports_ragged_width() {
        let rows = vec![vec![1.0, 2.0], vec![3.0], vec![5.0, 6.0]];
        let err = FeatureMatrix::from_rows(&rows, WindowShape::new(3, 2)).unwrap_err();
        assert_eq!(err.to_string(), "window shape must be (3, 2), got (3, 1)");
    }
}
