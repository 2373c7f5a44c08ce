//! Sliding-window construction over ordered readings

use crate::error::{DetectorError, Result, WindowShape};
use crate::models::{FeatureMatrix, LabelPolicy, Reading, Window};
use tracing::debug;

/// Slides a fixed-length window over readings with stride 1
#[derive(Debug, Clone, Copy)]
pub struct Windower {
    seq_len: usize,
    policy: LabelPolicy,
}

impl Windower {
    pub fn new(seq_len: usize, policy: LabelPolicy) -> Result<Self> {
        if seq_len == 0 {
            return Err(DetectorError::InvalidConfig(
                "window length must be at least 1".to_string(),
            ));
        }
        Ok(Self { seq_len, policy })
    }

    pub fn seq_len(&self) -> usize {
        self.seq_len
    }

    pub fn policy(&self) -> LabelPolicy {
        self.policy
    }

    /// Build every window `readings[i..i + seq_len]`
    ///
    /// Readings must already be ordered by timestamp. Fewer readings than
    /// `seq_len` yields an empty vector; readings with differing feature
    /// counts are rejected.
    pub fn windows(&self, readings: &[Reading]) -> Result<Vec<Window>> {
        if readings.len() < self.seq_len {
            debug!(
                readings = readings.len(),
                seq_len = self.seq_len,
                "Not enough readings for a single window"
            );
            return Ok(Vec::new());
        }

        let num_features = readings[0].features.len();
        let shape = WindowShape::new(self.seq_len, num_features);

        readings
            .windows(self.seq_len)
            .map(|slice| {
                let data: Vec<f64> = slice
                    .iter()
                    .flat_map(|r| r.features.iter().copied())
                    .collect();
                let label = self.policy.label(slice.iter().map(|r| r.label));
                Ok(Window::new(FeatureMatrix::new(shape, data)?, label))
            })
            .collect()
    }
}
