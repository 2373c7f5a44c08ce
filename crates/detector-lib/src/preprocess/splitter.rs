//! Stratified train / validation / test partitioning
//!
//! Leak windows are rare, so each class is shuffled and split on its own
//! before the partitions are merged. A seeded `StdRng` makes the split
//! reproducible for a given input order.

use crate::error::{DetectorError, Result};
use crate::models::{positive_ratio, Window};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Split fractions and seed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitConfig {
    /// Fraction of all windows held out for test
    pub test_fraction: f64,
    /// Fraction of the remaining windows held out for validation
    pub validation_fraction: f64,
    pub seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            test_fraction: 0.2,
            validation_fraction: 0.2,
            seed: 42,
        }
    }
}

/// The three disjoint partitions
#[derive(Debug, Clone)]
pub struct DatasetSplit {
    pub train: Vec<Window>,
    pub validation: Vec<Window>,
    pub test: Vec<Window>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionSummary {
    pub windows: usize,
    pub positive_ratio: f64,
}

impl PartitionSummary {
    fn of(windows: &[Window]) -> Self {
        Self {
            windows: windows.len(),
            positive_ratio: positive_ratio(windows),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitSummary {
    pub train: PartitionSummary,
    pub validation: PartitionSummary,
    pub test: PartitionSummary,
}

impl DatasetSplit {
    pub fn summary(&self) -> SplitSummary {
        SplitSummary {
            train: PartitionSummary::of(&self.train),
            validation: PartitionSummary::of(&self.validation),
            test: PartitionSummary::of(&self.test),
        }
    }

    pub fn len(&self) -> usize {
        self.train.len() + self.validation.len() + self.test.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Class-preserving splitter
#[derive(Debug, Clone)]
pub struct StratifiedSplitter {
    config: SplitConfig,
}

impl StratifiedSplitter {
    pub fn new(config: SplitConfig) -> Result<Self> {
        for (name, value) in [
            ("test_fraction", config.test_fraction),
            ("validation_fraction", config.validation_fraction),
        ] {
            if !(value > 0.0 && value < 1.0) {
                return Err(DetectorError::InvalidConfig(format!(
                    "{} must be in (0, 1), got {}",
                    name, value
                )));
            }
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &SplitConfig {
        &self.config
    }

    /// Partition windows into train, validation and test
    pub fn split(&self, windows: Vec<Window>) -> Result<DatasetSplit> {
        if windows.is_empty() {
            return Err(DetectorError::InsufficientData(
                "cannot split an empty window set".to_string(),
            ));
        }

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let (rest, test) = stratified_holdout(windows, self.config.test_fraction, &mut rng);
        let (train, validation) =
            stratified_holdout(rest, self.config.validation_fraction, &mut rng);

        if train.is_empty() {
            return Err(DetectorError::InsufficientData(
                "training partition is empty after splitting".to_string(),
            ));
        }

        let split = DatasetSplit {
            train,
            validation,
            test,
        };
        for (name, part) in [
            ("train", &split.train),
            ("validation", &split.validation),
            ("test", &split.test),
        ] {
            if !part.is_empty() && positive_ratio(part) == 0.0 {
                warn!(partition = name, windows = part.len(), "Partition has no leak windows");
            }
        }
        debug!(
            train = split.train.len(),
            validation = split.validation.len(),
            test = split.test.len(),
            "Split windows"
        );
        Ok(split)
    }
}

/// Hold out `fraction` of each class; returns (kept, held_out)
fn stratified_holdout(
    windows: Vec<Window>,
    fraction: f64,
    rng: &mut StdRng,
) -> (Vec<Window>, Vec<Window>) {
    let mut held = vec![false; windows.len()];
    for class in [0u8, 1u8] {
        let mut indices: Vec<usize> = windows
            .iter()
            .enumerate()
            .filter(|(_, w)| w.label() == class)
            .map(|(i, _)| i)
            .collect();
        indices.shuffle(rng);
        let n_hold = ((indices.len() as f64 * fraction).round() as usize).min(indices.len());
        for &i in &indices[..n_hold] {
            held[i] = true;
        }
    }

    let (mut held_out, mut kept): (Vec<_>, Vec<_>) = windows
        .into_iter()
        .zip(held)
        .partition(|(_, is_held)| *is_held);
    held_out.shuffle(rng);
    kept.shuffle(rng);

    (
        kept.into_iter().map(|(w, _)| w).collect(),
        held_out.into_iter().map(|(w, _)| w).collect(),
    )
}
