//! Training-time preprocessing
//!
//! Windowing, stratified splitting and feature scaling. The scaler is the
//! only piece shared with serving, and it is fit exactly once.

mod scaler;
mod splitter;
mod windower;

pub use scaler::{FeatureScaler, FeatureStats, ScalerState, MIN_SCALE};
pub use splitter::{DatasetSplit, PartitionSummary, SplitConfig, SplitSummary, StratifiedSplitter};
pub use windower::Windower;
