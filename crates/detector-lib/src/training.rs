//! End-to-end training pipeline
//!
//! `Dataset -> Windower -> StratifiedSplitter -> FeatureScaler (train only)
//! -> classifier fit -> ThresholdCalibrator -> test evaluation`. The pipeline
//! itself performs no I/O; [`TrainedGeneration::persist`] writes the result
//! as one model generation.

use crate::calibration::{ClassificationReport, ThresholdCalibrator, ThresholdConfig};
use crate::classifier::{
    ClassWeights, FitReport, LogisticClassifier, LogisticConfig, TrainableClassifier,
};
use crate::dataset::{Dataset, DatasetSchema, DatasetSummary};
use crate::error::{DetectorError, Result, WindowShape};
use crate::models::{FeatureMatrix, LabelPolicy, Window, DEFAULT_FEATURES};
use crate::preprocess::{FeatureScaler, SplitConfig, SplitSummary, StratifiedSplitter, Windower};
use crate::serving::{write_generation, GenerationManifest};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};

/// Training run parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Window length in readings
    pub seq_len: usize,
    /// Feature columns, primary (gas) first
    pub feature_columns: Vec<String>,
    pub label_policy: LabelPolicy,
    pub test_fraction: f64,
    pub validation_fraction: f64,
    pub seed: u64,
    /// Quantile of normal primary values used as the safety threshold
    pub safe_quantile: f64,
    /// Train on a single device's readings
    pub device_id: Option<String>,
    pub classifier: LogisticConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        let split = SplitConfig::default();
        Self {
            seq_len: 30,
            feature_columns: DEFAULT_FEATURES.iter().map(|s| s.to_string()).collect(),
            label_policy: LabelPolicy::Last,
            test_fraction: split.test_fraction,
            validation_fraction: split.validation_fraction,
            seed: split.seed,
            safe_quantile: 0.95,
            device_id: None,
            classifier: LogisticConfig::default(),
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.seq_len == 0 {
            return Err(DetectorError::InvalidConfig(
                "seq_len must be at least 1".to_string(),
            ));
        }
        if self.feature_columns.is_empty() {
            return Err(DetectorError::InvalidConfig(
                "at least one feature column is required".to_string(),
            ));
        }
        if self.classifier.epochs == 0 || self.classifier.learning_rate <= 0.0 {
            return Err(DetectorError::InvalidConfig(
                "classifier needs positive epochs and learning rate".to_string(),
            ));
        }
        StratifiedSplitter::new(self.split_config())?;
        ThresholdCalibrator::new(self.safe_quantile)?;
        Ok(())
    }

    pub fn split_config(&self) -> SplitConfig {
        SplitConfig {
            test_fraction: self.test_fraction,
            validation_fraction: self.validation_fraction,
            seed: self.seed,
        }
    }

    pub fn schema(&self) -> DatasetSchema {
        let schema = DatasetSchema::new(self.feature_columns.clone());
        match &self.device_id {
            Some(device) => schema.with_device(device.clone()),
            None => schema,
        }
    }

    pub fn window_shape(&self) -> WindowShape {
        WindowShape::new(self.seq_len, self.feature_columns.len())
    }
}

/// What a training run did, persisted in the generation manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub dataset_rows: usize,
    pub leak_ratio: f64,
    pub windows: usize,
    pub split: SplitSummary,
    pub class_weights: ClassWeights,
    pub fit: FitReport,
    pub decision_threshold: f64,
    pub validation_f1: f64,
    pub safe_value_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_report: Option<ClassificationReport>,
    pub duration_ms: u64,
}

/// Output of a successful run, not yet written anywhere
#[derive(Debug)]
pub struct TrainedGeneration<C> {
    pub config: TrainingConfig,
    pub feature_names: Vec<String>,
    pub scaler: FeatureScaler,
    pub classifier: C,
    pub thresholds: ThresholdConfig,
    pub summary: TrainingSummary,
    pub dataset: DatasetSummary,
}

impl<C: TrainableClassifier> TrainedGeneration<C> {
    /// Write all artifacts into `dir`, replacing any generation already there
    pub fn persist(&self, dir: &Path) -> Result<GenerationManifest> {
        let manifest = GenerationManifest::new(
            self.config.seq_len,
            self.feature_names.clone(),
            self.config.label_policy,
            self.classifier.kind(),
        )
        .with_training(self.summary.clone());
        write_generation(
            dir,
            manifest,
            self.scaler.state(),
            &self.classifier,
            &self.thresholds,
        )
    }
}

pub struct TrainingPipeline {
    config: TrainingConfig,
}

impl TrainingPipeline {
    pub fn new(config: TrainingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Load the configured CSV and train the built-in logistic classifier
    pub fn run_csv(&self, path: &Path) -> Result<TrainedGeneration<LogisticClassifier>> {
        let classifier =
            LogisticClassifier::new(self.config.window_shape(), self.config.classifier.clone());
        self.run_csv_with(path, classifier)
    }

    /// Load the configured CSV and train `classifier` on it
    pub fn run_csv_with<C: TrainableClassifier>(
        &self,
        path: &Path,
        classifier: C,
    ) -> Result<TrainedGeneration<C>> {
        let dataset = Dataset::from_csv_path(path, &self.config.schema())?;
        self.train(&dataset, classifier)
    }

    pub fn train<C: TrainableClassifier>(
        &self,
        dataset: &Dataset,
        mut classifier: C,
    ) -> Result<TrainedGeneration<C>> {
        let started = Instant::now();
        let config = &self.config;

        if dataset.feature_names() != config.feature_columns.as_slice() {
            return Err(DetectorError::InvalidConfig(format!(
                "dataset features {:?} differ from configured {:?}",
                dataset.feature_names(),
                config.feature_columns
            )));
        }
        if classifier.input_shape() != config.window_shape() {
            return Err(DetectorError::InvalidConfig(format!(
                "classifier expects {}, pipeline produces {}",
                classifier.input_shape(),
                config.window_shape()
            )));
        }

        let windows = Windower::new(config.seq_len, config.label_policy)?
            .windows(dataset.readings())?;
        if windows.is_empty() {
            return Err(DetectorError::InsufficientData(format!(
                "{} readings are fewer than the window length {}",
                dataset.len(),
                config.seq_len
            )));
        }
        let num_windows = windows.len();

        let split = StratifiedSplitter::new(config.split_config())?.split(windows)?;
        let split_summary = split.summary();
        info!(
            train = split.train.len(),
            validation = split.validation.len(),
            test = split.test.len(),
            policy = %config.label_policy,
            "Windows split"
        );

        let scaler = FeatureScaler::fit(dataset.feature_names(), &split.train)?;
        let (x_train, y_train) = scaled(&scaler, &split.train)?;
        let (x_val, y_val) = scaled(&scaler, &split.validation)?;
        let (x_test, y_test) = scaled(&scaler, &split.test)?;

        let class_weights = ClassWeights::balanced(&y_train);
        let fit = classifier.fit_with_validation(
            &x_train,
            &y_train,
            &class_weights,
            (&x_val, &y_val),
        )?;

        let val_probs = classifier.predict_proba(&x_val)?;
        let (thresholds, search) = ThresholdCalibrator::new(config.safe_quantile)?.calibrate(
            &val_probs,
            &y_val,
            &dataset.normal_primary_values(),
        )?;

        let test_report = if x_test.is_empty() {
            warn!("Test partition is empty; skipping evaluation");
            None
        } else {
            let probs = classifier.predict_proba(&x_test)?;
            let report = ClassificationReport::new(&probs, &y_test, thresholds.decision_threshold());
            info!(
                leak_precision = report.leak.precision,
                leak_recall = report.leak.recall,
                leak_f1 = report.leak.f1,
                accuracy = report.accuracy,
                "Test set evaluation"
            );
            Some(report)
        };

        let dataset_summary = dataset.summary();
        let summary = TrainingSummary {
            dataset_rows: dataset_summary.rows,
            leak_ratio: dataset_summary.leak_ratio,
            windows: num_windows,
            split: split_summary,
            class_weights,
            fit,
            decision_threshold: thresholds.decision_threshold(),
            validation_f1: search.f1,
            safe_value_threshold: thresholds.safe_value_threshold(),
            test_report,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        Ok(TrainedGeneration {
            config: config.clone(),
            feature_names: dataset.feature_names().to_vec(),
            scaler,
            classifier,
            thresholds,
            summary,
            dataset: dataset_summary,
        })
    }
}

fn scaled(scaler: &FeatureScaler, windows: &[Window]) -> Result<(Vec<FeatureMatrix>, Vec<u8>)> {
    let x = scaler.transform_batch(windows)?;
    let y = windows.iter().map(Window::label).collect();
    Ok((x, y))
}
