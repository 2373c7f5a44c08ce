//! Show what a persisted generation contains

use crate::output::{
    format_optional, print_json, print_section, print_success, print_table, print_warning,
    OutputFormat,
};
use anyhow::{Context, Result};
use detector_lib::calibration::ThresholdConfig;
use detector_lib::preprocess::FeatureStats;
use detector_lib::serving::{
    load_generation, read_manifest, read_scaler, read_thresholds, GenerationManifest,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tabled::Tabled;

#[derive(Tabled)]
struct FieldRow {
    #[tabled(rename = "Field")]
    name: &'static str,
    #[tabled(rename = "Value")]
    value: String,
}

#[derive(Tabled)]
struct ScalerRow {
    #[tabled(rename = "Feature")]
    name: String,
    #[tabled(rename = "Mean")]
    mean: String,
    #[tabled(rename = "Scale")]
    scale: String,
}

impl From<&FeatureStats> for ScalerRow {
    fn from(stats: &FeatureStats) -> Self {
        Self {
            name: stats.name.clone(),
            mean: format!("{:.4}", stats.mean),
            scale: format!("{:.4}", stats.scale),
        }
    }
}

#[derive(Tabled)]
struct ChecksumRow {
    #[tabled(rename = "File")]
    file: String,
    #[tabled(rename = "SHA-256")]
    checksum: String,
}

#[derive(Serialize)]
struct InspectOutput {
    manifest: GenerationManifest,
    scaler: Vec<FeatureStats>,
    thresholds: Option<ThresholdConfig>,
    verified: bool,
}

pub async fn inspect(dir: PathBuf, verify: bool, format: OutputFormat) -> Result<()> {
    let output = tokio::task::spawn_blocking(move || read_generation(&dir, verify))
        .await
        .context("Inspection task failed")??;

    match format {
        OutputFormat::Json => print_json(&output)?,
        OutputFormat::Table => print_generation(&output),
    }
    Ok(())
}

fn read_generation(dir: &Path, verify: bool) -> Result<InspectOutput> {
    let manifest = read_manifest(dir)
        .with_context(|| format!("No readable generation in {}", dir.display()))?;
    let scaler = read_scaler(dir, &manifest)?;
    let thresholds = read_thresholds(dir, &manifest)?;

    // Full load also verifies the classifier checksum and deserializes it
    if verify {
        load_generation(dir, None).context("Generation failed verification")?;
    }

    Ok(InspectOutput {
        manifest,
        scaler: scaler.state().features.clone(),
        thresholds,
        verified: verify,
    })
}

fn print_generation(output: &InspectOutput) {
    let manifest = &output.manifest;

    print_section(&format!("Generation {}", manifest.generation_id));
    print_table(&[
        FieldRow {
            name: "Created",
            value: manifest.created_at.to_rfc3339(),
        },
        FieldRow {
            name: "Classifier",
            value: manifest.classifier.to_string(),
        },
        FieldRow {
            name: "Window shape",
            value: manifest.window_shape().to_string(),
        },
        FieldRow {
            name: "Label policy",
            value: manifest.label_policy.to_string(),
        },
    ]);

    print_section("Scaler");
    let rows: Vec<ScalerRow> = output.scaler.iter().map(ScalerRow::from).collect();
    print_table(&rows);

    print_section("Thresholds");
    match &output.thresholds {
        Some(t) => print_table(&[
            FieldRow {
                name: "Decision threshold",
                value: format!("{:.2}", t.decision_threshold()),
            },
            FieldRow {
                name: "Safe gas threshold",
                value: format_optional(t.safe_value_threshold(), " ppm"),
            },
            FieldRow {
                name: "Safe quantile",
                value: format!("{:.2}", t.safe_quantile()),
            },
        ]),
        None => print_warning(&format!(
            "No thresholds file; the detector will serve with decision threshold {:.2} and no safety threshold",
            ThresholdConfig::default().decision_threshold()
        )),
    }

    if let Some(training) = &manifest.training {
        print_section("Training");
        println!(
            "{} windows, validation F1 {:.3}, trained in {} ms",
            training.windows, training.validation_f1, training.duration_ms
        );
    }

    print_section("Checksums");
    let rows: Vec<ChecksumRow> = manifest
        .checksums
        .iter()
        .map(|(file, checksum)| ChecksumRow {
            file: file.clone(),
            checksum: checksum.clone(),
        })
        .collect();
    print_table(&rows);

    if output.verified {
        print_success("All artifacts match their checksums and load cleanly");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use detector_lib::dataset::Dataset;
    use detector_lib::serving::{SCALER_FILE, THRESHOLDS_FILE};
    use detector_lib::training::{TrainingConfig, TrainingPipeline};
    use detector_lib::Reading;

    fn persisted(dir: &Path) {
        let start = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap();
        let readings = (0..200)
            .map(|i| {
                let leak = i % 25 >= 20;
                let gas = if leak { 650.0 } else { 210.0 } + (i % 4) as f64;
                Reading {
                    timestamp: start + Duration::seconds(i),
                    features: vec![gas, 2000.0 + gas],
                    label: u8::from(leak),
                    device_id: "esp-01".to_string(),
                    scenario: "bench".to_string(),
                }
            })
            .collect();
        let config = TrainingConfig {
            seq_len: 4,
            ..TrainingConfig::default()
        };
        let dataset = Dataset::from_readings(config.feature_columns.clone(), readings).unwrap();
        let classifier = detector_lib::classifier::LogisticClassifier::new(
            config.window_shape(),
            config.classifier.clone(),
        );
        TrainingPipeline::new(config)
            .unwrap()
            .train(&dataset, classifier)
            .unwrap()
            .persist(dir)
            .unwrap();
    }

    #[test]
    fn test_read_generation_with_verification() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = tmp.path().join("gen");
        persisted(&dir);

        let output = read_generation(&dir, true).unwrap();
        assert!(output.verified);
        assert_eq!(output.manifest.seq_len, 4);
        assert_eq!(output.scaler.len(), 2);
        assert!(output.thresholds.is_some());
    }

    #[test]
    fn test_missing_thresholds_reported_as_none() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = tmp.path().join("gen");
        persisted(&dir);
        std::fs::remove_file(dir.join(THRESHOLDS_FILE)).unwrap();

        let output = read_generation(&dir, false).unwrap();
        assert!(output.thresholds.is_none());
    }

    #[test]
    fn test_tampered_scaler_fails() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = tmp.path().join("gen");
        persisted(&dir);
        let path = dir.join(SCALER_FILE);
        let mut text = std::fs::read_to_string(&path).unwrap();
        text.push(' ');
        std::fs::write(&path, text).unwrap();

        assert!(read_generation(&dir, false).is_err());
    }
}
