//! Train a model generation and write it to disk

use crate::output::{
    format_optional, format_ratio, print_info, print_json, print_section, print_success,
    print_table, OutputFormat,
};
use anyhow::{Context, Result};
use detector_lib::calibration::ClassificationReport;
use detector_lib::classifier::{OnnxClassifier, TrainableClassifier};
use detector_lib::observability::StructuredLogger;
use detector_lib::preprocess::SplitSummary;
use detector_lib::serving::GenerationManifest;
use detector_lib::training::{
    TrainedGeneration, TrainingConfig, TrainingPipeline, TrainingSummary,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tabled::Tabled;

#[derive(Tabled)]
struct PartitionRow {
    #[tabled(rename = "Partition")]
    name: &'static str,
    #[tabled(rename = "Windows")]
    windows: usize,
    #[tabled(rename = "Leak Ratio")]
    positive_ratio: String,
}

#[derive(Tabled)]
struct ValueRow {
    #[tabled(rename = "Setting")]
    name: &'static str,
    #[tabled(rename = "Value")]
    value: String,
}

#[derive(Tabled)]
struct ReportRow {
    #[tabled(rename = "Class")]
    class: &'static str,
    #[tabled(rename = "Precision")]
    precision: String,
    #[tabled(rename = "Recall")]
    recall: String,
    #[tabled(rename = "F1")]
    f1: String,
    #[tabled(rename = "Support")]
    support: usize,
}

#[derive(Serialize)]
struct TrainOutput<'a> {
    generation_id: &'a str,
    output: &'a Path,
    summary: &'a TrainingSummary,
}

pub async fn train(
    data: PathBuf,
    output: PathBuf,
    onnx_model: Option<PathBuf>,
    config: TrainingConfig,
    format: OutputFormat,
) -> Result<()> {
    if format == OutputFormat::Table {
        print_info(&format!(
            "Training on {} (seq_len={}, policy={})",
            data.display(),
            config.seq_len,
            config.label_policy
        ));
        if let Some(model) = &onnx_model {
            print_info(&format!(
                "Calibrating pretrained ONNX model {}",
                model.display()
            ));
        }
    }

    let dir = output.clone();
    let (summary, manifest) = tokio::task::spawn_blocking(move || -> Result<_> {
        let pipeline = TrainingPipeline::new(config)?;
        match onnx_model {
            Some(model) => {
                let classifier = OnnxClassifier::load(&model, pipeline.config().window_shape())
                    .with_context(|| format!("Failed to load ONNX model {}", model.display()))?;
                let trained = pipeline
                    .run_csv_with(&data, classifier)
                    .with_context(|| format!("Training on {} failed", data.display()))?;
                persist(trained, &dir)
            }
            None => {
                let trained = pipeline
                    .run_csv(&data)
                    .with_context(|| format!("Training on {} failed", data.display()))?;
                persist(trained, &dir)
            }
        }
    })
    .await
    .context("Training task failed")??;

    StructuredLogger::new("leakctl").log_training_summary(&manifest.generation_id, &summary);

    match format {
        OutputFormat::Json => print_json(&TrainOutput {
            generation_id: &manifest.generation_id,
            output: &output,
            summary: &summary,
        })?,
        OutputFormat::Table => print_summary(&output, &manifest, &summary),
    }
    Ok(())
}

fn persist<C: TrainableClassifier>(
    trained: TrainedGeneration<C>,
    dir: &Path,
) -> Result<(TrainingSummary, GenerationManifest)> {
    let manifest = trained
        .persist(dir)
        .with_context(|| format!("Failed to write generation to {}", dir.display()))?;
    Ok((trained.summary, manifest))
}

fn print_summary(output: &Path, manifest: &GenerationManifest, summary: &TrainingSummary) {
    print_success(&format!(
        "Generation {} written to {}",
        manifest.generation_id,
        output.display()
    ));

    print_section("Data");
    print_table(&[
        ValueRow {
            name: "Readings",
            value: summary.dataset_rows.to_string(),
        },
        ValueRow {
            name: "Reading leak ratio",
            value: format_ratio(summary.leak_ratio),
        },
        ValueRow {
            name: "Windows",
            value: summary.windows.to_string(),
        },
        ValueRow {
            name: "Class weights (normal / leak)",
            value: format!(
                "{:.3} / {:.3}",
                summary.class_weights.normal, summary.class_weights.leak
            ),
        },
        ValueRow {
            name: "Classifier",
            value: manifest.classifier.to_string(),
        },
        ValueRow {
            name: "Epochs",
            value: summary.fit.epochs_run.to_string(),
        },
    ]);
    print_table(&partition_rows(&summary.split));

    print_section("Thresholds");
    print_table(&[
        ValueRow {
            name: "Decision threshold",
            value: format!("{:.2}", summary.decision_threshold),
        },
        ValueRow {
            name: "Validation F1",
            value: format!("{:.3}", summary.validation_f1),
        },
        ValueRow {
            name: "Safe gas threshold",
            value: format_optional(summary.safe_value_threshold, " ppm"),
        },
    ]);

    if let Some(report) = &summary.test_report {
        print_section("Test set");
        print_table(&report_rows(report));
        println!("accuracy: {:.3}", report.accuracy);
    }
}

fn partition_rows(split: &SplitSummary) -> Vec<PartitionRow> {
    [
        ("train", &split.train),
        ("validation", &split.validation),
        ("test", &split.test),
    ]
    .into_iter()
    .map(|(name, p)| PartitionRow {
        name,
        windows: p.windows,
        positive_ratio: format_ratio(p.positive_ratio),
    })
    .collect()
}

fn report_rows(report: &ClassificationReport) -> Vec<ReportRow> {
    [("normal", &report.normal), ("leak", &report.leak)]
        .into_iter()
        .map(|(class, m)| ReportRow {
            class,
            precision: format!("{:.3}", m.precision),
            recall: format!("{:.3}", m.recall),
            f1: format!("{:.3}", m.f1),
            support: m.support,
        })
        .collect()
}
