//! Dry run of windowing and splitting without training

use crate::output::{
    format_ratio, print_json, print_section, print_table, print_warning, OutputFormat,
};
use anyhow::{Context, Result};
use detector_lib::dataset::{Dataset, DatasetSummary};
use detector_lib::preprocess::{SplitSummary, StratifiedSplitter, Windower};
use detector_lib::training::TrainingConfig;
use detector_lib::{positive_ratio, LabelPolicy};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tabled::Tabled;

#[derive(Debug, Serialize, Tabled)]
struct PolicyRow {
    #[tabled(rename = "Policy")]
    policy: LabelPolicy,
    #[tabled(rename = "Windows")]
    windows: usize,
    #[tabled(rename = "Leak Windows")]
    #[serde(skip)]
    leak_ratio_display: String,
    #[tabled(skip)]
    leak_ratio: f64,
    #[tabled(rename = "Train / Val / Test")]
    #[serde(skip)]
    split_display: String,
    #[tabled(skip)]
    split: Option<SplitSummary>,
}

#[derive(Serialize)]
struct WindowsOutput {
    dataset: DatasetSummary,
    seq_len: usize,
    policies: Vec<PolicyRow>,
}

pub async fn preview(data: PathBuf, config: TrainingConfig, format: OutputFormat) -> Result<()> {
    let output = tokio::task::spawn_blocking(move || build_preview(&data, &config))
        .await
        .context("Windowing task failed")??;

    match format {
        OutputFormat::Json => print_json(&output)?,
        OutputFormat::Table => {
            print_section("Dataset");
            println!(
                "{} readings, {} labelled leak",
                output.dataset.rows,
                format_ratio(output.dataset.leak_ratio)
            );
            for (device, count) in &output.dataset.devices {
                println!("  device {:<20} {}", device, count);
            }
            for (scenario, count) in &output.dataset.scenarios {
                println!("  scenario {:<18} {}", scenario, count);
            }

            print_section(&format!("Windows (seq_len={})", output.seq_len));
            print_table(&output.policies);
            for row in output.policies.iter().filter(|r| r.split.is_none()) {
                print_warning(&format!(
                    "Policy '{}' does not yield a usable split",
                    row.policy
                ));
            }
        }
    }
    Ok(())
}

fn build_preview(data: &Path, config: &TrainingConfig) -> Result<WindowsOutput> {
    let dataset = Dataset::from_csv_path(data, &config.schema())
        .with_context(|| format!("Failed to load {}", data.display()))?;
    let splitter = StratifiedSplitter::new(config.split_config())?;

    let mut policies = Vec::new();
    for policy in [LabelPolicy::Last, LabelPolicy::Any] {
        let windows = Windower::new(config.seq_len, policy)?.windows(dataset.readings())?;
        let leak_ratio = positive_ratio(&windows);
        let count = windows.len();
        let split = splitter.split(windows).ok().map(|s| s.summary());
        let split_display = match &split {
            Some(s) => format!(
                "{} / {} / {}",
                s.train.windows, s.validation.windows, s.test.windows
            ),
            None => "-".to_string(),
        };
        policies.push(PolicyRow {
            policy,
            windows: count,
            leak_ratio_display: format_ratio(leak_ratio),
            leak_ratio,
            split_display,
            split,
        });
    }

    Ok(WindowsOutput {
        dataset: dataset.summary(),
        seq_len: config.seq_len,
        policies,
    })
}
