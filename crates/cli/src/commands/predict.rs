//! Score a window on a running detector

use crate::client::ApiClient;
use crate::output::{
    color_label, color_safety, format_optional, print_json, print_table, OutputFormat,
};
use anyhow::{bail, Context, Result};
use detector_lib::serving::{GateResponse, LeakAssessment, WindowRequest};
use serde::Deserialize;
use std::path::Path;
use tabled::Tabled;

/// Accepted window files: the request body itself or a bare matrix
#[derive(Deserialize)]
#[serde(untagged)]
enum WindowFile {
    Request(WindowRequest),
    Matrix(Vec<Vec<f64>>),
}

#[derive(Tabled)]
struct SignalRow {
    #[tabled(rename = "Signal")]
    signal: &'static str,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Threshold")]
    threshold: String,
    #[tabled(rename = "Result")]
    result: String,
}

pub fn read_window(path: &Path) -> Result<Vec<Vec<f64>>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let file: WindowFile = serde_json::from_str(&content)
        .with_context(|| format!("{} is not a window matrix", path.display()))?;
    Ok(match file {
        WindowFile::Request(request) => request.window,
        WindowFile::Matrix(window) => window,
    })
}

pub async fn predict(client: &ApiClient, window: &Path, format: OutputFormat) -> Result<()> {
    let window = read_window(window)?;
    let response = client.predict_window(window).await?;

    if format == OutputFormat::Json {
        print_json(&response)?;
    }

    match response {
        GateResponse::Assessment(assessment) => {
            if format == OutputFormat::Table {
                print_table(&signal_rows(&assessment));
            }
            Ok(())
        }
        GateResponse::Rejected { error } => bail!("Detector rejected the window: {}", error),
    }
}

fn signal_rows(a: &LeakAssessment) -> Vec<SignalRow> {
    vec![
        SignalRow {
            signal: "classifier",
            value: format!("p(leak) = {:.4}", a.prob_leak),
            threshold: format!("{:.2}", a.decision_threshold),
            result: color_label(a.label),
        },
        SignalRow {
            signal: "gas level",
            value: format!("mean {:.1}, max {:.1}", a.raw_mean, a.raw_max),
            threshold: format_optional(a.safe_value_threshold, " ppm"),
            result: color_safety(a.above_safe),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_window_formats() {
        let mut wrapped = tempfile::NamedTempFile::new().unwrap();
        write!(wrapped, r#"{{"window": [[1.0, 2.0], [3.0, 4.0]]}}"#).unwrap();
        assert_eq!(
            read_window(wrapped.path()).unwrap(),
            vec![vec![1.0, 2.0], vec![3.0, 4.0]]
        );

        let mut bare = tempfile::NamedTempFile::new().unwrap();
        write!(bare, "[[5, 6]]").unwrap();
        assert_eq!(read_window(bare.path()).unwrap(), vec![vec![5.0, 6.0]]);

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        write!(bad, r#"{{"rows": 3}}"#).unwrap();
        assert!(read_window(bad.path()).is_err());
    }

    #[tokio::test]
    async fn test_rejection_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/predict-window")
            .with_status(200)
            .with_body(r#"{"error":"window shape must be (30, 2), got (1, 2)"}"#)
            .create_async()
            .await;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[[1.0, 2.0]]").unwrap();
        let client = ApiClient::new(&server.url()).unwrap();
        let err = predict(&client, file.path(), OutputFormat::Json)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("(30, 2)"));
    }
}
