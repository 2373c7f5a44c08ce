//! CLI integration tests

use std::io::Write;
use std::process::{Command, Output};
use tempfile::TempDir;

fn leakctl(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_leakctl"))
        .args(args)
        .env_remove("LEAKCTL_API_URL")
        .output()
        .expect("Failed to execute command")
}

/// Write a CSV with periodic leak bursts
fn write_dataset(dir: &TempDir) -> String {
    let path = dir.path().join("readings.csv");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "timestamp,gas,rawAdc,label,scenario,deviceId").unwrap();
    for i in 0..300 {
        let leak = i % 30 >= 24;
        let gas = if leak { 760 } else { 205 } + i % 4;
        writeln!(
            file,
            "2024-03-01T00:{:02}:{:02}Z,{},{},{},{},esp-01",
            i / 60,
            i % 60,
            gas,
            2000 + gas,
            u8::from(leak),
            if leak { "leak" } else { "idle" }
        )
        .unwrap();
    }
    path.to_string_lossy().into_owned()
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = leakctl(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("gas leak detector"), "Should show app name");
    for command in ["train", "windows", "inspect", "predict", "status"] {
        assert!(stdout.contains(command), "Should show {command} command");
    }
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = leakctl(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("leakctl"), "Should show binary name");
}

#[test]
fn test_train_help_lists_overrides() {
    let output = leakctl(&["train", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    for flag in ["--data", "--output", "--seq-len", "--label-policy", "--safe-quantile"] {
        assert!(stdout.contains(flag), "Should document {flag}");
    }
}

#[test]
fn test_invalid_label_policy_rejected() {
    let output = leakctl(&["train", "--data", "x.csv", "--label-policy", "majority"]);
    assert!(!output.status.success());
}

#[test]
fn test_train_then_inspect() {
    let tmp = TempDir::new().unwrap();
    let data = write_dataset(&tmp);
    let generation = tmp.path().join("generation");
    let generation = generation.to_str().unwrap();

    let output = leakctl(&[
        "--format", "json", "train", "--data", &data, "--output", generation, "--seq-len", "6",
        "--epochs", "20",
    ]);
    assert!(
        output.status.success(),
        "train failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let trained: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let threshold = trained["summary"]["decision_threshold"].as_f64().unwrap();
    assert!((0.1..=0.9).contains(&threshold));

    let output = leakctl(&["--format", "json", "inspect", generation, "--verify"]);
    assert!(output.status.success());
    let inspected: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(inspected["manifest"]["generation_id"], trained["generation_id"]);
    assert_eq!(inspected["manifest"]["seq_len"], 6);
    assert_eq!(inspected["verified"], true);
}

#[test]
fn test_train_pretrained_onnx_model() {
    let tmp = TempDir::new().unwrap();
    let data = write_dataset(&tmp);
    let generation = tmp.path().join("generation");
    let generation = generation.to_str().unwrap();
    let model = concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/../detector-lib/tests/fixtures/window_mean_sigmoid.onnx"
    );

    let output = leakctl(&[
        "--format", "json", "train", "--data", &data, "--output", generation, "--seq-len", "6",
        "--onnx-model", model,
    ]);
    assert!(
        output.status.success(),
        "train failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let trained: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(trained["summary"]["fit"]["epochs_run"], 0);

    let output = leakctl(&["--format", "json", "inspect", generation, "--verify"]);
    assert!(output.status.success());
    let inspected: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(inspected["manifest"]["classifier"], "onnx");
    assert_eq!(inspected["verified"], true);
}

#[test]
fn test_windows_dry_run() {
    let tmp = TempDir::new().unwrap();
    let data = write_dataset(&tmp);

    let output = leakctl(&["--format", "json", "windows", "--data", &data, "--seq-len", "10"]);
    assert!(output.status.success());
    let preview: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(preview["dataset"]["rows"], 300);
    assert_eq!(preview["policies"][0]["policy"], "last");
    assert_eq!(preview["policies"][0]["windows"], 291);
    assert_eq!(preview["policies"][1]["policy"], "any");
}

#[test]
fn test_inspect_missing_generation_fails() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nothing");
    let output = leakctl(&["inspect", missing.to_str().unwrap()]);
    assert!(!output.status.success());
}
