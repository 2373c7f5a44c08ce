//! Integration tests for the detector API endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{Duration, TimeZone, Utc};
use detector_lib::{
    classifier::LogisticClassifier,
    dataset::Dataset,
    health::HealthRegistry,
    observability::{DetectorMetrics, StructuredLogger},
    serving::THRESHOLDS_FILE,
    training::{TrainingConfig, TrainingPipeline},
    LabelPolicy, Reading,
};
use leak_detector::api::{create_router, initialize, AppState};
use leak_detector::config::DetectorConfig;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

const SEQ_LEN: usize = 5;

fn readings() -> Vec<Reading> {
    let start = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
    (0..400)
        .map(|i| {
            let leak = i % 40 >= 32;
            let gas = if leak { 780.0 } else { 190.0 } + (i % 5) as f64;
            Reading {
                timestamp: start + Duration::seconds(i),
                features: vec![gas, 1900.0 + gas],
                label: u8::from(leak),
                device_id: "esp-01".to_string(),
                scenario: "bench".to_string(),
            }
        })
        .collect()
}

/// Train a small generation into `<tmp>/current`
fn train_generation(tmp: &TempDir, policy: LabelPolicy) -> PathBuf {
    let config = TrainingConfig {
        seq_len: SEQ_LEN,
        label_policy: policy,
        ..TrainingConfig::default()
    };
    let dataset = Dataset::from_readings(config.feature_columns.clone(), readings()).unwrap();
    let classifier = LogisticClassifier::new(config.window_shape(), config.classifier.clone());
    let trained = TrainingPipeline::new(config)
        .unwrap()
        .train(&dataset, classifier)
        .unwrap();
    let dir = tmp.path().join("current");
    trained.persist(&dir).unwrap();
    dir
}

async fn setup_app(artifact_dir: &Path) -> (Router, Arc<AppState>) {
    let config = DetectorConfig {
        artifact_dir: artifact_dir.to_path_buf(),
        max_concurrent_inferences: 2,
        ..DetectorConfig::default()
    };
    let health_registry = HealthRegistry::new();
    let state = initialize(
        &config,
        health_registry.clone(),
        DetectorMetrics::new(),
        StructuredLogger::new("test"),
    )
    .await
    .unwrap();
    health_registry.set_ready(true).await;
    (create_router(state.clone()), state)
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn predict(window: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/predict-window")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::json!({ "window": window }).to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_predict_window_returns_both_signals() {
    let tmp = TempDir::new().unwrap();
    let (app, state) = setup_app(&train_generation(&tmp, LabelPolicy::Last)).await;

    let window = serde_json::json!([
        [780.0, 2680.0],
        [781.0, 2681.0],
        [782.0, 2682.0],
        [783.0, 2683.0],
        [784.0, 2684.0]
    ]);
    let (status, body) = send(app, predict(window)).await;

    assert_eq!(status, StatusCode::OK);
    let prob = body["prob_leak"].as_f64().unwrap();
    assert!((0.0..=1.0).contains(&prob));
    assert_eq!(
        body["decision_threshold"].as_f64().unwrap(),
        state.gate.thresholds().decision_threshold()
    );
    assert_eq!(body["gas_mean"], 782.0);
    assert_eq!(body["gas_max"], 784.0);
    assert!(body["safe_gas_threshold_ppm"].is_number());
    assert_eq!(body["above_safe_threshold"], true);
    let label = body["label"].as_u64().unwrap();
    assert_eq!(label, u64::from(prob >= body["decision_threshold"].as_f64().unwrap()));
}

#[tokio::test]
async fn test_wrong_shape_is_a_normal_response() {
    let tmp = TempDir::new().unwrap();
    let (app, _state) = setup_app(&train_generation(&tmp, LabelPolicy::Last)).await;

    let window = serde_json::json!([[200.0, 2100.0], [201.0, 2101.0]]);
    let (status, body) = send(app, predict(window)).await;

    assert_eq!(status, StatusCode::OK);
    let error = body["error"].as_str().unwrap();
    assert!(error.contains("(5, 2)"), "{error}");
    assert!(error.contains("(2, 2)"), "{error}");
    assert!(body.get("prob_leak").is_none());
}

#[tokio::test]
async fn test_malformed_body_is_client_error() {
    let tmp = TempDir::new().unwrap();
    let (app, _state) = setup_app(&train_generation(&tmp, LabelPolicy::Last)).await;

    let request = Request::builder()
        .method("POST")
        .uri("/predict-window")
        .header("content-type", "application/json")
        .body(Body::from("{\"window\": \"not a matrix\"}"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_healthz_reports_generation() {
    let tmp = TempDir::new().unwrap();
    let (app, state) = setup_app(&train_generation(&tmp, LabelPolicy::Last)).await;

    let (status, body) = send(app, get("/healthz")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["generation"], state.gate.generation_id());
    assert_eq!(body["components"]["thresholds"]["status"], "healthy");
}

#[tokio::test]
async fn test_missing_thresholds_degrade_service() {
    let tmp = TempDir::new().unwrap();
    let dir = train_generation(&tmp, LabelPolicy::Last);
    std::fs::remove_file(dir.join(THRESHOLDS_FILE)).unwrap();
    let (app, _state) = setup_app(&dir).await;

    let (status, body) = send(app.clone(), get("/healthz")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["components"]["thresholds"]["status"], "degraded");

    let (status, body) = send(app.clone(), get("/readyz")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ready"], true);

    let window = serde_json::json!([[1.0, 2.0], [1.0, 2.0], [1.0, 2.0], [1.0, 2.0], [1.0, 2.0]]);
    let (status, body) = send(app, predict(window)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["decision_threshold"], 0.5);
    assert!(body["safe_gas_threshold_ppm"].is_null());
    assert!(body["above_safe_threshold"].is_null());
}

#[tokio::test]
async fn test_readyz_before_ready() {
    let tmp = TempDir::new().unwrap();
    let dir = train_generation(&tmp, LabelPolicy::Last);
    let config = DetectorConfig {
        artifact_dir: dir,
        ..DetectorConfig::default()
    };
    let state = initialize(
        &config,
        HealthRegistry::new(),
        DetectorMetrics::new(),
        StructuredLogger::new("test"),
    )
    .await
    .unwrap();

    let (status, body) = send(create_router(state), get("/readyz")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["ready"], false);
}

#[tokio::test]
async fn test_missing_generation_is_fatal() {
    let tmp = TempDir::new().unwrap();
    let config = DetectorConfig {
        artifact_dir: tmp.path().join("nowhere"),
        ..DetectorConfig::default()
    };
    let result = initialize(
        &config,
        HealthRegistry::new(),
        DetectorMetrics::new(),
        StructuredLogger::new("test"),
    )
    .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_label_policy_mismatch_is_fatal() {
    let tmp = TempDir::new().unwrap();
    let config = DetectorConfig {
        artifact_dir: train_generation(&tmp, LabelPolicy::Any),
        expected_label_policy: Some(LabelPolicy::Last),
        ..DetectorConfig::default()
    };
    let result = initialize(
        &config,
        HealthRegistry::new(),
        DetectorMetrics::new(),
        StructuredLogger::new("test"),
    )
    .await;
    let err = result.err().unwrap();
    assert!(format!("{:#}", err).contains("label policy"));
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let tmp = TempDir::new().unwrap();
    let (app, _state) = setup_app(&train_generation(&tmp, LabelPolicy::Last)).await;

    let window = serde_json::json!([[1.0, 2.0], [1.0, 2.0], [1.0, 2.0], [1.0, 2.0], [1.0, 2.0]]);
    send(app.clone(), predict(window)).await;

    let response = app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("leak_detector_predictions_total"));
    assert!(text.contains("leak_detector_generation_info"));
}
