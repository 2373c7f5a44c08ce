//! HTTP API: window prediction, health checks and Prometheus metrics

use crate::config::DetectorConfig;
use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use detector_lib::{
    health::{components, ComponentStatus, HealthRegistry},
    observability::{DetectorMetrics, StructuredLogger},
    serving::{load_generation, GateResponse, InferenceGate, ThresholdsSource, WindowRequest},
};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{error, info};

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub gate: Arc<InferenceGate>,
    pub inference_slots: Arc<Semaphore>,
    pub health_registry: HealthRegistry,
    pub metrics: DetectorMetrics,
    pub logger: StructuredLogger,
}

impl AppState {
    pub fn new(
        gate: InferenceGate,
        max_concurrent_inferences: usize,
        health_registry: HealthRegistry,
        metrics: DetectorMetrics,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            gate: Arc::new(gate),
            inference_slots: Arc::new(Semaphore::new(max_concurrent_inferences.max(1))),
            health_registry,
            metrics,
            logger,
        }
    }
}

/// Load the configured generation and register its components
///
/// Any artifact failure is returned as an error; the caller must not serve.
pub async fn initialize(
    config: &DetectorConfig,
    health_registry: HealthRegistry,
    metrics: DetectorMetrics,
    logger: StructuredLogger,
) -> Result<Arc<AppState>> {
    let dir = config.artifact_dir.clone();
    let policy = config.expected_label_policy;
    let artifacts = tokio::task::spawn_blocking(move || load_generation(&dir, policy))
        .await
        .context("Artifact loading task panicked")?
        .with_context(|| {
            format!(
                "Failed to load model generation from {}",
                config.artifact_dir.display()
            )
        })?;

    let manifest = artifacts.manifest.clone();
    let thresholds_source = artifacts.thresholds_source;
    let gate = InferenceGate::from_artifacts(artifacts)
        .context("Model generation artifacts are inconsistent")?;

    health_registry.register(components::ARTIFACTS).await;
    health_registry.register(components::CLASSIFIER).await;
    match thresholds_source {
        ThresholdsSource::Loaded => health_registry.register(components::THRESHOLDS).await,
        ThresholdsSource::Default => {
            health_registry
                .set_degraded(
                    components::THRESHOLDS,
                    "thresholds file missing, serving defaults",
                )
                .await;
            logger.log_threshold_fallback(
                &manifest.generation_id,
                gate.thresholds().decision_threshold(),
            );
        }
    }
    health_registry.set_generation(&manifest.generation_id).await;

    metrics.set_generation(
        &manifest.generation_id,
        &manifest.classifier.to_string(),
        manifest.label_policy.as_str(),
        match thresholds_source {
            ThresholdsSource::Loaded => "loaded",
            ThresholdsSource::Default => "default",
        },
    );
    logger.log_generation_loaded(
        &manifest.generation_id,
        manifest.seq_len,
        &manifest.feature_names,
        manifest.label_policy.as_str(),
        &manifest.classifier.to_string(),
    );

    Ok(Arc::new(AppState::new(
        gate,
        config.max_concurrent_inferences,
        health_registry,
        metrics,
        logger,
    )))
}

/// Score one window; shape errors are answered with 200 and an `error` field
async fn predict_window(
    State(state): State<Arc<AppState>>,
    Json(request): Json<WindowRequest>,
) -> Response {
    let permit = match state.inference_slots.clone().acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => return error_response(StatusCode::SERVICE_UNAVAILABLE, "shutting down"),
    };

    let gate = state.gate.clone();
    let start = Instant::now();
    let result = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        gate.respond(&request.window)
    })
    .await;
    let elapsed = start.elapsed();
    let generation = state.gate.generation_id();

    match result {
        Ok(Ok(GateResponse::Assessment(assessment))) => {
            state.metrics.observe_inference_latency(elapsed.as_secs_f64());
            state.metrics.record_assessment(&assessment);
            state
                .logger
                .log_prediction(generation, &assessment, elapsed.as_secs_f64() * 1000.0);
            (StatusCode::OK, Json(GateResponse::Assessment(assessment))).into_response()
        }
        Ok(Ok(GateResponse::Rejected { error })) => {
            state.metrics.inc_shape_errors();
            state.logger.log_shape_rejected(generation, &error);
            (StatusCode::OK, Json(GateResponse::Rejected { error })).into_response()
        }
        Ok(Err(e)) => {
            state.metrics.inc_inference_errors();
            error!(generation = %generation, error = %e, "Inference failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
        Err(e) => {
            state.metrics.inc_inference_errors();
            error!(generation = %generation, error = %e, "Inference task failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "inference task failed")
        }
    }
}

/// 200 while healthy or degraded, 503 when a component is unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/predict-window", post(predict_window))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve until `shutdown` resolves
pub async fn serve<F>(port: u16, state: Arc<AppState>, shutdown: F) -> Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
