//! Leak detector: serves gas-leak assessments for sensor windows

use anyhow::Result;
use detector_lib::{
    health::HealthRegistry,
    observability::{DetectorMetrics, StructuredLogger},
};
use leak_detector::{api, config::DetectorConfig};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DETECTOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting leak-detector");

    let config = DetectorConfig::load()?;
    info!(
        instance = %config.instance_name,
        artifact_dir = %config.artifact_dir.display(),
        max_concurrent_inferences = config.max_concurrent_inferences,
        "Detector configured"
    );

    let health_registry = HealthRegistry::new();
    let metrics = DetectorMetrics::new();
    let logger = StructuredLogger::new(&config.instance_name);

    let state = match api::initialize(
        &config,
        health_registry.clone(),
        metrics.clone(),
        logger.clone(),
    )
    .await
    {
        Ok(state) => state,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Model generation could not be loaded");
            logger.log_shutdown("artifact load failure");
            return Err(e);
        }
    };

    logger.log_startup(
        DETECTOR_VERSION,
        state.gate.generation_id(),
        &format!("0.0.0.0:{}", config.api_port),
    );
    health_registry.set_ready(true).await;

    let shutdown_logger = logger.clone();
    api::serve(config.api_port, state, async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
        }
        shutdown_logger.log_shutdown("SIGINT received");
    })
    .await?;

    info!("Shut down");
    Ok(())
}
