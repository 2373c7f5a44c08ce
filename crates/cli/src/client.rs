//! HTTP client for a running leak detector

use anyhow::{Context, Result};
use detector_lib::health::{HealthResponse, ReadinessResponse};
use detector_lib::serving::{GateResponse, WindowRequest};
use reqwest::Client;
use serde::{de::DeserializeOwned, Serialize};
use url::Url;

pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid detector URL")?;

        Ok(Self { client, base_url })
    }

    /// GET `path`, accepting `allowed` non-2xx statuses as regular bodies
    async fn get_with<T: DeserializeOwned>(&self, path: &str, allowed: &[u16]) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        if !status.is_success() && !allowed.contains(&status.as_u16()) {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }

        response.json().await.context("Failed to parse response")
    }

    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }

        response.json().await.context("Failed to parse response")
    }

    /// Score one window; a shape error comes back as `GateResponse::Rejected`
    pub async fn predict_window(&self, window: Vec<Vec<f64>>) -> Result<GateResponse> {
        self.post("predict-window", &WindowRequest { window }).await
    }

    /// Health report; an unhealthy detector answers 503 with the same body
    pub async fn health(&self) -> Result<HealthResponse> {
        self.get_with("healthz", &[503]).await
    }

    pub async fn readiness(&self) -> Result<ReadinessResponse> {
        self.get_with("readyz", &[503]).await
    }
}
