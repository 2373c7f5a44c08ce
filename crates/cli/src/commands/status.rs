//! Health of a running detector

use crate::client::ApiClient;
use crate::output::{color_status, print_json, print_table, print_warning, OutputFormat};
use anyhow::Result;
use chrono::{TimeZone, Utc};
use detector_lib::ComponentStatus;
use serde_json::json;
use tabled::Tabled;

#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
    #[tabled(rename = "Checked")]
    checked: String,
}

fn status_str(status: ComponentStatus) -> &'static str {
    match status {
        ComponentStatus::Healthy => "healthy",
        ComponentStatus::Degraded => "degraded",
        ComponentStatus::Unhealthy => "unhealthy",
    }
}

pub async fn status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let health = client.health().await?;
    let readiness = client.readiness().await?;

    match format {
        OutputFormat::Json => print_json(&json!({ "health": health, "readiness": readiness }))?,
        OutputFormat::Table => {
            println!(
                "Detector: {}  ready: {}  generation: {}",
                color_status(status_str(health.status)),
                color_status(if readiness.ready { "ready" } else { "not ready" }),
                health.generation.as_deref().unwrap_or("-")
            );
            let rows: Vec<ComponentRow> = health
                .components
                .iter()
                .map(|(name, c)| ComponentRow {
                    name: name.clone(),
                    status: color_status(status_str(c.status)),
                    message: c.message.clone().unwrap_or_default(),
                    checked: Utc
                        .timestamp_opt(c.last_check_timestamp, 0)
                        .single()
                        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_default(),
                })
                .collect();
            print_table(&rows);
            if let Some(reason) = readiness.reason {
                print_warning(&reason);
            }
        }
    }
    Ok(())
}
