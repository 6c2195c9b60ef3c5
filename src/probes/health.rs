//! Health probe
//!
//! Fetches the health endpoint of a service and stores the reported status
//! (plus any per-component breakdown) as a `"health"` artifact on the
//! service. A service that reports `DOWN` still collects successfully; the
//! probe only fails when the endpoint itself is unreachable or returns
//! garbage.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::collector::error::CollectError;
use crate::config::ProbeConfig;
use crate::probe::Probe;
use crate::registry::Service;

/// Service attribute overriding the default health endpoint path.
pub const HEALTH_PATH_ATTRIBUTE: &str = "health_path";

const DEFAULT_HEALTH_PATH: &str = "/actuator/health";

/// Health status as reported by the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,

    #[serde(default)]
    pub components: HashMap<String, serde_json::Value>,
}

impl HealthReport {
    pub fn is_up(&self) -> bool {
        self.status.eq_ignore_ascii_case("UP")
    }
}

pub struct HealthProbe {
    config: ProbeConfig,
    client: reqwest::Client,
}

impl HealthProbe {
    pub fn new(config: ProbeConfig) -> anyhow::Result<Self> {
        // Connect timeout only; the overall budget is enforced by the
        // collection deadline around the probe.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build HTTP client for health probe")?;

        Ok(Self { config, client })
    }

    fn url_for(&self, service: &Service) -> String {
        let path = service
            .attribute(HEALTH_PATH_ATTRIBUTE)
            .unwrap_or(DEFAULT_HEALTH_PATH);
        format!("{}{}", service.base_url().trim_end_matches('/'), path)
    }
}

#[async_trait]
impl Probe for HealthProbe {
    fn name(&self) -> &str {
        "health"
    }

    fn properties(&self) -> &ProbeConfig {
        &self.config
    }

    #[instrument(skip_all, fields(service = %service.id()))]
    async fn collect(&self, service: Arc<Service>) -> Result<(), CollectError> {
        let url = self.url_for(&service);
        debug!(url, "checking health");

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await?
            .error_for_status()?;

        let report = response.json::<HealthReport>().await?;
        debug!(status = report.status, "health check returned");

        let value = serde_json::to_value(&report)
            .map_err(|e| CollectError::Decode(e.to_string()))?;
        service.attach_artifact("health", value).await;

        Ok(())
    }
}
