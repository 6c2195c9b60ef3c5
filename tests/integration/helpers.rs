//! Helper functions for integration tests

use std::sync::Arc;

use vigilia::clock::SystemClock;
use vigilia::collector::CollectionScheduler;
use vigilia::config::{BreakerConfig, CollectionConfig, ProbeConfig};
use vigilia::probe::Probe;
use vigilia::probes::HealthProbe;
use vigilia::registry::MemoryRegistry;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Health probe settings tightened for test pacing: eligible again after
/// 50ms, no in-interval retries, breaker trips after 2 failures and stays
/// open well past the test duration.
pub fn fast_health_config() -> ProbeConfig {
    ProbeConfig {
        timeout_ms: 1000,
        check_interval_ms: 50,
        retries: 0,
        retry_delay_ms: 10,
        breaker: BreakerConfig {
            failure_threshold: 2,
            timeout_threshold: 2,
            base_delay_ms: 60_000,
            max_delay_ms: 60_000,
            ..BreakerConfig::default()
        },
        ..ProbeConfig::default()
    }
}

pub fn fast_collection_config(health: ProbeConfig) -> CollectionConfig {
    CollectionConfig {
        interval_ms: 60_000,
        timeout_ms: 5_000,
        group_timeout_ms: 2_000,
        probes: [("health".to_string(), health)].into(),
        ..CollectionConfig::default()
    }
}

pub fn health_scheduler(
    registry: Arc<MemoryRegistry>,
    config: CollectionConfig,
) -> CollectionScheduler {
    let probes: Vec<Arc<dyn Probe>> = vec![Arc::new(
        HealthProbe::new(config.probe("health")).expect("failed to build health probe"),
    )];
    CollectionScheduler::new(registry, probes, config, Arc::new(SystemClock))
}

pub async fn mock_health_server(status: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/actuator/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": status,
            "components": {}
        })))
        .mount(&server)
        .await;
    server
}
