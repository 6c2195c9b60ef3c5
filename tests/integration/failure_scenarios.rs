//! Failure and chaos tests for the collection pipeline
//!
//! These tests verify that collection degrades gracefully:
//! - Unreachable services
//! - HTTP errors
//! - Malformed data
//! - Repeated failures tripping the breaker

use std::sync::Arc;
use std::time::Duration;

use vigilia::registry::{MemoryRegistry, Service, ServiceId};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

#[tokio::test]
async fn unreachable_service_collects_nothing() {
    // nothing listens on port 9
    let registry = Arc::new(MemoryRegistry::new());
    let service = registry
        .register(Service::new("svc-a", "service a", "http://127.0.0.1:9"))
        .await;

    let scheduler = health_scheduler(
        registry,
        fast_collection_config(fast_health_config()),
    );
    scheduler.tick().await;

    assert!(service.artifact("health").await.is_none());
}

#[tokio::test]
async fn http_500_collects_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/actuator/health"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let registry = Arc::new(MemoryRegistry::new());
    let service = registry
        .register(Service::new("svc-a", "service a", server.uri()))
        .await;

    let scheduler = health_scheduler(
        registry,
        fast_collection_config(fast_health_config()),
    );
    scheduler.tick().await;

    assert!(service.artifact("health").await.is_none());
}

#[tokio::test]
async fn malformed_body_collects_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/actuator/health"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{invalid json"))
        .mount(&server)
        .await;

    let registry = Arc::new(MemoryRegistry::new());
    let service = registry
        .register(Service::new("svc-a", "service a", server.uri()))
        .await;

    let scheduler = health_scheduler(
        registry,
        fast_collection_config(fast_health_config()),
    );
    scheduler.tick().await;

    assert!(service.artifact("health").await.is_none());
}

#[tokio::test]
async fn repeated_failures_trip_the_breaker() {
    let registry = Arc::new(MemoryRegistry::new());
    registry
        .register(Service::new("svc-a", "service a", "http://127.0.0.1:9"))
        .await;

    let health = fast_health_config();
    let scheduler = health_scheduler(
        registry,
        fast_collection_config(health.clone()),
    );
    let id = ServiceId::from("svc-a");

    // connection refusals count against the timeout threshold (2 here), so
    // two failing passes open the probe breaker
    for _ in 0..2 {
        scheduler.tick().await;
        tokio::time::sleep(Duration::from_millis(60)).await;
    }

    assert!(
        !scheduler.state().is_probe_eligible(&id, "health", &health),
        "probe should be rejected while the breaker is open"
    );
    // the service-level breaker has a higher threshold and is still closed
    assert!(scheduler.state().is_service_eligible(&id));
}

#[tokio::test]
async fn broken_service_does_not_affect_healthy_one() {
    let healthy = mock_health_server("UP").await;

    let registry = Arc::new(MemoryRegistry::new());
    let good = registry
        .register(Service::new("svc-good", "good", healthy.uri()))
        .await;
    let bad = registry
        .register(Service::new("svc-bad", "bad", "http://127.0.0.1:9"))
        .await;

    let scheduler = health_scheduler(
        registry,
        fast_collection_config(fast_health_config()),
    );
    scheduler.tick().await;

    assert!(good.artifact("health").await.is_some());
    assert!(bad.artifact("health").await.is_none());
}

#[tokio::test]
async fn deregistered_service_is_pruned() {
    let server = mock_health_server("UP").await;

    let registry = Arc::new(MemoryRegistry::new());
    registry
        .register(Service::new("svc-a", "service a", server.uri()))
        .await;
    registry
        .register(Service::new("svc-b", "service b", server.uri()))
        .await;

    let scheduler = health_scheduler(
        registry.clone(),
        fast_collection_config(fast_health_config()),
    );
    scheduler.tick().await;
    assert_eq!(scheduler.state().tracked_services(), 2);

    registry.deregister(&ServiceId::from("svc-b")).await;
    tokio::time::sleep(Duration::from_millis(60)).await;
    scheduler.tick().await;

    assert_eq!(scheduler.state().tracked_services(), 1);
}
