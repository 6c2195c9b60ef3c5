//! Concurrency tests for the collection pipeline

use std::sync::Arc;
use std::time::Duration;

use vigilia::collector::SchedulerHandle;
use vigilia::config::CollectionConfig;
use vigilia::registry::{MemoryRegistry, Service, ServiceId};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

async fn slow_health_server(delay: Duration) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/actuator/health"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "status": "UP" }))
                .set_delay(delay),
        )
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn limiter_serializes_requests_when_saturated() {
    let server = slow_health_server(Duration::from_millis(100)).await;

    let registry = Arc::new(MemoryRegistry::new());
    let mut services = vec![];
    for i in 0..6 {
        services.push(
            registry
                .register(Service::new(
                    format!("svc-{i}"),
                    format!("service {i}"),
                    server.uri(),
                ))
                .await,
        );
    }

    let config = CollectionConfig {
        max_concurrent_requests: 2,
        ..fast_collection_config(fast_health_config())
    };
    let scheduler = health_scheduler(registry, config);

    let started = tokio::time::Instant::now();
    scheduler.tick().await;
    let elapsed = started.elapsed();

    // 6 requests of ~100ms each through 2 permits take at least 3 rounds
    assert!(
        elapsed >= Duration::from_millis(250),
        "tick finished too quickly for a saturated limiter: {elapsed:?}"
    );
    for service in &services {
        assert!(service.artifact("health").await.is_some());
    }
}

#[tokio::test]
async fn wide_limiter_runs_services_in_parallel() {
    let server = slow_health_server(Duration::from_millis(100)).await;

    let registry = Arc::new(MemoryRegistry::new());
    for i in 0..6 {
        registry
            .register(Service::new(
                format!("svc-{i}"),
                format!("service {i}"),
                server.uri(),
            ))
            .await;
    }

    let scheduler = health_scheduler(
        registry,
        fast_collection_config(fast_health_config()),
    );

    let started = tokio::time::Instant::now();
    scheduler.tick().await;
    let elapsed = started.elapsed();

    // with the default 250 permits all 6 requests overlap
    assert!(
        elapsed < Duration::from_millis(600),
        "tick took too long for an uncontended limiter: {elapsed:?}"
    );
}

#[tokio::test]
async fn concurrent_on_demand_collections_all_complete() {
    let server = slow_health_server(Duration::from_millis(50)).await;

    let registry = Arc::new(MemoryRegistry::new());
    let mut services = vec![];
    for i in 0..4 {
        services.push(
            registry
                .register(Service::new(
                    format!("svc-{i}"),
                    format!("service {i}"),
                    server.uri(),
                ))
                .await,
        );
    }

    let scheduler = health_scheduler(
        registry,
        fast_collection_config(fast_health_config()),
    );
    let handle = SchedulerHandle::spawn(scheduler);

    for i in 0..4 {
        handle
            .collect_now(ServiceId::new(format!("svc-{i}")), None)
            .await
            .unwrap();
    }

    for service in &services {
        assert!(service.artifact("health").await.is_some());
    }

    handle.shutdown().await.unwrap();
}
