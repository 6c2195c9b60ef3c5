//! End-to-end tests for the scheduler against mock health endpoints

use std::sync::Arc;

use vigilia::collector::SchedulerHandle;
use vigilia::registry::{MemoryRegistry, Service, ServiceId};

use crate::helpers::*;

#[tokio::test]
async fn tick_collects_health_from_all_services() {
    let server_a = mock_health_server("UP").await;
    let server_b = mock_health_server("UP").await;

    let registry = Arc::new(MemoryRegistry::new());
    let a = registry
        .register(Service::new("svc-a", "service a", server_a.uri()))
        .await;
    let b = registry
        .register(Service::new("svc-b", "service b", server_b.uri()))
        .await;

    let scheduler = health_scheduler(
        registry,
        fast_collection_config(fast_health_config()),
    );
    let handle = SchedulerHandle::spawn(scheduler);

    handle.tick_now().await.unwrap();

    assert!(a.artifact("health").await.is_some());
    assert!(b.artifact("health").await.is_some());

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn collect_now_targets_a_single_service() {
    let server_a = mock_health_server("UP").await;
    let server_b = mock_health_server("UP").await;

    let registry = Arc::new(MemoryRegistry::new());
    let a = registry
        .register(Service::new("svc-a", "service a", server_a.uri()))
        .await;
    let b = registry
        .register(Service::new("svc-b", "service b", server_b.uri()))
        .await;

    let scheduler = health_scheduler(
        registry,
        fast_collection_config(fast_health_config()),
    );
    let handle = SchedulerHandle::spawn(scheduler);

    handle
        .collect_now(ServiceId::from("svc-a"), None)
        .await
        .unwrap();

    assert!(a.artifact("health").await.is_some());
    assert!(b.artifact("health").await.is_none());

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn collect_now_for_unknown_service_errors() {
    let registry = Arc::new(MemoryRegistry::new());
    let scheduler = health_scheduler(
        registry,
        fast_collection_config(fast_health_config()),
    );
    let handle = SchedulerHandle::spawn(scheduler);

    let result = handle.collect_now(ServiceId::from("nope"), None).await;
    assert!(result.is_err(), "unknown service should be rejected");

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn commands_fail_after_shutdown() {
    let registry = Arc::new(MemoryRegistry::new());
    let scheduler = health_scheduler(
        registry,
        fast_collection_config(fast_health_config()),
    );
    let handle = SchedulerHandle::spawn(scheduler);

    handle.shutdown().await.unwrap();

    // give the run loop a moment to stop and drop the receiver
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

    let result = handle.tick_now().await;
    assert!(result.is_err(), "commands should fail once shut down");
}

#[tokio::test]
async fn repeated_ticks_refresh_the_artifact() {
    let server = mock_health_server("UP").await;

    let registry = Arc::new(MemoryRegistry::new());
    let service = registry
        .register(Service::new("svc-a", "service a", server.uri()))
        .await;

    let scheduler = health_scheduler(
        registry,
        fast_collection_config(fast_health_config()),
    );
    let handle = SchedulerHandle::spawn(scheduler);

    handle.tick_now().await.unwrap();
    let first = service.artifact("health").await.unwrap();

    // past the check interval so the probe is eligible again
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    handle.tick_now().await.unwrap();
    let second = service.artifact("health").await.unwrap();

    assert!(second.collected_at > first.collected_at);

    handle.shutdown().await.unwrap();
}
