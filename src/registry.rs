//! Service model and registry adapter
//!
//! The collection core does not own service registration; it consumes a
//! [`ServiceRegistry`] snapshot on every tick. [`MemoryRegistry`] is the
//! in-process implementation backing the hub binary and the tests.
//!
//! A [`Service`] carries only what probes need: a stable opaque id, a base
//! URL, arbitrary string attributes, and a place to attach collected
//! artifacts keyed by kind.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::ServiceConfig;

/// Stable opaque identifier for a registered service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceId(String);

impl ServiceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for ServiceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// One piece of collected data, stamped with its collection time.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub value: serde_json::Value,
    pub collected_at: DateTime<Utc>,
}

/// A registered service as seen by the probes.
#[derive(Debug)]
pub struct Service {
    id: ServiceId,
    name: String,
    base_url: String,
    attributes: HashMap<String, String>,
    artifacts: RwLock<HashMap<String, Artifact>>,
}

impl Service {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            id: ServiceId::new(id),
            name: name.into(),
            base_url: base_url.into(),
            attributes: HashMap::new(),
            artifacts: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_attributes(mut self, attributes: HashMap<String, String>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn id(&self) -> &ServiceId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Attach collected data under the given kind, replacing any previous
    /// artifact of that kind.
    pub async fn attach_artifact(&self, kind: impl Into<String>, value: serde_json::Value) {
        let kind = kind.into();
        debug!(service = %self.id, %kind, "attaching artifact");

        let mut artifacts = self.artifacts.write().await;
        artifacts.insert(
            kind,
            Artifact {
                value,
                collected_at: Utc::now(),
            },
        );
    }

    /// The most recently attached artifact of the given kind, if any.
    pub async fn artifact(&self, kind: &str) -> Option<Artifact> {
        self.artifacts.read().await.get(kind).cloned()
    }
}

impl From<&ServiceConfig> for Service {
    fn from(config: &ServiceConfig) -> Self {
        Service::new(&config.id, &config.name, &config.base_url)
            .with_attributes(config.attributes.clone())
    }
}

/// Read access to the population of registered services.
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    /// A point-in-time snapshot of all registered services.
    async fn snapshot(&self) -> Vec<Arc<Service>>;
}

/// In-memory registry.
///
/// Services are registered by id; re-registering an id replaces the previous
/// entry. Deregistered services disappear from the next snapshot, which is
/// what drives state pruning in the collection core.
#[derive(Default)]
pub struct MemoryRegistry {
    services: RwLock<HashMap<ServiceId, Arc<Service>>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, service: Service) -> Arc<Service> {
        let service = Arc::new(service);
        let mut services = self.services.write().await;
        debug!(service = %service.id(), "registering service");
        services.insert(service.id().clone(), service.clone());
        service
    }

    pub async fn deregister(&self, id: &ServiceId) -> Option<Arc<Service>> {
        let mut services = self.services.write().await;
        debug!(service = %id, "deregistering service");
        services.remove(id)
    }

    pub async fn get(&self, id: &ServiceId) -> Option<Arc<Service>> {
        self.services.read().await.get(id).cloned()
    }
}

#[async_trait]
impl ServiceRegistry for MemoryRegistry {
    async fn snapshot(&self) -> Vec<Arc<Service>> {
        self.services.read().await.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_and_snapshot() {
        let registry = MemoryRegistry::new();
        registry
            .register(Service::new("a", "service-a", "http://localhost:1"))
            .await;
        registry
            .register(Service::new("b", "service-b", "http://localhost:2"))
            .await;

        let mut ids: Vec<_> = registry
            .snapshot()
            .await
            .iter()
            .map(|s| s.id().to_string())
            .collect();
        ids.sort();

        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn deregister_removes_from_snapshot() {
        let registry = MemoryRegistry::new();
        registry
            .register(Service::new("a", "service-a", "http://localhost:1"))
            .await;

        assert!(registry.deregister(&ServiceId::from("a")).await.is_some());
        assert!(registry.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn reregistering_replaces_entry() {
        let registry = MemoryRegistry::new();
        registry
            .register(Service::new("a", "old", "http://localhost:1"))
            .await;
        registry
            .register(Service::new("a", "new", "http://localhost:2"))
            .await;

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].name(), "new");
    }

    #[tokio::test]
    async fn artifacts_replace_by_kind() {
        let service = Service::new("a", "service-a", "http://localhost:1");

        service
            .attach_artifact("health", serde_json::json!({"status": "UP"}))
            .await;
        service
            .attach_artifact("health", serde_json::json!({"status": "DOWN"}))
            .await;

        let artifact = service.artifact("health").await.unwrap();
        assert_eq!(artifact.value["status"], "DOWN");
        assert!(service.artifact("metrics").await.is_none());
    }
}
