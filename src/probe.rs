//! Probe capability consumed by the collection core
//!
//! A probe knows how to query one aspect of a service (health, metrics,
//! loggers, ...). The core never looks at what a probe collects; it only
//! schedules invocations, bounds them and accounts their outcomes.

use std::sync::Arc;

use async_trait::async_trait;

use crate::collector::error::CollectError;
use crate::config::ProbeConfig;
use crate::registry::Service;

#[async_trait]
pub trait Probe: Send + Sync {
    /// Stable identifier for this probe, unique within the process. Keys all
    /// per-`(service, probe)` state.
    fn name(&self) -> &str;

    /// Settings governing this probe's scheduling, timeout and breaker.
    fn properties(&self) -> &ProbeConfig;

    /// Perform one collection against the service, typically attaching an
    /// artifact on success.
    ///
    /// Implementations must be cancellation-safe: the future may be dropped
    /// at any await point when an enclosing scope hits its deadline.
    async fn collect(&self, service: Arc<Service>) -> Result<(), CollectError>;
}
