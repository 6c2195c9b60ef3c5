//! Per-service and per-probe collection state
//!
//! The [`StateManager`] owns the process-wide map from service id to
//! [`ServiceState`]. A service state holds the service-level breaker plus one
//! [`CollectorState`] per probe; a collector state holds its own breaker and
//! the retry schedule. Both levels are created lazily on first lookup and
//! destroyed when pruning no longer sees the service id in the registry
//! snapshot.
//!
//! Every probe outcome is recorded at both levels: a tripped service breaker
//! rejects all probes of that service until the breaker closes again.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::clock::Clock;
use crate::collector::breaker::CircuitBreaker;
use crate::collector::error::CollectError;
use crate::config::{BreakerConfig, ProbeConfig};
use crate::registry::ServiceId;

/// Owns all per-service collection state.
pub struct StateManager {
    clock: Arc<dyn Clock>,
    /// Breaker settings for the service-level breakers.
    service_breaker: BreakerConfig,
    states: Mutex<HashMap<ServiceId, Arc<ServiceState>>>,
}

impl StateManager {
    pub fn new(clock: Arc<dyn Clock>, service_breaker: BreakerConfig) -> Self {
        Self {
            clock,
            service_breaker,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Whether the service-level breaker admits a collection pass right now.
    pub fn is_service_eligible(&self, id: &ServiceId) -> bool {
        self.service_state(id).is_service_eligible()
    }

    /// Whether a specific probe may run: the service breaker admits AND the
    /// collector is past its scheduled next attempt AND its own breaker
    /// admits.
    pub fn is_probe_eligible(&self, id: &ServiceId, probe: &str, config: &ProbeConfig) -> bool {
        self.service_state(id).is_probe_eligible(probe, config)
    }

    pub fn on_success(&self, id: &ServiceId, probe: &str, config: &ProbeConfig) {
        self.service_state(id).on_success(probe, config);
    }

    pub fn on_failure(&self, id: &ServiceId, probe: &str, config: &ProbeConfig, err: &CollectError) {
        error!(service = %id, probe, %err, retriable = err.is_retriable(), "probe failed");
        self.service_state(id).on_failure(probe, config, err);
    }

    pub fn on_timeout(&self, id: &ServiceId, probe: &str, config: &ProbeConfig) {
        warn!(service = %id, probe, "probe timed out");
        self.service_state(id).on_timeout(probe, config);
    }

    /// Record a timeout at the service level only (the whole service scope
    /// missed its deadline; individual probes were cancelled and record
    /// nothing).
    pub fn on_service_timeout(&self, id: &ServiceId) {
        warn!(service = %id, "service collection pass timed out");
        self.service_state(id).breaker.on_timeout();
    }

    /// Atomically drop state for every service id not in `live`. Idempotent.
    pub fn prune_inactive(&self, live: &HashSet<ServiceId>) {
        let mut states = self.states.lock().unwrap();
        let before = states.len();
        states.retain(|id, _| live.contains(id));
        let pruned = before - states.len();
        if pruned > 0 {
            debug!(pruned, remaining = states.len(), "pruned inactive service state");
        }
    }

    /// Number of services with live state. Mostly for tests.
    pub fn tracked_services(&self) -> usize {
        self.states.lock().unwrap().len()
    }

    pub(crate) fn service_state(&self, id: &ServiceId) -> Arc<ServiceState> {
        let mut states = self.states.lock().unwrap();
        states
            .entry(id.clone())
            .or_insert_with(|| {
                Arc::new(ServiceState::new(
                    self.clock.clone(),
                    id.clone(),
                    self.service_breaker.clone(),
                ))
            })
            .clone()
    }
}

/// Per-service container: the service-level breaker plus one collector state
/// per probe.
pub struct ServiceState {
    clock: Arc<dyn Clock>,
    id: ServiceId,
    breaker: CircuitBreaker,
    collectors: Mutex<HashMap<String, Arc<CollectorState>>>,
}

impl ServiceState {
    fn new(clock: Arc<dyn Clock>, id: ServiceId, breaker_config: BreakerConfig) -> Self {
        let breaker = CircuitBreaker::new(format!("svc/{id}"), clock.clone(), breaker_config);
        Self {
            clock,
            id,
            breaker,
            collectors: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_service_eligible(&self) -> bool {
        self.breaker.try_acquire()
    }

    pub fn is_probe_eligible(&self, probe: &str, config: &ProbeConfig) -> bool {
        if !self.is_service_eligible() {
            return false;
        }
        self.collector_state(probe, config).is_eligible()
    }

    pub fn on_success(&self, probe: &str, config: &ProbeConfig) {
        self.breaker.on_success();
        self.collector_state(probe, config).on_success();
    }

    pub fn on_failure(&self, probe: &str, config: &ProbeConfig, err: &CollectError) {
        self.breaker.on_failure();
        self.collector_state(probe, config).on_failure(err);
    }

    pub fn on_timeout(&self, probe: &str, config: &ProbeConfig) {
        self.breaker.on_timeout();
        self.collector_state(probe, config).on_timeout();
    }

    /// The service-level breaker. Exposed for introspection and tests.
    pub fn service_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub(crate) fn collector_state(&self, probe: &str, config: &ProbeConfig) -> Arc<CollectorState> {
        let mut collectors = self.collectors.lock().unwrap();
        collectors
            .entry(probe.to_string())
            .or_insert_with(|| {
                Arc::new(CollectorState::new(
                    self.clock.clone(),
                    format!("svc/{}/col/{probe}", self.id),
                    config.clone(),
                ))
            })
            .clone()
    }
}

/// Per-`(service, probe)` record: its breaker, retry counters and the next
/// eligible instant.
pub struct CollectorState {
    clock: Arc<dyn Clock>,
    key: String,
    config: ProbeConfig,
    breaker: CircuitBreaker,
    schedule: Mutex<Schedule>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Schedule {
    next_attempt: Option<Instant>,
    last_success: Option<Instant>,
    attempts: u32,
    failures: u32,
}

impl CollectorState {
    fn new(clock: Arc<dyn Clock>, key: String, config: ProbeConfig) -> Self {
        let breaker = CircuitBreaker::new(key.clone(), clock.clone(), config.breaker.clone());
        Self {
            clock,
            key,
            config,
            breaker,
            schedule: Mutex::new(Schedule::default()),
        }
    }

    /// Whether this collector may attempt a collection now: its breaker
    /// admits and the scheduled next attempt has passed.
    pub fn is_eligible(&self) -> bool {
        if !self.breaker.try_acquire() {
            return false;
        }

        let schedule = self.schedule.lock().unwrap();
        match schedule.next_attempt {
            None => true,
            Some(next) if self.clock.now() > next => true,
            Some(next) => {
                debug!(
                    collector = %self.key,
                    wait_ms = next.saturating_duration_since(self.clock.now()).as_millis() as u64,
                    "collector not yet eligible"
                );
                false
            }
        }
    }

    pub fn on_success(&self) {
        let now = self.clock.now();
        {
            let mut schedule = self.schedule.lock().unwrap();
            schedule.last_success = Some(now);
            schedule.failures = 0;
        }
        self.breaker.on_success();
        self.schedule_next(false);
    }

    pub fn on_failure(&self, err: &CollectError) {
        {
            let mut schedule = self.schedule.lock().unwrap();
            schedule.failures += 1;
        }
        self.breaker.on_failure();
        self.schedule_next(err.is_retriable());
    }

    pub fn on_timeout(&self) {
        {
            let mut schedule = self.schedule.lock().unwrap();
            schedule.failures += 1;
        }
        self.breaker.on_timeout();
        self.schedule_next(true);
    }

    /// Compute when the next collection attempt may happen.
    ///
    /// Retriable errors get an exponential in-interval retry
    /// (`retry_delay · 2^(attempt-1)` with ±20% jitter, capped at half the
    /// check interval) until the retry budget is spent; everything else waits
    /// for the next check interval. This schedule is separate from the
    /// breaker's back-off: the breaker governs admission, this governs pace.
    fn schedule_next(&self, retriable: bool) {
        let now = self.clock.now();
        let mut schedule = self.schedule.lock().unwrap();

        if retriable && schedule.attempts < self.config.retries {
            schedule.attempts += 1;
            let raw_ms = self
                .config
                .retry_delay_ms
                .saturating_mul(1u64.checked_shl(schedule.attempts - 1).unwrap_or(u64::MAX));
            let jitter: f64 = rand::thread_rng().gen_range(0.8..1.2);
            let cap_ms = self.config.check_interval_ms / 2;
            let delay_ms = ((raw_ms as f64 * jitter) as u64).min(cap_ms);

            schedule.next_attempt = Some(now + Duration::from_millis(delay_ms));
            debug!(
                collector = %self.key,
                attempt = schedule.attempts,
                delay_ms,
                "scheduled in-interval retry"
            );
        } else {
            schedule.next_attempt = Some(now + self.config.check_interval());
            schedule.attempts = 0;
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn next_attempt(&self) -> Option<Instant> {
        self.schedule.lock().unwrap().next_attempt
    }

    pub fn last_success(&self) -> Option<Instant> {
        self.schedule.lock().unwrap().last_success
    }

    pub fn attempts(&self) -> u32 {
        self.schedule.lock().unwrap().attempts
    }

    pub fn failures(&self) -> u32 {
        self.schedule.lock().unwrap().failures
    }
}
