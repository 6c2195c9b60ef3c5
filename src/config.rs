//! Configuration for the collection core
//!
//! Loaded from a JSON file (see [`read_config_file`]). Every knob has a
//! default, so an empty `{"collection": {}}` is a valid configuration. The
//! defaults mirror a conservative production setup: a 7 s tick, a 60 s
//! per-tick deadline and 250 concurrent outbound requests.

use std::collections::HashMap;
use std::time::Duration;

use tracing::trace;

/// Top-level configuration file contents.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub collection: CollectionConfig,

    /// Statically configured services for the hub binary. Deployments with a
    /// registration endpoint feed the registry elsewhere and leave this empty.
    pub services: Option<Vec<ServiceConfig>>,
}

/// A statically configured service definition.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ServiceConfig {
    pub id: String,
    pub name: String,
    pub base_url: String,

    /// Opaque attributes the probes understand (e.g. `health_path`).
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

/// Settings for the periodic collection pass.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct CollectionConfig {
    /// Tick period in milliseconds.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Deadline for one whole tick (fleet scope) in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Deadline for all probes of a single service in milliseconds.
    #[serde(default = "default_group_timeout_ms")]
    pub group_timeout_ms: u64,

    /// Maximum number of in-flight probe invocations across the process.
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,

    /// Settings for the service-level circuit breakers.
    #[serde(default)]
    pub breaker: BreakerConfig,

    /// Per-probe settings, keyed by probe name. Probes not listed here run
    /// with [`ProbeConfig::default`].
    #[serde(default)]
    pub probes: HashMap<String, ProbeConfig>,
}

/// Settings for a single probe.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ProbeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Deadline for one collection attempt in milliseconds.
    #[serde(default = "default_probe_timeout_ms")]
    pub timeout_ms: u64,

    /// Interval between successful (or given-up) collections in milliseconds.
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,

    /// Number of in-interval retries for retriable failures.
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Base delay between retries in milliseconds; doubled per attempt.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default)]
    pub breaker: BreakerConfig,
}

/// Thresholds and back-off parameters for a circuit breaker.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct BreakerConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_max_backoff_exponent")]
    pub max_backoff_exponent: u32,

    /// Hard failures in Closed before the circuit opens.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Consecutive successes in HalfOpen before the circuit closes.
    #[serde(default = "default_half_open_success_threshold")]
    pub half_open_success_threshold: u32,

    /// Timeouts in Closed before the circuit opens.
    #[serde(default = "default_timeout_threshold")]
    pub timeout_threshold: u32,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            timeout_ms: default_timeout_ms(),
            group_timeout_ms: default_group_timeout_ms(),
            max_concurrent_requests: default_max_concurrent_requests(),
            breaker: BreakerConfig::default(),
            probes: HashMap::new(),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            timeout_ms: default_probe_timeout_ms(),
            check_interval_ms: default_check_interval_ms(),
            retries: default_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            breaker: BreakerConfig::default(),
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_backoff_exponent: default_max_backoff_exponent(),
            failure_threshold: default_failure_threshold(),
            half_open_success_threshold: default_half_open_success_threshold(),
            timeout_threshold: default_timeout_threshold(),
        }
    }
}

impl CollectionConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn group_timeout(&self) -> Duration {
        Duration::from_millis(self.group_timeout_ms)
    }

    /// Settings for the named probe, falling back to defaults for probes not
    /// mentioned in the file.
    pub fn probe(&self, name: &str) -> ProbeConfig {
        self.probes.get(name).cloned().unwrap_or_default()
    }

    /// Validate cross-field constraints: every probe timeout must fit within
    /// the service group timeout, which must fit within the tick timeout, and
    /// configured probes must not all be disabled.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.group_timeout_ms > self.timeout_ms {
            anyhow::bail!(
                "collection.group_timeout_ms ({}) must not exceed collection.timeout_ms ({})",
                self.group_timeout_ms,
                self.timeout_ms
            );
        }

        for (name, probe) in &self.probes {
            if probe.timeout_ms > self.group_timeout_ms {
                anyhow::bail!(
                    "collection.probes.{name}.timeout_ms ({}) must not exceed collection.group_timeout_ms ({})",
                    probe.timeout_ms,
                    self.group_timeout_ms
                );
            }
        }

        if !self.probes.is_empty() && self.probes.values().all(|probe| !probe.enabled) {
            anyhow::bail!("at least one probe must be enabled");
        }

        Ok(())
    }
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl BreakerConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

fn default_interval_ms() -> u64 {
    7000
}

fn default_timeout_ms() -> u64 {
    60_000
}

fn default_group_timeout_ms() -> u64 {
    30_000
}

fn default_max_concurrent_requests() -> usize {
    250
}

fn default_true() -> bool {
    true
}

fn default_probe_timeout_ms() -> u64 {
    5000
}

fn default_check_interval_ms() -> u64 {
    10_000
}

fn default_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    5000
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_max_backoff_exponent() -> u32 {
    6
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_half_open_success_threshold() -> u32 {
    3
}

fn default_timeout_threshold() -> u32 {
    3
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))?;
    config.collection.validate()?;
    trace!("loaded config: {config:?}");
    Ok(config)
}
