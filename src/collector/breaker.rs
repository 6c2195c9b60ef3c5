//! Three-state circuit breaker
//!
//! Prevents repeated calls to a misbehaving downstream by cycling through
//! Closed → Open → HalfOpen. When tripped (Open), the next attempt is
//! scheduled with exponential back-off (`base_delay · 2^n`) capped at
//! `max_delay`, with wide jitter (±50%) to avoid a thundering herd against a
//! recovering target.
//!
//! Safe for concurrent callers on a single instance: the status is one atomic
//! word, counters are atomics, and only the `next_attempt` instant sits
//! behind a mutex.

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::clock::Clock;
use crate::config::BreakerConfig;
use crate::collector::error::Outcome;

/// Admission state of a [`CircuitBreaker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BreakerStatus {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl BreakerStatus {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => BreakerStatus::Open,
            2 => BreakerStatus::HalfOpen,
            _ => BreakerStatus::Closed,
        }
    }
}

/// A thread-safe circuit breaker.
///
/// `try_acquire` may race with outcome recording; an admitted call will have
/// its outcome correctly accounted as long as the outcome is recorded after
/// the call returns.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
    status: AtomicU8,
    failures: AtomicU32,
    timeouts: AtomicU32,
    half_open_successes: AtomicU32,
    next_attempt: Mutex<Option<Instant>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, clock: Arc<dyn Clock>, config: BreakerConfig) -> Self {
        let name = name.into();
        trace!(
            breaker = %name,
            base_delay_ms = config.base_delay_ms,
            max_delay_ms = config.max_delay_ms,
            max_backoff_exponent = config.max_backoff_exponent,
            failure_threshold = config.failure_threshold,
            timeout_threshold = config.timeout_threshold,
            half_open_success_threshold = config.half_open_success_threshold,
            "breaker initialized"
        );

        Self {
            name,
            config,
            clock,
            status: AtomicU8::new(BreakerStatus::Closed as u8),
            failures: AtomicU32::new(0),
            timeouts: AtomicU32::new(0),
            half_open_successes: AtomicU32::new(0),
            next_attempt: Mutex::new(None),
        }
    }

    /// Whether a call is permitted right now.
    ///
    /// In Open, the first caller past `next_attempt` flips the breaker to
    /// HalfOpen and is admitted; everyone else keeps being rejected until the
    /// back-off elapses.
    pub fn try_acquire(&self) -> bool {
        let admitted = match self.status() {
            BreakerStatus::Closed => true,
            BreakerStatus::HalfOpen => true,
            BreakerStatus::Open => {
                let past_backoff = self
                    .next_attempt()
                    .is_none_or(|next| self.clock.now() > next);

                past_backoff
                    && self
                        .status
                        .compare_exchange(
                            BreakerStatus::Open as u8,
                            BreakerStatus::HalfOpen as u8,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
            }
        };

        trace!(breaker = %self.name, admitted, status = ?self.status(), "try_acquire");
        admitted
    }

    /// Record a successful call.
    pub fn on_success(&self) {
        match self.status() {
            BreakerStatus::HalfOpen => {
                let successes = self.half_open_successes.fetch_add(1, Ordering::AcqRel) + 1;
                trace!(
                    breaker = %self.name,
                    successes,
                    threshold = self.config.half_open_success_threshold,
                    "half-open success"
                );
                if successes >= self.config.half_open_success_threshold {
                    self.close();
                }
            }
            BreakerStatus::Closed => self.close(),
            BreakerStatus::Open => {}
        }
    }

    /// Record a hard (non-timeout) failure.
    pub fn on_failure(&self) {
        if self.status() == BreakerStatus::HalfOpen {
            trace!(breaker = %self.name, "failure in half-open, re-opening");
            self.open();
            return;
        }

        let failures = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
        trace!(breaker = %self.name, failures, threshold = self.config.failure_threshold, "failure");
        if failures >= self.config.failure_threshold {
            self.open();
        }
    }

    /// Record a timeout.
    pub fn on_timeout(&self) {
        if self.status() == BreakerStatus::HalfOpen {
            trace!(breaker = %self.name, "timeout in half-open, re-opening");
            self.open();
            return;
        }

        let timeouts = self.timeouts.fetch_add(1, Ordering::AcqRel) + 1;
        trace!(breaker = %self.name, timeouts, threshold = self.config.timeout_threshold, "timeout");
        if timeouts >= self.config.timeout_threshold {
            self.open();
        }
    }

    /// Record a classified outcome.
    pub fn on_outcome(&self, outcome: Outcome) {
        match outcome {
            Outcome::Success => self.on_success(),
            Outcome::Timeout => self.on_timeout(),
            Outcome::Failure { .. } => self.on_failure(),
            Outcome::Cancelled | Outcome::Ignored => {
                trace!(breaker = %self.name, ?outcome, "outcome not recorded");
            }
        }
    }

    pub fn status(&self) -> BreakerStatus {
        BreakerStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// The instant the next call may be admitted. Only meaningful in Open.
    pub fn next_attempt(&self) -> Option<Instant> {
        *self.next_attempt.lock().unwrap()
    }

    /// Trip to Open: compute the back-off delay, then reset all counters.
    fn open(&self) {
        self.status.store(BreakerStatus::Open as u8, Ordering::Release);

        let count = self.failures.load(Ordering::Acquire) + self.timeouts.load(Ordering::Acquire);
        let exp = count.min(self.config.max_backoff_exponent);
        let raw_ms = self
            .config
            .base_delay_ms
            .saturating_mul(1u64.checked_shl(exp).unwrap_or(u64::MAX));
        let factor: f64 = rand::thread_rng().gen_range(0.5..1.5);
        let delay_ms = ((raw_ms as f64 * factor) as u64).min(self.config.max_delay_ms);
        let delay = Duration::from_millis(delay_ms);

        *self.next_attempt.lock().unwrap() = Some(self.clock.now() + delay);

        debug!(
            breaker = %self.name,
            exp,
            raw_ms,
            jitter_factor = format!("{factor:.2}"),
            delay_ms,
            "breaker opened"
        );

        self.failures.store(0, Ordering::Release);
        self.timeouts.store(0, Ordering::Release);
        self.half_open_successes.store(0, Ordering::Release);
    }

    /// Reset to Closed and clear all counters.
    fn close(&self) {
        self.status.store(BreakerStatus::Closed as u8, Ordering::Release);
        self.failures.store(0, Ordering::Release);
        self.timeouts.store(0, Ordering::Release);
        self.half_open_successes.store(0, Ordering::Release);
        trace!(breaker = %self.name, "breaker closed, counters reset");
    }

    #[cfg(test)]
    fn counters(&self) -> (u32, u32, u32) {
        (
            self.failures.load(Ordering::Acquire),
            self.timeouts.load(Ordering::Acquire),
            self.half_open_successes.load(Ordering::Acquire),
        )
    }
}
