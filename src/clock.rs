//! Injectable monotonic time source
//!
//! All scheduling arithmetic (breaker back-off, retry delays, scope deadlines)
//! goes through a [`Clock`] so tests can control time without sleeping.
//! [`SystemClock`] reads `tokio::time::Instant::now()`, which also follows the
//! paused tokio test clock in `#[tokio::test(start_paused = true)]` tests.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Monotonic time source used by the collection core.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> Instant;
}

/// Default clock backed by `tokio::time::Instant`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to. Intended for unit tests of the
/// breaker and state manager, where real sleeping would be both slow and racy.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    /// Move the clock forward by `delta`.
    pub fn advance(&self, delta: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += delta;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap()
    }
}
