//! Global concurrency limiter
//!
//! A counting permit pool bounding simultaneous in-flight probe invocations
//! across the whole process. Acquiring blocks until a permit frees up or the
//! deadline fires; a deadline on acquire is not an error for the caller, it
//! means "skip this tick". Permits are owned, so they release on every exit
//! path including task abort.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::trace;

/// Cheaply cloneable handle to the process-wide permit pool.
#[derive(Clone)]
pub struct Limiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl Limiter {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Acquire one permit, waiting until `deadline` at most.
    ///
    /// Returns `None` if the deadline fires first (or the pool was closed);
    /// the caller is expected to skip its work silently.
    pub async fn acquire(&self, deadline: Instant) -> Option<OwnedSemaphorePermit> {
        match tokio::time::timeout_at(deadline, self.semaphore.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Some(permit),
            Ok(Err(_closed)) => None,
            Err(_elapsed) => {
                trace!("permit acquire timed out, skipping");
                None
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits currently free. Mostly useful for tests and introspection.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

impl std::fmt::Debug for Limiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Limiter")
            .field("capacity", &self.capacity)
            .field("available", &self.available())
            .finish()
    }
}
