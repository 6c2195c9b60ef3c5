//! Structured task group with a deadline
//!
//! A [`Scope`] tracks the tasks forked into it and joins them with a
//! deadline. When the deadline fires, every unfinished child is aborted and
//! then drained, so no descendant outlives its scope's join. Dropping a scope
//! aborts its children too, which is what propagates cancellation down the
//! fleet → service → probe pyramid: aborting a service task drops its probe
//! scope, which aborts the in-flight probe futures.
//!
//! Child panics are contained here: they are logged and counted, never
//! propagated to the parent.

use std::future::Future;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{trace, warn};

/// The scope's deadline fired before all children finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeTimedOut;

impl std::fmt::Display for ScopeTimedOut {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "scope deadline fired before all tasks finished")
    }
}

impl std::error::Error for ScopeTimedOut {}

/// Results of joining a scope.
#[derive(Debug, PartialEq)]
pub struct Joined<T> {
    /// Outputs of children that ran to completion, in completion order.
    pub completed: Vec<T>,

    /// Number of children that panicked.
    pub panicked: usize,
}

/// A named group of child tasks joined together.
pub struct Scope<T = ()> {
    name: String,
    tasks: JoinSet<T>,
}

impl<T: Send + 'static> Scope<T> {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tasks: JoinSet::new(),
        }
    }

    /// Fork a child task into this scope. Forking never blocks.
    pub fn fork<F>(&mut self, task: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        self.tasks.spawn(task);
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Abort all children. They still have to be drained by a join call.
    pub fn cancel(&mut self) {
        trace!(scope = %self.name, "cancelling scope");
        self.tasks.abort_all();
    }

    /// Wait for all children without a deadline.
    pub async fn join(&mut self) -> Joined<T> {
        let mut joined = Joined {
            completed: Vec::new(),
            panicked: 0,
        };
        self.drain(&mut joined).await;
        joined
    }

    /// Wait for all children until `deadline`.
    ///
    /// On deadline, unfinished children are aborted and awaited before this
    /// returns, so the caller knows the whole subtree has stopped.
    pub async fn join_until(&mut self, deadline: Instant) -> Result<Joined<T>, ScopeTimedOut> {
        let mut joined = Joined {
            completed: Vec::new(),
            panicked: 0,
        };

        match tokio::time::timeout_at(deadline, self.drain(&mut joined)).await {
            Ok(()) => Ok(joined),
            Err(_elapsed) => {
                trace!(scope = %self.name, pending = self.tasks.len(), "scope deadline fired");
                self.tasks.abort_all();
                self.drain(&mut joined).await;
                Err(ScopeTimedOut)
            }
        }
    }

    async fn drain(&mut self, joined: &mut Joined<T>) {
        while let Some(result) = self.tasks.join_next().await {
            match result {
                Ok(value) => joined.completed.push(value),
                Err(err) if err.is_panic() => {
                    warn!(scope = %self.name, "child task panicked: {err}");
                    joined.panicked += 1;
                }
                // aborted children are expected during cancellation
                Err(_) => {}
            }
        }
    }
}
