//! Periodic collection of data from registered services.
//!
//! The collector is organized as a small set of cooperating pieces:
//!
//! - [`scheduler::CollectionScheduler`] drives the periodic fan-out over
//!   services and probes,
//! - [`scope::Scope`] gives every fan-out level a structured task group with
//!   a deadline and cancellation,
//! - [`limiter::Limiter`] caps the number of requests in flight at once,
//! - [`state::StateManager`] remembers per-service and per-probe health and
//!   decides who may be collected on a given pass,
//! - [`breaker::CircuitBreaker`] backs those decisions with a two-level
//!   circuit breaker, and
//! - [`error`] classifies what went wrong.
//!
//! [`scheduler::SchedulerHandle`] is the public entry point: it spawns the
//! run loop and exposes tick, on-demand collection and shutdown.

pub mod breaker;
pub mod error;
pub mod limiter;
pub mod scheduler;
pub mod scope;
pub mod state;

pub use error::{CollectError, Outcome};
pub use scheduler::{CollectionScheduler, SchedulerHandle};
