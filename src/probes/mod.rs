//! Built-in probe implementations.

pub mod health;

pub use health::HealthProbe;
