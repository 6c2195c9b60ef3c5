pub mod clock;
pub mod collector;
pub mod config;
pub mod probe;
pub mod probes;
pub mod registry;
