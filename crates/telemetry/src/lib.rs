//! Structured logging for the Beacon ETL engine.

pub mod tracing_setup;

pub use tracing_setup::{init_tracing, init_tracing_from_env, TracingConfig};
