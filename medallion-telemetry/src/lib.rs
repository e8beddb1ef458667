//! Telemetry initialization for medallion pipelines.

pub mod tracing;
