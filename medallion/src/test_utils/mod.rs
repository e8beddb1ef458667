//! Testing utilities for medallion pipelines.
//!
//! Everything here runs against the in-memory source and stores, so tests are
//! isolated and deterministic without external infrastructure. The module is
//! compiled for this crate's own tests and for downstream crates that enable
//! the `test-utils` feature.
//!
//! - [`pipeline`] - builders for fully wired in-memory pipelines
//! - [`schema`] - source configuration and record builders
//! - [`history`] - SCD2 history invariant assertions

pub mod history;
pub mod pipeline;
pub mod schema;
