//! Incremental medallion pipeline engine.
//!
//! Ingests append-only batches of raw records, cleans and validates them, and
//! maintains a Slowly-Changing-Dimension Type 2 history table. The three
//! stages share a checkpoint model that makes every stage resumable and
//! exactly-once with respect to committed offsets.

pub mod error;
mod macros;
pub mod pipeline;
pub mod retry;
pub mod source;
pub mod stages;
pub mod store;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
