//! The three pipeline stages: ingestion, cleaning, and SCD2 merge.
//!
//! Stages never share in-memory state: each determines its input window from
//! its own checkpoint and commits its write together with the checkpoint
//! advance. Any stage can therefore be re-invoked independently after a
//! failure.

pub mod clean;
pub mod ingest;
pub mod merge;
