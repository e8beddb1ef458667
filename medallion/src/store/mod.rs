//! Durable storage interfaces: checkpoints and tables.

pub mod checkpoint;
pub mod table;
