//! Configuration types and loading for medallion pipelines.
//!
//! Shared configuration structures live in [`shared`], while [`load_config`]
//! implements hierarchical loading from files and environment variables.

mod environment;
mod load;
pub mod shared;

pub use environment::Environment;
pub use load::{Config, LoadConfigError, load_config};
