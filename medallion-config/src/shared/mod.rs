//! Shared configuration types for medallion pipelines.

mod base;
mod batch;
mod pipeline;
mod retry;
mod schema;

pub use base::ValidationError;
pub use batch::BatchConfig;
pub use pipeline::{EntityConfig, PipelineConfig, ReferenceConfig, SourceConfig};
pub use retry::RetryConfig;
pub use schema::{FieldConfig, FieldType, NullPolicy, SchemaConfig};
