use medallion_config::shared::{BatchConfig, PipelineConfig, RetryConfig, SourceConfig};

use crate::error::PipelineResult;
use crate::pipeline::Pipeline;
use crate::source::memory::MemorySource;
use crate::store::checkpoint::memory::MemoryCheckpointStore;
use crate::store::table::memory::MemoryTableStore;

/// A fully wired in-memory pipeline plus handles to its source and stores.
///
/// The handles share state with the pipeline, so tests can push source
/// records, inject store failures, and inspect tables while the pipeline
/// runs against the same data.
pub struct TestPipeline {
    pub source: MemorySource,
    pub tables: MemoryTableStore,
    pub checkpoints: MemoryCheckpointStore,
    pub pipeline: Pipeline<MemorySource, MemoryTableStore, MemoryCheckpointStore>,
}

/// Builder for in-memory test pipelines.
///
/// Defaults use a short retry schedule so retry paths are exercised without
/// slowing tests down.
pub struct PipelineBuilder {
    pipeline_name: String,
    sources: Vec<SourceConfig>,
    batch: Option<BatchConfig>,
    retry: Option<RetryConfig>,
}

impl PipelineBuilder {
    /// Creates a builder for a pipeline with the given name.
    pub fn new(pipeline_name: &str) -> Self {
        Self {
            pipeline_name: pipeline_name.to_string(),
            sources: Vec::new(),
            batch: None,
            retry: None,
        }
    }

    /// Adds a source to the pipeline, in run order.
    pub fn with_source(mut self, source: SourceConfig) -> Self {
        self.sources.push(source);
        self
    }

    /// Sets a custom batch configuration.
    pub fn with_batch_config(mut self, batch: BatchConfig) -> Self {
        self.batch = Some(batch);
        self
    }

    /// Sets a custom retry configuration.
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Builds the pipeline with fresh in-memory source and stores.
    pub fn build(self) -> PipelineResult<TestPipeline> {
        let config = PipelineConfig {
            pipeline_name: self.pipeline_name,
            sources: self.sources,
            retry: self.retry.unwrap_or(RetryConfig {
                max_attempts: 3,
                base_delay_ms: 1,
                max_delay_ms: 5,
            }),
            batch: self.batch.unwrap_or_default(),
        };

        let source = MemorySource::new();
        let tables = MemoryTableStore::new();
        let checkpoints = MemoryCheckpointStore::new();

        let pipeline = Pipeline::new(
            config,
            source.clone(),
            tables.clone(),
            checkpoints.clone(),
        )?;

        Ok(TestPipeline {
            source,
            tables,
            checkpoints,
            pipeline,
        })
    }
}

/// Creates a single-source in-memory pipeline with default test settings.
pub fn create_pipeline(source: SourceConfig) -> TestPipeline {
    PipelineBuilder::new("test_pipeline")
        .with_source(source)
        .build()
        .unwrap()
}
