//! Pipeline coordinator: sequences ingest, clean, and merge per run.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use medallion_config::shared::{PipelineConfig, SourceConfig};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::bail;
use crate::error::{ErrorKind, PipelineResult};
use crate::source::Source;
use crate::stages;
use crate::store::checkpoint::CheckpointStore;
use crate::store::table::TableStore;
use crate::types::{CleanReport, IngestReport, MergeReport};

/// Unique identifier of one pipeline run.
pub type RunId = Uuid;

/// Explicit per-run context handed to every stage call.
///
/// Stages receive configuration, stores, and reference data through this
/// context instead of process-wide globals; the only state shared across
/// stage invocations is what the stores persist.
#[derive(Debug)]
pub struct RunContext<S, T, C> {
    /// Validated pipeline configuration.
    pub config: Arc<PipelineConfig>,
    /// External source records are ingested from.
    pub source: S,
    /// Raw, clean, dead-letter, and history tables.
    pub tables: T,
    /// Durable checkpoints per stage and key.
    pub checkpoints: C,
    /// Reference sets for referential integrity checks, keyed by set name.
    pub reference_sets: BTreeMap<String, BTreeSet<String>>,
}

/// Per-source outcome of one full pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceRunSummary {
    /// Source the stages ran against.
    pub source_id: String,
    pub ingest: IngestReport,
    pub clean: CleanReport,
    pub merge: MergeReport,
}

/// Outcome of one full pipeline run across all configured sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Identifier of this run, present in all of its log events.
    pub run_id: RunId,
    /// Name of the pipeline the run belongs to.
    pub pipeline_name: String,
    /// Per-source stage reports, in configuration order.
    pub sources: Vec<SourceRunSummary>,
}

/// Coordinates the ingest, clean, and merge stages of a medallion pipeline.
///
/// A failure in one stage short-circuits the run: later stages are left
/// untouched while checkpoints already advanced by earlier stages remain in
/// place. Every stage can also be re-invoked on its own, relying solely on
/// its checkpoint to find its input window.
#[derive(Debug)]
pub struct Pipeline<S, T, C> {
    ctx: RunContext<S, T, C>,
}

impl<S, T, C> Pipeline<S, T, C>
where
    S: Source + Sync,
    T: TableStore + Sync,
    C: CheckpointStore + Sync,
{
    /// Creates a pipeline from a validated configuration and its stores.
    pub fn new(
        config: PipelineConfig,
        source: S,
        tables: T,
        checkpoints: C,
    ) -> PipelineResult<Self> {
        config.validate()?;

        Ok(Self {
            ctx: RunContext {
                config: Arc::new(config),
                source,
                tables,
                checkpoints,
                reference_sets: BTreeMap::new(),
            },
        })
    }

    /// Registers a reference set used by referential integrity checks.
    pub fn add_reference_set(&mut self, name: &str, values: BTreeSet<String>) {
        self.ctx.reference_sets.insert(name.to_string(), values);
    }

    /// Returns the run context, mainly for inspection in tests.
    pub fn context(&self) -> &RunContext<S, T, C> {
        &self.ctx
    }

    /// Runs ingest, clean, and merge for every configured source.
    ///
    /// Stages run in order per source; the first failure aborts the run and
    /// is propagated after logging, leaving all previously committed stage
    /// checkpoints in place.
    pub async fn run(&self) -> PipelineResult<RunSummary> {
        let run_id = Uuid::new_v4();
        info!(
            %run_id,
            pipeline = %self.ctx.config.pipeline_name,
            sources = self.ctx.config.sources.len(),
            "starting pipeline run"
        );

        let mut sources = Vec::with_capacity(self.ctx.config.sources.len());

        for source in &self.ctx.config.sources {
            match self.run_source(source).await {
                Ok(summary) => sources.push(summary),
                Err(err) => {
                    error!(
                        %run_id,
                        source_id = %source.source_id,
                        kind = ?err.kind(),
                        "pipeline run failed"
                    );

                    return Err(err);
                }
            }
        }

        info!(%run_id, "pipeline run completed");

        Ok(RunSummary {
            run_id,
            pipeline_name: self.ctx.config.pipeline_name.clone(),
            sources,
        })
    }

    /// Runs all three stages for a single source.
    async fn run_source(&self, source: &SourceConfig) -> PipelineResult<SourceRunSummary> {
        let ingest = stages::ingest::ingest(&self.ctx, source).await?;
        let clean = stages::clean::clean(&self.ctx, source).await?;
        let merge = stages::merge::merge(&self.ctx, source).await?;

        Ok(SourceRunSummary {
            source_id: source.source_id.clone(),
            ingest,
            clean,
            merge,
        })
    }

    /// Re-invokes only the ingestion stage for one source.
    pub async fn run_ingest(&self, source_id: &str) -> PipelineResult<IngestReport> {
        let source = self.source_config(source_id)?;
        stages::ingest::ingest(&self.ctx, source).await
    }

    /// Re-invokes only the cleaning stage for one source.
    pub async fn run_clean(&self, source_id: &str) -> PipelineResult<CleanReport> {
        let source = self.source_config(source_id)?;
        stages::clean::clean(&self.ctx, source).await
    }

    /// Re-invokes only the merge stage for one source.
    pub async fn run_merge(&self, source_id: &str) -> PipelineResult<MergeReport> {
        let source = self.source_config(source_id)?;
        stages::merge::merge(&self.ctx, source).await
    }

    fn source_config(&self, source_id: &str) -> PipelineResult<&SourceConfig> {
        let Some(source) = self
            .ctx
            .config
            .sources
            .iter()
            .find(|source| source.source_id == source_id)
        else {
            bail!(
                ErrorKind::ConfigError,
                "Unknown source",
                format!("source `{source_id}` is not configured for this pipeline")
            );
        };

        Ok(source)
    }
}
