//! Ingestion stage: reads new source batches and appends them to the raw
//! table, exactly once per checkpointed offset.

use chrono::Utc;
use medallion_config::shared::SourceConfig;
use tracing::{debug, info};

use crate::bail;
use crate::error::{ErrorKind, PipelineResult};
use crate::pipeline::RunContext;
use crate::retry::retry_with_backoff;
use crate::source::{Source, SourceRecord};
use crate::store::checkpoint::{AdvanceMode, CheckpointStore, Stage};
use crate::store::table::TableStore;
use crate::types::{DeadLetter, IngestReport, RawRecord, RejectReason};

/// Ingests all new records for one source.
///
/// Reads records with offset strictly greater than the `(ingest, source_id)`
/// checkpoint, validates them against the declared schema, and appends the
/// accepted batch plus dead letters atomically with the checkpoint advance.
/// An empty window is a no-op: nothing is written and the checkpoint does not
/// move, which makes re-runs idempotent.
pub async fn ingest<S, T, C>(
    ctx: &RunContext<S, T, C>,
    source: &SourceConfig,
) -> PipelineResult<IngestReport>
where
    S: Source + Sync,
    T: TableStore + Sync,
    C: CheckpointStore + Sync,
{
    let source_id = source.source_id.as_str();
    let checkpoint = ctx.checkpoints.get(Stage::Ingest, source_id).await?;

    let mut records = ctx.source.read_since(source_id, checkpoint).await?;
    records.truncate(ctx.config.batch.max_size);

    let Some(max_offset) = records.last().map(|record| record.offset) else {
        debug!(source_id, "no new source records, ingest is a no-op");

        return Ok(IngestReport::default());
    };

    verify_monotonic_offsets(source_id, checkpoint.map(|offset| offset.0), &records)?;

    // One timestamp per run keeps provenance metadata uniform across the batch.
    let ingested_at = Utc::now();

    let mut accepted = Vec::with_capacity(records.len());
    let mut dead_letters = Vec::new();

    for record in records {
        match validate_shape(source, &record) {
            Ok(()) => accepted.push(RawRecord {
                source_id: source_id.to_string(),
                ingestion_offset: record.offset,
                ingested_at,
                fields: record.fields,
            }),
            Err(detail) => dead_letters.push(DeadLetter {
                source_id: source_id.to_string(),
                offset: record.offset,
                reason: RejectReason::SchemaViolation,
                detail,
                fields: record.fields,
            }),
        }
    }

    let report = IngestReport {
        accepted: accepted.len() as u64,
        dead_lettered: dead_letters.len() as u64,
        last_offset: Some(max_offset),
    };

    retry_with_backoff(&ctx.config.retry, "ingest write", || {
        let accepted = accepted.clone();
        let dead_letters = dead_letters.clone();

        ctx.checkpoints.advance(
            Stage::Ingest,
            source_id,
            max_offset,
            AdvanceMode::Strict,
            move || async move {
                ctx.tables.append_raw(accepted).await?;
                if !dead_letters.is_empty() {
                    ctx.tables.append_dead_letters(dead_letters).await?;
                }

                Ok(())
            },
        )
    })
    .await?;

    info!(
        source_id,
        accepted = report.accepted,
        dead_lettered = report.dead_lettered,
        last_offset = %max_offset,
        "ingest completed"
    );

    Ok(report)
}

/// Fails the run when source offsets are not strictly increasing past the
/// checkpoint. The source contract requires monotonic offsets; replayed or
/// reordered batches are rejected rather than silently reconciled.
fn verify_monotonic_offsets(
    source_id: &str,
    checkpoint: Option<u64>,
    records: &[SourceRecord],
) -> PipelineResult<()> {
    let mut previous = checkpoint;

    for record in records {
        if previous.is_some_and(|previous| record.offset.0 <= previous) {
            bail!(
                ErrorKind::InvalidData,
                "Source offsets are not strictly increasing",
                format!(
                    "source `{source_id}`: offset {} follows {:?}",
                    record.offset, previous
                )
            );
        }

        previous = Some(record.offset.0);
    }

    Ok(())
}

/// Validates the structural shape of a source record against the declared
/// schema: declared fields that are present must be scalar values. Type
/// parseability is the cleaning stage's concern.
fn validate_shape(source: &SourceConfig, record: &SourceRecord) -> Result<(), String> {
    for field in &source.schema.fields {
        if let Some(value) = record.fields.get(&field.name)
            && matches!(
                value,
                serde_json::Value::Object(_) | serde_json::Value::Array(_)
            )
        {
            return Err(format!(
                "field `{}` must be a scalar value, got {value}",
                field.name
            ));
        }
    }

    Ok(())
}
