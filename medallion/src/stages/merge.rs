//! SCD2 merge engine: folds a stream of dimension snapshots into a versioned
//! history table with at most one open version per business key.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use medallion_config::shared::SourceConfig;
use tracing::{debug, info};

use crate::bail;
use crate::error::{ErrorKind, PipelineResult};
use crate::pipeline::RunContext;
use crate::retry::retry_with_backoff;
use crate::source::Source;
use crate::store::checkpoint::{AdvanceMode, CheckpointStore, Stage};
use crate::store::table::{HistoryMutation, TableStore};
use crate::types::{CleanRecord, DimensionVersion, MergeReport};

/// Merges all new clean records for one target past the `(merge, target_id)`
/// checkpoint.
///
/// The window may span several clean commits, for example when a prior merge
/// run failed and new snapshots were cleaned before the retry. Snapshots of
/// the same business key from successive commits fold in offset order down to
/// the latest one; a key appearing twice within a single commit indicates an
/// upstream dedup failure and rejects the run.
///
/// Every `valid_from`/`valid_to` written by one invocation uses a single run
/// timestamp captured at start, so intervals stay contiguous across keys. The
/// whole run's closes and inserts are committed as one mutation together with
/// the checkpoint advance; a partially applied run can never advance the
/// checkpoint.
pub async fn merge<S, T, C>(
    ctx: &RunContext<S, T, C>,
    source: &SourceConfig,
) -> PipelineResult<MergeReport>
where
    S: Source + Sync,
    T: TableStore + Sync,
    C: CheckpointStore + Sync,
{
    let target_id = source.source_id.as_str();
    let checkpoint = ctx.checkpoints.get(Stage::Merge, target_id).await?;

    let mut batch = ctx.tables.read_clean_since(target_id, checkpoint).await?;
    batch.truncate(ctx.config.batch.max_size);

    let Some(max_offset) = batch.last().map(|record| record.source_offset) else {
        debug!(target_id, "no new clean records, merge is a no-op");

        return Ok(MergeReport::default());
    };

    let (incoming, superseded) = fold_by_key(target_id, batch)?;

    // A single timestamp for the whole invocation guarantees gap-free
    // intervals across every key processed in this run.
    let run_timestamp = Utc::now();

    let mut mutation = HistoryMutation::default();
    let mut report = MergeReport {
        superseded,
        last_offset: Some(max_offset),
        ..MergeReport::default()
    };

    for (business_key, record) in incoming {
        let current = ctx.tables.current_version(&business_key).await?;

        match current {
            None => {
                mutation
                    .inserts
                    .push(new_version(record, 1, run_timestamp));
                report.new_entities += 1;
            }
            Some(current) if current.record_hash == record.record_hash => {
                // No change detected: the common case must not touch the
                // current row.
                report.unchanged += 1;
            }
            Some(current) => {
                verify_attribute_shape(target_id, &current, &record)?;

                mutation.closes.push((business_key, run_timestamp));
                mutation
                    .inserts
                    .push(new_version(record, current.version_id + 1, run_timestamp));
                report.changed += 1;
            }
        }
    }

    retry_with_backoff(&ctx.config.retry, "merge history write", || {
        let mutation = mutation.clone();

        ctx.checkpoints.advance(
            Stage::Merge,
            target_id,
            max_offset,
            AdvanceMode::Strict,
            move || async move {
                if mutation.is_empty() {
                    return Ok(());
                }

                ctx.tables.apply_history(mutation).await
            },
        )
    })
    .await?;

    info!(
        target_id,
        new_entities = report.new_entities,
        changed = report.changed,
        unchanged = report.unchanged,
        superseded = report.superseded,
        last_offset = %max_offset,
        "merge completed"
    );

    Ok(report)
}

/// Folds the offset-ordered batch down to one record per business key,
/// returning the survivors plus the number of earlier snapshots superseded by
/// a later commit.
///
/// The cleaning stage guarantees at most one record per key within one clean
/// commit, so two records sharing a key and a batch id indicate an upstream
/// dedup failure. Silently picking one would mask it, so the run is rejected
/// before any write. Records of the same key from different commits are
/// ordinary catch-up: the latest snapshot wins.
fn fold_by_key(
    target_id: &str,
    batch: Vec<CleanRecord>,
) -> PipelineResult<(BTreeMap<crate::types::BusinessKey, CleanRecord>, u64)> {
    let mut incoming: BTreeMap<crate::types::BusinessKey, CleanRecord> = BTreeMap::new();
    let mut superseded = 0u64;

    for record in batch {
        if let Some(previous) = incoming.get(&record.business_key) {
            if previous.batch_id == record.batch_id {
                bail!(
                    ErrorKind::DuplicateKeyInBatch,
                    "Clean commit contains duplicate business key",
                    format!("target `{target_id}` key `{}`", record.business_key)
                );
            }

            superseded += 1;
        }

        incoming.insert(record.business_key.clone(), record);
    }

    Ok((incoming, superseded))
}

/// Fails the run when the incoming attribute shape differs from the current
/// version's. Shape drift means the cleaned schema and the history table
/// disagree, which is a permanent configuration problem rather than an
/// attribute change.
fn verify_attribute_shape(
    target_id: &str,
    current: &DimensionVersion,
    incoming: &CleanRecord,
) -> PipelineResult<()> {
    let current_fields: Vec<_> = current.attributes.keys().collect();
    let incoming_fields: Vec<_> = incoming.attributes.keys().collect();

    if current_fields != incoming_fields {
        bail!(
            ErrorKind::SchemaViolation,
            "Incoming record shape does not match the history table",
            format!(
                "target `{target_id}` key `{}`: history has {current_fields:?}, incoming has {incoming_fields:?}",
                incoming.business_key
            )
        );
    }

    Ok(())
}

/// Builds the dimension version a clean record opens at `valid_from`.
fn new_version(
    record: CleanRecord,
    version_id: u64,
    valid_from: DateTime<Utc>,
) -> DimensionVersion {
    DimensionVersion {
        business_key: record.business_key,
        attributes: record.attributes,
        version_id,
        record_hash: record.record_hash,
        valid_from,
        valid_to: None,
    }
}
