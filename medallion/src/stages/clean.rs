//! Cleaning and validation stage: turns raw records into canonical,
//! deduplicated, schema-conformant clean records.

use std::collections::BTreeMap;

use medallion_config::shared::{NullPolicy, SourceConfig};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{ErrorKind, PipelineResult};
use crate::pipeline::RunContext;
use crate::retry::retry_with_backoff;
use crate::source::Source;
use crate::store::checkpoint::{AdvanceMode, CheckpointStore, Stage};
use crate::store::table::TableStore;
use crate::types::{
    BusinessKey, CleanRecord, CleanReport, DeadLetter, RawRecord, RecordHash, RejectReason, Value,
};

/// Why a single record failed cleaning.
struct Rejection {
    reason: RejectReason,
    detail: String,
}

impl Rejection {
    fn new(reason: RejectReason, detail: String) -> Self {
        Self { reason, detail }
    }
}

/// Per-run carry-forward state: last cleaned value per entity and field.
type CarryState = BTreeMap<(BusinessKey, String), Value>;

/// Cleans all raw records for one source past the `(clean, source_id)`
/// checkpoint.
///
/// Record-level failures are routed to the dead-letter set and never abort
/// the batch. Among records sharing a business key within the batch, exactly
/// one survives: the one with the latest `ingested_at`, tie-broken by highest
/// offset. The clean rows, dead letters, and checkpoint advance commit
/// together.
pub async fn clean<S, T, C>(
    ctx: &RunContext<S, T, C>,
    source: &SourceConfig,
) -> PipelineResult<CleanReport>
where
    S: Source + Sync,
    T: TableStore + Sync,
    C: CheckpointStore + Sync,
{
    let source_id = source.source_id.as_str();
    let checkpoint = ctx.checkpoints.get(Stage::Clean, source_id).await?;

    let mut raw_rows = ctx.tables.read_raw_since(source_id, checkpoint).await?;
    raw_rows.truncate(ctx.config.batch.max_size);

    let Some(max_offset) = raw_rows.last().map(|row| row.ingestion_offset) else {
        debug!(source_id, "no new raw records, clean is a no-op");

        return Ok(CleanReport::default());
    };

    // One batch id per invocation; the merge stage uses it to tell apart
    // duplicates within one commit from snapshots of successive commits.
    let batch_id = Uuid::new_v4();

    let mut carry = CarryState::new();
    let mut cleaned: Vec<CleanRecord> = Vec::with_capacity(raw_rows.len());
    let mut dead_letters = Vec::new();
    let mut rejected_by_reason = BTreeMap::new();

    for raw in raw_rows {
        match clean_record(ctx, source, &raw, batch_id, &mut carry) {
            Ok(record) => cleaned.push(record),
            Err(CleanRecordError::Rejected(rejection)) => {
                *rejected_by_reason.entry(rejection.reason).or_insert(0u64) += 1;
                dead_letters.push(DeadLetter {
                    source_id: source_id.to_string(),
                    offset: raw.ingestion_offset,
                    reason: rejection.reason,
                    detail: rejection.detail,
                    fields: raw.fields,
                });
            }
            Err(CleanRecordError::Fatal(err)) => return Err(err),
        }
    }

    let (deduped, discarded) = dedup_last_write_wins(cleaned);

    let report = CleanReport {
        accepted: deduped.len() as u64,
        rejected_by_reason,
        deduplicated: discarded,
        last_offset: Some(max_offset),
    };

    retry_with_backoff(&ctx.config.retry, "clean write", || {
        let deduped = deduped.clone();
        let dead_letters = dead_letters.clone();

        ctx.checkpoints.advance(
            Stage::Clean,
            source_id,
            max_offset,
            AdvanceMode::Strict,
            move || async move {
                ctx.tables.append_clean(deduped).await?;
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
        rejected = report.rejected(),
        deduplicated = report.deduplicated,
        last_offset = %max_offset,
        "clean completed"
    );

    Ok(report)
}

/// Failure of cleaning a single record: either a per-record rejection or a
/// fatal error that aborts the run (for example a missing reference set).
enum CleanRecordError {
    Rejected(Rejection),
    Fatal(crate::error::PipelineError),
}

impl From<Rejection> for CleanRecordError {
    fn from(rejection: Rejection) -> Self {
        CleanRecordError::Rejected(rejection)
    }
}

/// Cleans one raw record: type coercion, null policy, business key,
/// referential checks, and record hash.
fn clean_record<S, T, C>(
    ctx: &RunContext<S, T, C>,
    source: &SourceConfig,
    raw: &RawRecord,
    batch_id: Uuid,
    carry: &mut CarryState,
) -> Result<CleanRecord, CleanRecordError> {
    // Key fields are resolved first so carry-forward and referential checks
    // can be scoped to the entity.
    let business_key = compute_business_key(source, raw)?;

    let mut attributes = BTreeMap::new();
    for field in &source.schema.fields {
        let raw_value = raw.fields.get(&field.name);

        let value = match raw_value {
            Some(value) if !value.is_null() => {
                Value::coerce(value, field.field_type).map_err(|detail| {
                    Rejection::new(
                        RejectReason::TypeCoercion,
                        format!("field `{}`: {detail}", field.name),
                    )
                })?
            }
            // Null or absent: the null policy decides.
            _ => resolve_null(field, &business_key, carry)?,
        };

        attributes.insert(field.name.clone(), value);
    }

    check_references(ctx, source, &attributes)?;

    // Carry-forward state only advances on accepted records, so a rejected
    // record cannot leak values into later ones.
    for (name, value) in &attributes {
        if *value != Value::Null {
            carry.insert((business_key.clone(), name.clone()), value.clone());
        }
    }

    let record_hash = RecordHash::compute(&attributes);

    Ok(CleanRecord {
        source_id: raw.source_id.clone(),
        source_offset: raw.ingestion_offset,
        batch_id,
        ingested_at: raw.ingested_at,
        business_key,
        record_hash,
        attributes,
    })
}

/// Computes the business key from the configured key fields.
///
/// Key fields must be present, non-null, and coercible; a record without an
/// identity cannot be carried forward or merged.
fn compute_business_key(source: &SourceConfig, raw: &RawRecord) -> Result<BusinessKey, Rejection> {
    let mut parts = Vec::with_capacity(source.entity.business_key.len());

    for key_field in &source.entity.business_key {
        let field = source.schema.field(key_field).ok_or_else(|| {
            Rejection::new(
                RejectReason::SchemaViolation,
                format!("business key field `{key_field}` is not declared in the schema"),
            )
        })?;

        let raw_value = raw.fields.get(key_field).filter(|value| !value.is_null());
        let Some(raw_value) = raw_value else {
            return Err(Rejection::new(
                RejectReason::SchemaViolation,
                format!("business key field `{key_field}` is missing or null"),
            ));
        };

        let value = Value::coerce(raw_value, field.field_type).map_err(|detail| {
            Rejection::new(
                RejectReason::TypeCoercion,
                format!("business key field `{key_field}`: {detail}"),
            )
        })?;

        parts.push(value.canonical());
    }

    Ok(BusinessKey::new(parts))
}

/// Applies the configured null policy to a null or absent field.
fn resolve_null(
    field: &medallion_config::shared::FieldConfig,
    business_key: &BusinessKey,
    carry: &CarryState,
) -> Result<Value, Rejection> {
    if field.nullable {
        return Ok(Value::Null);
    }

    match &field.null_policy {
        NullPolicy::Reject => Err(Rejection::new(
            RejectReason::NullPolicy,
            format!("field `{}` is null and the policy is reject", field.name),
        )),
        NullPolicy::Default(default) => {
            Value::coerce(default, field.field_type).map_err(|detail| {
                Rejection::new(
                    RejectReason::TypeCoercion,
                    format!("default for field `{}`: {detail}", field.name),
                )
            })
        }
        NullPolicy::CarryForward => carry
            .get(&(business_key.clone(), field.name.clone()))
            .cloned()
            .ok_or_else(|| {
                Rejection::new(
                    RejectReason::NullPolicy,
                    format!(
                        "field `{}` is null and no prior value exists to carry forward",
                        field.name
                    ),
                )
            }),
    }
}

/// Checks configured referential constraints against the run's reference sets.
///
/// A missing reference set is a configuration error and aborts the run; a
/// value missing from its set rejects the individual record.
fn check_references<S, T, C>(
    ctx: &RunContext<S, T, C>,
    source: &SourceConfig,
    attributes: &BTreeMap<String, Value>,
) -> Result<(), CleanRecordError> {
    for reference in &source.entity.references {
        let Some(reference_set) = ctx.reference_sets.get(&reference.reference_set) else {
            return Err(CleanRecordError::Fatal(crate::pipeline_error!(
                ErrorKind::ConfigError,
                "Reference set is not loaded",
                format!(
                    "field `{}` references unknown set `{}`",
                    reference.field, reference.reference_set
                )
            )));
        };

        let value = attributes.get(&reference.field);
        let rendered = match value {
            Some(Value::Null) | None => continue,
            Some(value) => value.canonical(),
        };

        if !reference_set.contains(&rendered) {
            return Err(CleanRecordError::Rejected(Rejection::new(
                RejectReason::ReferentialIntegrity,
                format!(
                    "field `{}` value `{rendered}` is not in reference set `{}`",
                    reference.field, reference.reference_set
                ),
            )));
        }
    }

    Ok(())
}

/// Retains exactly one record per business key: the one with the latest
/// `ingested_at`, tie-broken by highest offset. Returns the survivors in
/// offset order plus the number of discarded duplicates.
fn dedup_last_write_wins(records: Vec<CleanRecord>) -> (Vec<CleanRecord>, u64) {
    let total = records.len() as u64;
    let mut by_key: BTreeMap<BusinessKey, CleanRecord> = BTreeMap::new();

    for record in records {
        match by_key.get(&record.business_key) {
            Some(existing)
                if (existing.ingested_at, existing.source_offset)
                    >= (record.ingested_at, record.source_offset) => {}
            _ => {
                by_key.insert(record.business_key.clone(), record);
            }
        }
    }

    let mut survivors: Vec<_> = by_key.into_values().collect();
    survivors.sort_by_key(|record| record.source_offset);

    let discarded = total - survivors.len() as u64;
    (survivors, discarded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    use crate::types::Offset;

    fn clean_record_for(key: &str, ingested_at_offset_secs: i64, offset: u64) -> CleanRecord {
        let attributes = BTreeMap::from([("id".to_string(), Value::Text(key.to_string()))]);

        CleanRecord {
            source_id: "s1".to_string(),
            source_offset: Offset(offset),
            batch_id: uuid::Uuid::new_v4(),
            ingested_at: Utc::now() + Duration::seconds(ingested_at_offset_secs),
            business_key: BusinessKey::new(vec![key.to_string()]),
            record_hash: RecordHash::compute(&attributes),
            attributes,
        }
    }

    #[test]
    fn dedup_keeps_latest_ingested_at() {
        let (survivors, discarded) = dedup_last_write_wins(vec![
            clean_record_for("C1", 0, 1),
            clean_record_for("C1", 60, 2),
            clean_record_for("C2", 0, 3),
        ]);

        assert_eq!(discarded, 1);
        assert_eq!(survivors.len(), 2);
        let c1 = survivors
            .iter()
            .find(|record| record.business_key.parts() == ["C1"])
            .unwrap();
        assert_eq!(c1.source_offset, Offset(2));
    }

    #[test]
    fn dedup_tie_breaks_on_highest_offset() {
        let now = Utc::now();
        let mut first = clean_record_for("C1", 0, 1);
        let mut second = clean_record_for("C1", 0, 2);
        first.ingested_at = now;
        second.ingested_at = now;

        let (survivors, discarded) = dedup_last_write_wins(vec![first, second]);

        assert_eq!(discarded, 1);
        assert_eq!(survivors[0].source_offset, Offset(2));
    }
}
