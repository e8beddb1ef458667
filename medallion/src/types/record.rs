use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::types::report::RejectReason;
use crate::types::value::Value;

/// Monotonic position of a record within its source.
///
/// Offsets order records per source and drive checkpointing; they carry no
/// meaning across sources.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Offset(pub u64);

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Stable identifier of a real-world entity, independent of storage keys.
///
/// Built from the configured key fields of a cleaned record, in configuration
/// order. Ordered so it can key history lookups deterministically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BusinessKey(Vec<String>);

impl BusinessKey {
    /// Creates a business key from its rendered key-field values.
    pub fn new(parts: Vec<String>) -> Self {
        Self(parts)
    }

    /// Returns the rendered key-field values in configuration order.
    pub fn parts(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for BusinessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("|"))
    }
}

/// Deterministic hash over the non-metadata attributes of a cleaned record.
///
/// Used by the merge engine for change detection: equal hashes mean no new
/// dimension version is needed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordHash(String);

impl RecordHash {
    /// Computes the hash over attribute name/value pairs in sorted order.
    ///
    /// Names and canonical value renderings are fed to SHA-256 with unit
    /// separators so that adjacent fields cannot alias each other.
    pub fn compute(attributes: &BTreeMap<String, Value>) -> Self {
        let mut hasher = Sha256::new();

        for (name, value) in attributes {
            hasher.update(name.as_bytes());
            hasher.update([0x1f]);
            hasher.update(value.canonical().as_bytes());
            hasher.update([0x1e]);
        }

        let digest = hasher.finalize();
        let mut hex = String::with_capacity(digest.len() * 2);
        for byte in digest {
            hex.push_str(&format!("{byte:02x}"));
        }

        Self(hex)
    }

    /// Returns the hex-encoded digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Immutable raw record as written by the ingestion stage.
///
/// Identity is `(source_id, ingestion_offset)`. The field mapping is opaque:
/// no shape is enforced until the cleaning stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Source the record was ingested from.
    pub source_id: String,
    /// Monotonic position within the source.
    pub ingestion_offset: Offset,
    /// Wall-clock time the record was ingested.
    pub ingested_at: DateTime<Utc>,
    /// Opaque field mapping as delivered by the source.
    pub fields: BTreeMap<String, serde_json::Value>,
}

/// Canonical, schema-conformant record produced by the cleaning stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanRecord {
    /// Source the underlying raw record came from.
    pub source_id: String,
    /// Offset of the raw record this was derived from.
    pub source_offset: Offset,
    /// Cleaning invocation that committed this row. Rows sharing a batch id
    /// were deduplicated together, so a business key appears at most once per
    /// batch id.
    pub batch_id: Uuid,
    /// Ingestion time inherited from the raw record.
    pub ingested_at: DateTime<Utc>,
    /// Identifier of the real-world entity.
    pub business_key: BusinessKey,
    /// Change-detection hash over `attributes`.
    pub record_hash: RecordHash,
    /// Coerced attribute values keyed by field name.
    pub attributes: BTreeMap<String, Value>,
}

/// One version of a dimension entity in the history table.
///
/// For a given business key, version ids are monotonic starting at 1 and
/// validity intervals are contiguous: a version's `valid_from` equals the
/// previous version's `valid_to`, and at most one version is open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionVersion {
    /// Identifier of the entity this version belongs to.
    pub business_key: BusinessKey,
    /// Full attribute snapshot at this version.
    pub attributes: BTreeMap<String, Value>,
    /// Monotonic version number per business key, starting at 1.
    pub version_id: u64,
    /// Change-detection hash over `attributes`.
    pub record_hash: RecordHash,
    /// Start of this version's validity interval.
    pub valid_from: DateTime<Utc>,
    /// End of validity; `None` marks the open, current version.
    pub valid_to: Option<DateTime<Utc>>,
}

impl DimensionVersion {
    /// Returns whether this is the open, current version of its entity.
    pub fn is_current(&self) -> bool {
        self.valid_to.is_none()
    }
}

/// A record rejected by validation, retained for inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    /// Source of the rejected record.
    pub source_id: String,
    /// Offset of the rejected record within its source.
    pub offset: Offset,
    /// Why the record was rejected.
    pub reason: RejectReason,
    /// Human-readable rejection detail.
    pub detail: String,
    /// Original raw field mapping, preserved for inspection.
    pub fields: BTreeMap<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_hash_is_order_insensitive_over_insertion() {
        let mut left = BTreeMap::new();
        left.insert("a".to_string(), Value::Integer(1));
        left.insert("b".to_string(), Value::Text("x".to_string()));

        let mut right = BTreeMap::new();
        right.insert("b".to_string(), Value::Text("x".to_string()));
        right.insert("a".to_string(), Value::Integer(1));

        assert_eq!(RecordHash::compute(&left), RecordHash::compute(&right));
    }

    #[test]
    fn record_hash_distinguishes_adjacent_fields() {
        let mut left = BTreeMap::new();
        left.insert("a".to_string(), Value::Text("bc".to_string()));

        let mut right = BTreeMap::new();
        right.insert("ab".to_string(), Value::Text("c".to_string()));

        assert_ne!(RecordHash::compute(&left), RecordHash::compute(&right));
    }

    #[test]
    fn dimension_version_current_tracks_valid_to() {
        let version = DimensionVersion {
            business_key: BusinessKey::new(vec!["C1".to_string()]),
            attributes: BTreeMap::new(),
            version_id: 1,
            record_hash: RecordHash::compute(&BTreeMap::new()),
            valid_from: Utc::now(),
            valid_to: None,
        };

        assert!(version.is_current());
        assert!(
            !DimensionVersion {
                valid_to: Some(Utc::now()),
                ..version
            }
            .is_current()
        );
    }
}
