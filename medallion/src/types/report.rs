use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::record::Offset;

/// Reason a record was rejected and routed to the dead-letter set.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// The raw record does not match the declared source schema.
    SchemaViolation,
    /// A declared field could not be coerced to its canonical type.
    TypeCoercion,
    /// A null field was rejected by its null-handling policy.
    NullPolicy,
    /// A foreign business key is missing from its reference set.
    ReferentialIntegrity,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RejectReason::SchemaViolation => "schema_violation",
            RejectReason::TypeCoercion => "type_coercion",
            RejectReason::NullPolicy => "null_policy",
            RejectReason::ReferentialIntegrity => "referential_integrity",
        };

        f.write_str(name)
    }
}

/// Outcome of one ingestion stage invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    /// Raw rows durably written.
    pub accepted: u64,
    /// Records routed to the dead-letter set.
    pub dead_lettered: u64,
    /// Highest offset consumed; `None` when the window was empty.
    pub last_offset: Option<Offset>,
}

/// Outcome of one cleaning stage invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleanReport {
    /// Clean rows durably written after deduplication.
    pub accepted: u64,
    /// Rejected record counts grouped by reason.
    pub rejected_by_reason: BTreeMap<RejectReason, u64>,
    /// Intra-batch duplicates discarded by last-write-wins.
    pub deduplicated: u64,
    /// Highest raw offset consumed; `None` when the window was empty.
    pub last_offset: Option<Offset>,
}

impl CleanReport {
    /// Total number of rejected records across all reasons.
    pub fn rejected(&self) -> u64 {
        self.rejected_by_reason.values().sum()
    }
}

/// Outcome of one SCD2 merge invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeReport {
    /// Business keys seen for the first time.
    pub new_entities: u64,
    /// Keys whose current version was closed and superseded.
    pub changed: u64,
    /// Keys whose incoming hash matched the current version.
    pub unchanged: u64,
    /// Earlier snapshots superseded by a later clean commit in the same
    /// window.
    pub superseded: u64,
    /// Highest clean offset consumed; `None` when the window was empty.
    pub last_offset: Option<Offset>,
}
