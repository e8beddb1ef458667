//! Table store: append-only raw/clean tables and the versioned history table.

pub mod memory;

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::error::PipelineResult;
use crate::types::{BusinessKey, CleanRecord, DeadLetter, DimensionVersion, Offset, RawRecord};

/// Atomic set of history-table changes produced by one merge run.
///
/// Closes are applied before inserts, so a key may appear in both: its
/// current version is closed and the successor inserted in the same commit.
#[derive(Debug, Clone, Default)]
pub struct HistoryMutation {
    /// Current versions to close, with the closing timestamp.
    pub closes: Vec<(BusinessKey, DateTime<Utc>)>,
    /// New versions to insert; each must become the sole open version.
    pub inserts: Vec<DimensionVersion>,
}

impl HistoryMutation {
    /// Returns whether the mutation carries no changes.
    pub fn is_empty(&self) -> bool {
        self.closes.is_empty() && self.inserts.is_empty()
    }
}

/// Trait for the underlying append-only, versioned table store.
///
/// Raw and clean tables are immutable by API contract: the trait exposes no
/// update or delete operation for them. History rows are only ever closed
/// (their `valid_to` set) through [`TableStore::apply_history`], which commits
/// a whole mutation atomically.
pub trait TableStore {
    /// Appends raw rows in one atomic commit.
    fn append_raw(&self, rows: Vec<RawRecord>) -> impl Future<Output = PipelineResult<()>> + Send;

    /// Reads raw rows for a source with offset strictly greater than `offset`,
    /// ordered by offset.
    fn read_raw_since(
        &self,
        source_id: &str,
        offset: Option<Offset>,
    ) -> impl Future<Output = PipelineResult<Vec<RawRecord>>> + Send;

    /// Appends clean rows in one atomic commit.
    fn append_clean(
        &self,
        rows: Vec<CleanRecord>,
    ) -> impl Future<Output = PipelineResult<()>> + Send;

    /// Reads clean rows for a source with source offset strictly greater than
    /// `offset`, ordered by offset.
    fn read_clean_since(
        &self,
        source_id: &str,
        offset: Option<Offset>,
    ) -> impl Future<Output = PipelineResult<Vec<CleanRecord>>> + Send;

    /// Appends rejected records to the dead-letter set.
    fn append_dead_letters(
        &self,
        entries: Vec<DeadLetter>,
    ) -> impl Future<Output = PipelineResult<()>> + Send;

    /// Reads the whole dead-letter set.
    fn read_dead_letters(&self) -> impl Future<Output = PipelineResult<Vec<DeadLetter>>> + Send;

    /// Returns the open version for a business key, if any.
    fn current_version(
        &self,
        business_key: &BusinessKey,
    ) -> impl Future<Output = PipelineResult<Option<DimensionVersion>>> + Send;

    /// Returns all versions for a business key, ordered by version id.
    fn versions(
        &self,
        business_key: &BusinessKey,
    ) -> impl Future<Output = PipelineResult<Vec<DimensionVersion>>> + Send;

    /// Returns the version whose validity interval contains `at`.
    ///
    /// Intervals are half-open: a version is valid from `valid_from`
    /// inclusive to `valid_to` exclusive.
    fn version_as_of(
        &self,
        business_key: &BusinessKey,
        at: DateTime<Utc>,
    ) -> impl Future<Output = PipelineResult<Option<DimensionVersion>>> + Send;

    /// Applies a history mutation atomically: all closes and inserts commit
    /// together or not at all.
    fn apply_history(
        &self,
        mutation: HistoryMutation,
    ) -> impl Future<Output = PipelineResult<()>> + Send;
}
