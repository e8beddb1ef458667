use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::{ErrorKind, PipelineResult};
use crate::pipeline_error;
use crate::store::table::{HistoryMutation, TableStore};
use crate::types::{BusinessKey, CleanRecord, DeadLetter, DimensionVersion, Offset, RawRecord};

/// Inner state of [`MemoryTableStore`].
#[derive(Debug, Default)]
struct Inner {
    /// Append-only raw table.
    raw: Vec<RawRecord>,
    /// Append-only clean table.
    clean: Vec<CleanRecord>,
    /// Dead-letter set.
    dead_letters: Vec<DeadLetter>,
    /// History table, versions per business key ordered by version id.
    history: BTreeMap<BusinessKey, Vec<DimensionVersion>>,
    /// Number of upcoming writes that fail with a transient store error.
    /// Used by tests to exercise retry and atomicity paths.
    pending_write_failures: u32,
}

impl Inner {
    fn take_write_failure(&mut self) -> bool {
        if self.pending_write_failures > 0 {
            self.pending_write_failures -= 1;
            return true;
        }

        false
    }
}

/// In-memory table store for tests and development.
///
/// Implements the full [`TableStore`] contract, including atomic history
/// mutations and point-in-time reads. All data is lost on drop.
#[derive(Debug, Clone, Default)]
pub struct MemoryTableStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryTableStore {
    /// Creates a new empty table store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` write operations fail with a transient store
    /// error. Reads are unaffected.
    pub async fn fail_next_writes(&self, count: u32) {
        let mut inner = self.inner.lock().await;
        inner.pending_write_failures = count;
    }

    /// Returns the total number of raw rows across all sources.
    pub async fn raw_len(&self) -> usize {
        self.inner.lock().await.raw.len()
    }

    /// Returns the total number of clean rows across all sources.
    pub async fn clean_len(&self) -> usize {
        self.inner.lock().await.clean.len()
    }

    /// Returns all business keys present in the history table.
    pub async fn history_keys(&self) -> Vec<BusinessKey> {
        self.inner.lock().await.history.keys().cloned().collect()
    }
}

/// Validates and applies a history mutation against a cloned history map,
/// returning the new map only when every change is consistent.
fn apply_history_mutation(
    history: &BTreeMap<BusinessKey, Vec<DimensionVersion>>,
    mutation: HistoryMutation,
) -> PipelineResult<BTreeMap<BusinessKey, Vec<DimensionVersion>>> {
    let mut next = history.clone();

    for (business_key, closed_at) in mutation.closes {
        let versions = next.get_mut(&business_key).ok_or_else(|| {
            pipeline_error!(
                ErrorKind::InvalidState,
                "Cannot close version of unknown business key",
                business_key.to_string()
            )
        })?;

        let open = versions
            .iter_mut()
            .find(|version| version.is_current())
            .ok_or_else(|| {
                pipeline_error!(
                    ErrorKind::InvalidState,
                    "Business key has no open version to close",
                    business_key.to_string()
                )
            })?;

        open.valid_to = Some(closed_at);
    }

    for version in mutation.inserts {
        let versions = next.entry(version.business_key.clone()).or_default();

        // The one-open-version invariant is enforced at commit time as well
        // as by the merge engine.
        if versions.iter().any(|existing| existing.is_current()) {
            return Err(pipeline_error!(
                ErrorKind::InvalidState,
                "Insert would create a second open version",
                version.business_key.to_string()
            ));
        }

        versions.push(version);
    }

    Ok(next)
}

impl TableStore for MemoryTableStore {
    async fn append_raw(&self, rows: Vec<RawRecord>) -> PipelineResult<()> {
        let mut inner = self.inner.lock().await;

        if inner.take_write_failure() {
            return Err(pipeline_error!(
                ErrorKind::StoreIoError,
                "Injected raw table write failure"
            ));
        }

        inner.raw.extend(rows);

        Ok(())
    }

    async fn read_raw_since(
        &self,
        source_id: &str,
        offset: Option<Offset>,
    ) -> PipelineResult<Vec<RawRecord>> {
        let inner = self.inner.lock().await;

        let mut rows: Vec<_> = inner
            .raw
            .iter()
            .filter(|row| {
                row.source_id == source_id
                    && offset.is_none_or(|offset| row.ingestion_offset > offset)
            })
            .cloned()
            .collect();
        rows.sort_by_key(|row| row.ingestion_offset);

        Ok(rows)
    }

    async fn append_clean(&self, rows: Vec<CleanRecord>) -> PipelineResult<()> {
        let mut inner = self.inner.lock().await;

        if inner.take_write_failure() {
            return Err(pipeline_error!(
                ErrorKind::StoreIoError,
                "Injected clean table write failure"
            ));
        }

        inner.clean.extend(rows);

        Ok(())
    }

    async fn read_clean_since(
        &self,
        source_id: &str,
        offset: Option<Offset>,
    ) -> PipelineResult<Vec<CleanRecord>> {
        let inner = self.inner.lock().await;

        let mut rows: Vec<_> = inner
            .clean
            .iter()
            .filter(|row| {
                row.source_id == source_id && offset.is_none_or(|offset| row.source_offset > offset)
            })
            .cloned()
            .collect();
        rows.sort_by_key(|row| row.source_offset);

        Ok(rows)
    }

    async fn append_dead_letters(&self, entries: Vec<DeadLetter>) -> PipelineResult<()> {
        let mut inner = self.inner.lock().await;

        if inner.take_write_failure() {
            return Err(pipeline_error!(
                ErrorKind::StoreIoError,
                "Injected dead-letter write failure"
            ));
        }

        inner.dead_letters.extend(entries);

        Ok(())
    }

    async fn read_dead_letters(&self) -> PipelineResult<Vec<DeadLetter>> {
        let inner = self.inner.lock().await;

        Ok(inner.dead_letters.clone())
    }

    async fn current_version(
        &self,
        business_key: &BusinessKey,
    ) -> PipelineResult<Option<DimensionVersion>> {
        let inner = self.inner.lock().await;

        Ok(inner
            .history
            .get(business_key)
            .and_then(|versions| versions.iter().find(|version| version.is_current()))
            .cloned())
    }

    async fn versions(&self, business_key: &BusinessKey) -> PipelineResult<Vec<DimensionVersion>> {
        let inner = self.inner.lock().await;

        let mut versions = inner.history.get(business_key).cloned().unwrap_or_default();
        versions.sort_by_key(|version| version.version_id);

        Ok(versions)
    }

    async fn version_as_of(
        &self,
        business_key: &BusinessKey,
        at: DateTime<Utc>,
    ) -> PipelineResult<Option<DimensionVersion>> {
        let inner = self.inner.lock().await;

        Ok(inner
            .history
            .get(business_key)
            .and_then(|versions| {
                versions.iter().find(|version| {
                    version.valid_from <= at
                        && version.valid_to.is_none_or(|valid_to| at < valid_to)
                })
            })
            .cloned())
    }

    async fn apply_history(&self, mutation: HistoryMutation) -> PipelineResult<()> {
        let mut inner = self.inner.lock().await;

        if inner.take_write_failure() {
            return Err(pipeline_error!(
                ErrorKind::StoreIoError,
                "Injected history write failure"
            ));
        }

        // Validate against a copy and swap, so a rejected mutation leaves the
        // table untouched.
        let next = apply_history_mutation(&inner.history, mutation)?;
        inner.history = next;

        Ok(())
    }
}
