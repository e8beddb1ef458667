use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::{ErrorKind, PipelineResult};
use crate::pipeline_error;
use crate::source::{Source, SourceRecord};
use crate::types::Offset;

/// Inner state of [`MemorySource`].
#[derive(Debug, Default)]
struct Inner {
    /// Records per source id, kept sorted by offset.
    records: BTreeMap<String, Vec<SourceRecord>>,
    /// When set, every read fails with `SourceUnavailable`.
    unavailable: bool,
}

/// In-memory source for tests and development.
///
/// Records are pushed per source id and served back from any offset.
/// Availability can be toggled to exercise the `SourceUnavailable` path.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    inner: Arc<Mutex<Inner>>,
}

impl MemorySource {
    /// Creates a new empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record for the given source id.
    ///
    /// Records should be pushed in offset order; reads return them as pushed.
    pub async fn push(&self, source_id: &str, record: SourceRecord) {
        let mut inner = self.inner.lock().await;
        inner
            .records
            .entry(source_id.to_string())
            .or_default()
            .push(record);
    }

    /// Toggles the unavailable condition for subsequent reads.
    pub async fn set_unavailable(&self, unavailable: bool) {
        let mut inner = self.inner.lock().await;
        inner.unavailable = unavailable;
    }
}

impl Source for MemorySource {
    async fn read_since(
        &self,
        source_id: &str,
        offset: Option<Offset>,
    ) -> PipelineResult<Vec<SourceRecord>> {
        let inner = self.inner.lock().await;

        if inner.unavailable {
            return Err(pipeline_error!(
                ErrorKind::SourceUnavailable,
                "Source is unavailable",
                format!("source `{source_id}` cannot be read")
            ));
        }

        let records = inner
            .records
            .get(source_id)
            .map(|records| {
                records
                    .iter()
                    .filter(|record| offset.is_none_or(|offset| record.offset > offset))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        Ok(records)
    }
}
