//! External source interface consumed by the ingestion stage.

pub mod memory;

use std::collections::BTreeMap;
use std::future::Future;

use crate::error::PipelineResult;
use crate::types::Offset;

/// A record as delivered by an external source, before ingestion metadata is
/// attached.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    /// Source-assigned monotonic offset.
    pub offset: Offset,
    /// Opaque field mapping.
    pub fields: BTreeMap<String, serde_json::Value>,
}

/// Trait for systems the pipeline ingests raw records from.
///
/// Implementations must support resumption from an arbitrary prior offset and
/// must report unavailability through
/// [`ErrorKind::SourceUnavailable`](crate::error::ErrorKind::SourceUnavailable)
/// rather than an empty batch. Returned records must be ordered by strictly
/// increasing offset; the ingestion stage rejects batches that are not.
pub trait Source {
    /// Reads all records with offset strictly greater than `offset`.
    ///
    /// `offset = None` reads from the beginning. An empty vector means "no new
    /// data", which is distinct from the source being unavailable.
    fn read_since(
        &self,
        source_id: &str,
        offset: Option<Offset>,
    ) -> impl Future<Output = PipelineResult<Vec<SourceRecord>>> + Send;
}
