//! Core data types flowing through the pipeline stages.

mod record;
mod report;
mod value;

pub use record::{BusinessKey, CleanRecord, DeadLetter, DimensionVersion, Offset, RawRecord, RecordHash};
pub use report::{CleanReport, IngestReport, MergeReport, RejectReason};
pub use value::Value;
