//! Checkpoint store: durable record of consumed offsets per stage and key.

pub mod memory;

use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::error::PipelineResult;
use crate::types::Offset;

/// Pipeline stage owning a checkpoint.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Ingest,
    Clean,
    Merge,
}

impl Stage {
    /// Returns the stable name used in logs and persisted keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Ingest => "ingest",
            Stage::Clean => "clean",
            Stage::Merge => "merge",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Controls whether an advance may move a checkpoint backwards.
///
/// Backward moves are rejected in normal operation; operator-initiated
/// reprocessing supplies [`AdvanceMode::AllowRewind`] explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdvanceMode {
    /// Reject offsets that do not strictly increase the checkpoint.
    #[default]
    Strict,
    /// Permit rewinding the checkpoint for explicit reprocessing.
    AllowRewind,
}

/// Trait for durable checkpoint storage with atomic write-plus-advance.
///
/// The store guarantees that the stage's durable write (performed by the
/// closure handed to [`CheckpointStore::advance`]) and the offset update are
/// applied together or not at all, so a crash between them cannot cause
/// double-apply or silent loss. Concurrent advances for the same
/// `(stage, key)` are serialized; distinct keys proceed independently.
pub trait CheckpointStore {
    /// Returns the last applied offset for `(stage, key)`, if any.
    fn get(
        &self,
        stage: Stage,
        key: &str,
    ) -> impl Future<Output = PipelineResult<Option<Offset>>> + Send;

    /// Runs the stage's durable write and advances the checkpoint atomically.
    ///
    /// Fails with [`ErrorKind::StaleOffset`](crate::error::ErrorKind::StaleOffset)
    /// when `new_offset` does not strictly increase the current checkpoint,
    /// unless `mode` is [`AdvanceMode::AllowRewind`]. When `write_fn` fails,
    /// the checkpoint is left untouched and the error is propagated.
    fn advance<F, Fut>(
        &self,
        stage: Stage,
        key: &str,
        new_offset: Offset,
        mode: AdvanceMode,
        write_fn: F,
    ) -> impl Future<Output = PipelineResult<()>> + Send
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = PipelineResult<()>> + Send;
}
