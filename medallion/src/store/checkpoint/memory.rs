use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::{ErrorKind, PipelineResult};
use crate::pipeline_error;
use crate::store::checkpoint::{AdvanceMode, CheckpointStore, Stage};
use crate::types::Offset;

type CheckpointKey = (Stage, String);

/// Inner state of [`MemoryCheckpointStore`].
#[derive(Debug, Default)]
struct Inner {
    /// Last applied offset per stage and key.
    offsets: BTreeMap<CheckpointKey, Offset>,
    /// Per-key advance locks. Entries are created lazily and never removed.
    locks: BTreeMap<CheckpointKey, Arc<Mutex<()>>>,
}

/// In-memory checkpoint store for tests and development.
///
/// Serializes advances per `(stage, key)` with a dedicated lock while letting
/// distinct keys advance concurrently. The write closure runs while the key
/// lock is held; the offset is only updated after the closure succeeds, so a
/// failed write leaves the checkpoint untouched.
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryCheckpointStore {
    /// Creates a new empty checkpoint store.
    pub fn new() -> Self {
        Self::default()
    }

    async fn key_lock(&self, stage: Stage, key: &str) -> Arc<Mutex<()>> {
        let mut inner = self.inner.lock().await;
        inner
            .locks
            .entry((stage, key.to_string()))
            .or_default()
            .clone()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    async fn get(&self, stage: Stage, key: &str) -> PipelineResult<Option<Offset>> {
        let inner = self.inner.lock().await;

        Ok(inner.offsets.get(&(stage, key.to_string())).copied())
    }

    async fn advance<F, Fut>(
        &self,
        stage: Stage,
        key: &str,
        new_offset: Offset,
        mode: AdvanceMode,
        write_fn: F,
    ) -> PipelineResult<()>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = PipelineResult<()>> + Send,
    {
        let key_lock = self.key_lock(stage, key).await;
        let _guard = key_lock.lock().await;

        let current = {
            let inner = self.inner.lock().await;
            inner.offsets.get(&(stage, key.to_string())).copied()
        };

        if mode == AdvanceMode::Strict
            && let Some(current) = current
            && new_offset <= current
        {
            return Err(pipeline_error!(
                ErrorKind::StaleOffset,
                "Checkpoint offset would not advance",
                format!("stage `{stage}` key `{key}`: new offset {new_offset} <= current {current}")
            ));
        }

        // The write and the offset update commit together: the offset is only
        // set once the write closure returned successfully, and the key lock
        // is held across both.
        write_fn().await?;

        let mut inner = self.inner.lock().await;
        inner.offsets.insert((stage, key.to_string()), new_offset);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn advances_monotonically() {
        let store = MemoryCheckpointStore::new();

        store
            .advance(Stage::Ingest, "s1", Offset(5), AdvanceMode::Strict, || async {
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(store.get(Stage::Ingest, "s1").await.unwrap(), Some(Offset(5)));

        store
            .advance(Stage::Ingest, "s1", Offset(9), AdvanceMode::Strict, || async {
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(store.get(Stage::Ingest, "s1").await.unwrap(), Some(Offset(9)));
    }

    #[tokio::test]
    async fn rejects_stale_offsets() {
        let store = MemoryCheckpointStore::new();

        store
            .advance(Stage::Clean, "s1", Offset(7), AdvanceMode::Strict, || async {
                Ok(())
            })
            .await
            .unwrap();

        let err = store
            .advance(Stage::Clean, "s1", Offset(7), AdvanceMode::Strict, || async {
                Ok(())
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StaleOffset);

        // The checkpoint is unchanged after the rejected advance.
        assert_eq!(store.get(Stage::Clean, "s1").await.unwrap(), Some(Offset(7)));
    }

    #[tokio::test]
    async fn rewind_requires_explicit_mode() {
        let store = MemoryCheckpointStore::new();

        store
            .advance(Stage::Merge, "t1", Offset(10), AdvanceMode::Strict, || async {
                Ok(())
            })
            .await
            .unwrap();

        store
            .advance(
                Stage::Merge,
                "t1",
                Offset(3),
                AdvanceMode::AllowRewind,
                || async { Ok(()) },
            )
            .await
            .unwrap();
        assert_eq!(store.get(Stage::Merge, "t1").await.unwrap(), Some(Offset(3)));
    }

    #[tokio::test]
    async fn failed_write_leaves_checkpoint_untouched() {
        let store = MemoryCheckpointStore::new();

        let result = store
            .advance(Stage::Ingest, "s1", Offset(4), AdvanceMode::Strict, || async {
                Err(pipeline_error!(
                    ErrorKind::StoreIoError,
                    "Simulated write failure"
                ))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(store.get(Stage::Ingest, "s1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn distinct_keys_are_independent() {
        let store = MemoryCheckpointStore::new();

        store
            .advance(Stage::Ingest, "s1", Offset(5), AdvanceMode::Strict, || async {
                Ok(())
            })
            .await
            .unwrap();
        store
            .advance(Stage::Ingest, "s2", Offset(1), AdvanceMode::Strict, || async {
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(store.get(Stage::Ingest, "s1").await.unwrap(), Some(Offset(5)));
        assert_eq!(store.get(Stage::Ingest, "s2").await.unwrap(), Some(Offset(1)));
    }
}
