use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use super::{CheckpointRecord, Store, SyncMetadata};
use crate::error::StoreError;
use crate::model::{Checkpoint, DeltaState, Manifest, Source};

/// Volatile, process-local `Store`. Fast and non-durable; suitable for tests
/// and ephemeral runs, mirroring the teacher's `InMemoryCheckpointer`.
#[derive(Default)]
pub struct InMemoryStore {
    delta_states: RwLock<FxHashMap<(Source, String), DeltaState>>,
    sync_metadata: RwLock<FxHashMap<Source, SyncMetadata>>,
    checkpoints: RwLock<FxHashMap<String, CheckpointRecord>>,
    manifests: RwLock<FxHashMap<Source, Manifest>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_delta_state(&self, source: Source, id: &str) -> super::Result<Option<DeltaState>> {
        Ok(self.delta_states.read().get(&(source, id.to_string())).cloned())
    }

    async fn put_delta_state(&self, source: Source, id: &str, state: DeltaState) -> super::Result<()> {
        self.delta_states.write().insert((source, id.to_string()), state);
        Ok(())
    }

    async fn put_delta_states_batch(
        &self,
        entries: Vec<(Source, String, DeltaState)>,
    ) -> super::Result<()> {
        // All-or-nothing within the collection: stage first, then commit.
        let mut guard = self.delta_states.write();
        for (source, id, state) in entries {
            guard.insert((source, id), state);
        }
        Ok(())
    }

    async fn delete_delta_state(&self, source: Source, id: &str) -> super::Result<()> {
        self.delta_states.write().remove(&(source, id.to_string()));
        Ok(())
    }

    async fn get_all_delta_states(&self, source: Source) -> super::Result<Vec<(String, DeltaState)>> {
        Ok(self
            .delta_states
            .read()
            .iter()
            .filter(|((s, _), _)| *s == source)
            .map(|((_, id), state)| (id.clone(), state.clone()))
            .collect())
    }

    async fn get_sync_metadata(&self, source: Source) -> super::Result<SyncMetadata> {
        Ok(self.sync_metadata.read().get(&source).cloned().unwrap_or_default())
    }

    async fn put_sync_metadata(&self, source: Source, metadata: SyncMetadata) -> super::Result<()> {
        self.sync_metadata.write().insert(source, metadata);
        Ok(())
    }

    async fn get_last_sync_time(&self, source: Source) -> super::Result<Option<DateTime<Utc>>> {
        Ok(self.sync_metadata.read().get(&source).and_then(|m| m.last_sync_time))
    }

    async fn set_last_sync_time(&self, source: Source, time: DateTime<Utc>) -> super::Result<()> {
        let mut guard = self.sync_metadata.write();
        let entry = guard.entry(source).or_default();
        entry.last_sync_time = Some(time);
        Ok(())
    }

    async fn put_checkpoint(&self, record: CheckpointRecord) -> super::Result<()> {
        self.checkpoints.write().insert(record.checkpoint.session_id.clone(), record);
        Ok(())
    }

    async fn get_checkpoint(&self, session_id: &str) -> super::Result<Option<CheckpointRecord>> {
        Ok(self.checkpoints.read().get(session_id).cloned())
    }

    async fn list_incomplete_checkpoints(&self) -> super::Result<Vec<CheckpointRecord>> {
        let mut out: Vec<CheckpointRecord> = self
            .checkpoints
            .read()
            .values()
            .filter(|r| !r.complete)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(out)
    }

    async fn list_complete_checkpoints(&self) -> super::Result<Vec<CheckpointRecord>> {
        let mut out: Vec<CheckpointRecord> = self
            .checkpoints
            .read()
            .values()
            .filter(|r| r.complete)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(out)
    }

    async fn mark_checkpoint_complete(&self, session_id: &str, at: DateTime<Utc>) -> super::Result<()> {
        let mut guard = self.checkpoints.write();
        match guard.get_mut(session_id) {
            Some(record) => {
                record.complete = true;
                record.updated_at = at;
                Ok(())
            }
            None => Err(StoreError::NotFound {
                key: session_id.to_string(),
            }),
        }
    }

    async fn delete_checkpoint(&self, session_id: &str) -> super::Result<()> {
        self.checkpoints.write().remove(session_id);
        Ok(())
    }

    async fn get_cached_manifest(&self, source: Source) -> super::Result<Option<Manifest>> {
        Ok(self.manifests.read().get(&source).cloned())
    }

    async fn put_cached_manifest(&self, source: Source, manifest: Manifest) -> super::Result<()> {
        self.manifests.write().insert(source, manifest);
        Ok(())
    }

    async fn clear(&self, source: Option<Source>) -> super::Result<()> {
        match source {
            Some(s) => {
                self.delta_states.write().retain(|(src, _), _| *src != s);
                self.sync_metadata.write().remove(&s);
                self.manifests.write().remove(&s);
            }
            None => {
                self.delta_states.write().clear();
                self.sync_metadata.write().clear();
                self.manifests.write().clear();
                self.checkpoints.write().clear();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntityType;
    use chrono::Utc;

    #[tokio::test]
    async fn round_trips_delta_state() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let state = DeltaState::new(EntityType::Book, now, now).with_hash("abc");
        store.put_delta_state(Source::Library, "book-1", state.clone()).await.unwrap();
        let loaded = store.get_delta_state(Source::Library, "book-1").await.unwrap();
        assert_eq!(loaded, Some(state));
    }

    #[tokio::test]
    async fn clear_scoped_to_source_leaves_others() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store
            .put_delta_state(Source::Library, "a", DeltaState::new(EntityType::Book, now, now))
            .await
            .unwrap();
        store
            .put_delta_state(Source::Server, "b", DeltaState::new(EntityType::Progress, now, now))
            .await
            .unwrap();
        store.clear(Some(Source::Library)).await.unwrap();
        assert!(store.get_delta_state(Source::Library, "a").await.unwrap().is_none());
        assert!(store.get_delta_state(Source::Server, "b").await.unwrap().is_some());
    }
}
