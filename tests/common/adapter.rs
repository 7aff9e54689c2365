//! A configurable `Adapter` fixture for integration tests, independent of
//! the crate's own `#[cfg(test)]` `adapter::testing::MockAdapter` (which is
//! only visible to the crate's unit tests, not to external integration
//! tests). Drives the same contract a real library/server/file adapter
//! would, but entirely in memory.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use synccore::adapter::{Adapter, AdapterCapabilities, AdapterStats, Pagination};
use synccore::error::AdapterError;
use synccore::model::{Change, EntityType, Manifest, ManifestEntry, Source};

pub struct TestAdapter {
    source: Source,
    name: String,
    pending: RwLock<Vec<Change>>,
    manifest_entries: RwLock<Vec<ManifestEntry>>,
    entities: RwLock<FxHashMap<String, serde_json::Value>>,
    applied: RwLock<Vec<Change>>,
    fail_apply_for: RwLock<FxHashMap<String, u32>>,
}

impl TestAdapter {
    pub fn new(source: Source, name: impl Into<String>) -> Self {
        Self {
            source,
            name: name.into(),
            pending: RwLock::new(Vec::new()),
            manifest_entries: RwLock::new(Vec::new()),
            entities: RwLock::new(FxHashMap::default()),
            applied: RwLock::new(Vec::new()),
            fail_apply_for: RwLock::new(FxHashMap::default()),
        }
    }

    pub fn queue_change(&self, change: Change) {
        self.pending.write().push(change);
    }

    pub fn set_manifest_entries(&self, entries: Vec<ManifestEntry>) {
        *self.manifest_entries.write() = entries;
    }

    pub fn put_entity(&self, id: impl Into<String>, value: serde_json::Value) {
        self.entities.write().insert(id.into(), value);
    }

    /// Make `apply_change` fail `times` times for `entity_id` before
    /// succeeding, to drive retry-under-transient-failure tests (S5).
    pub fn fail_next(&self, entity_id: &str, times: u32) {
        self.fail_apply_for.write().insert(entity_id.to_string(), times);
    }

    pub fn applied(&self) -> Vec<Change> {
        self.applied.read().clone()
    }

    pub fn clear_pending(&self) {
        self.pending.write().clear();
    }
}

#[async_trait]
impl Adapter for TestAdapter {
    fn source(&self) -> Source {
        self.source
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            incremental_sync: true,
            batch_operations: true,
            content_hashing: true,
            resumable: true,
            bidirectional: true,
            parallel_requests: true,
            max_concurrency: 8,
            entity_types: vec![EntityType::Book, EntityType::Progress, EntityType::Note, EntityType::Highlight],
        }
    }

    async fn connect(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn test_connection(&self) -> Result<bool, AdapterError> {
        Ok(true)
    }

    async fn detect_changes(
        &self,
        _since: Option<DateTime<Utc>>,
        _entity_types: Option<&[EntityType]>,
    ) -> Result<Vec<Change>, AdapterError> {
        Ok(self.pending.read().clone())
    }

    async fn get_manifest(
        &self,
        _entity_types: Option<&[EntityType]>,
        _pagination: Option<Pagination>,
    ) -> Result<Manifest, AdapterError> {
        Ok(Manifest::new(self.source, self.manifest_entries.read().clone()))
    }

    async fn compare_manifest(&self, _local_entries: &[ManifestEntry]) -> Result<Vec<Change>, AdapterError> {
        Ok(self.pending.read().clone())
    }

    async fn get_entity(&self, _entity_type: EntityType, id: &str) -> Result<Option<serde_json::Value>, AdapterError> {
        Ok(self.entities.read().get(id).cloned())
    }

    async fn apply_change(&self, change: &Change) -> Result<(), AdapterError> {
        let id = change.entity_id.as_str().to_string();
        {
            let mut remaining = self.fail_apply_for.write();
            if let Some(count) = remaining.get_mut(&id) {
                if *count > 0 {
                    *count -= 1;
                    return Err(AdapterError::Apply {
                        source: self.name.clone(),
                        entity_id: id,
                        message: "transient failure".to_string(),
                    });
                }
            }
        }
        self.applied.write().push(change.clone());
        Ok(())
    }

    async fn get_stats(&self) -> Result<AdapterStats, AdapterError> {
        Ok(AdapterStats {
            total_entities: self.entities.read().len() as u64,
            last_sync_at: None,
            total_size: 0,
            pending_changes: self.pending.read().len() as u64,
            error_count: 0,
        })
    }
}
