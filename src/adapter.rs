//! External Interfaces (§6): the Adapter contract and registry. Adapters are
//! the core's only window onto a data source — the library scanner, the
//! server HTTP client, the file-tree reader — and none of their
//! protocol-specific logic lives in this crate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::AdapterError;
use crate::model::{Change, EntityType, Manifest, ManifestEntry, Source};

/// What an adapter is capable of; the Engine and Executor consult this to
/// decide planning strategy and concurrency, never by probing behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterCapabilities {
    pub incremental_sync: bool,
    pub batch_operations: bool,
    pub content_hashing: bool,
    pub resumable: bool,
    pub bidirectional: bool,
    pub parallel_requests: bool,
    pub max_concurrency: usize,
    pub entity_types: Vec<EntityType>,
}

impl Default for AdapterCapabilities {
    fn default() -> Self {
        Self {
            incremental_sync: false,
            batch_operations: false,
            content_hashing: false,
            resumable: false,
            bidirectional: false,
            parallel_requests: false,
            max_concurrency: 1,
            entity_types: Vec::new(),
        }
    }
}

/// `get_stats()` response (§6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdapterStats {
    pub total_entities: u64,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub total_size: u64,
    pub pending_changes: u64,
    pub error_count: u64,
}

/// Pagination cursor for `get_manifest` on sources too large to enumerate in
/// one call. Opaque to the core beyond round-tripping it back to the
/// adapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Pagination {
    pub cursor: Option<String>,
    pub page_size: Option<usize>,
}

/// One source's external collaborator. The core never reaches past this
/// trait into the adapter's own protocol, storage, or retry logic.
#[async_trait]
pub trait Adapter: Send + Sync {
    fn source(&self) -> Source;
    fn name(&self) -> &str;
    fn capabilities(&self) -> AdapterCapabilities;

    async fn connect(&self) -> Result<(), AdapterError>;
    async fn disconnect(&self) -> Result<(), AdapterError>;
    async fn test_connection(&self) -> Result<bool, AdapterError>;

    /// Incremental change list since `since` (omit for "everything"),
    /// optionally restricted to `entity_types`.
    async fn detect_changes(
        &self,
        since: Option<DateTime<Utc>>,
        entity_types: Option<&[EntityType]>,
    ) -> Result<Vec<Change>, AdapterError>;

    /// A full point-in-time snapshot, for full syncs and manifest diffing.
    async fn get_manifest(
        &self,
        entity_types: Option<&[EntityType]>,
        pagination: Option<Pagination>,
    ) -> Result<Manifest, AdapterError>;

    /// Ask the adapter itself to diff against a caller-supplied set of local
    /// entries, for adapters that can do this more cheaply than shipping a
    /// full manifest (e.g. a server with its own change-tracking index).
    async fn compare_manifest(&self, local_entries: &[ManifestEntry]) -> Result<Vec<Change>, AdapterError>;

    async fn get_entity(&self, entity_type: EntityType, id: &str) -> Result<Option<serde_json::Value>, AdapterError>;

    /// Default batched form fans out to `get_entity` sequentially; adapters
    /// with genuine batch APIs override this.
    async fn get_entities(
        &self,
        entity_type: EntityType,
        ids: &[String],
    ) -> Result<Vec<Option<serde_json::Value>>, AdapterError> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            out.push(self.get_entity(entity_type, id).await?);
        }
        Ok(out)
    }

    async fn apply_change(&self, change: &Change) -> Result<(), AdapterError>;

    /// Default bulk form applies sequentially; adapters with a real batch
    /// endpoint override this for throughput.
    async fn apply_changes(&self, changes: &[Change]) -> Result<(), AdapterError> {
        for change in changes {
            self.apply_change(change).await?;
        }
        Ok(())
    }

    async fn get_stats(&self) -> Result<AdapterStats, AdapterError>;
}

/// Registry of adapters keyed by source type, consulted by the Engine to
/// plan a run.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: FxHashMap<Source, Arc<dyn Adapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn Adapter>) {
        self.adapters.insert(adapter.source(), adapter);
    }

    pub fn get(&self, source: Source) -> Option<Arc<dyn Adapter>> {
        self.adapters.get(&source).cloned()
    }

    pub fn sources(&self) -> Vec<Source> {
        self.adapters.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Source, &Arc<dyn Adapter>)> {
        self.adapters.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }
}
