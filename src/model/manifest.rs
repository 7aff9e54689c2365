use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use super::ids::{EntityId, EntityType, Source};

/// One entry in a point-in-time snapshot of a source's entities.
///
/// `metadata` is treated as an opaque map of string to scalar-or-structured
/// value; fields the originating source derives for its own purposes (e.g. a
/// `coverage_ratio`-shaped figure unrelated to sync) are preserved here
/// without the core interpreting them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub id: EntityId,
    pub entity_type: EntityType,
    pub hash: Option<String>,
    pub last_modified: DateTime<Utc>,
    pub size: Option<u64>,
    pub metadata: Option<FxHashMap<String, serde_json::Value>>,
}

impl ManifestEntry {
    pub fn new(id: impl Into<EntityId>, entity_type: EntityType, last_modified: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            entity_type,
            hash: None,
            last_modified,
            size: None,
            metadata: None,
        }
    }

    #[must_use]
    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = Some(hash.into());
        self
    }

    #[must_use]
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: FxHashMap<String, serde_json::Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// A versioned snapshot of all entities an adapter can see at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub generated_at: DateTime<Utc>,
    pub source: Source,
    pub entries: Vec<ManifestEntry>,
    pub total_count: usize,
    pub total_size: u64,
}

impl Manifest {
    pub fn new(source: Source, entries: Vec<ManifestEntry>) -> Self {
        let total_count = entries.len();
        let total_size = entries.iter().filter_map(|e| e.size).sum();
        Self {
            version: 1,
            generated_at: Utc::now(),
            source,
            total_count,
            total_size,
            entries,
        }
    }

    pub fn index_by_id(&self) -> FxHashMap<&EntityId, &ManifestEntry> {
        self.entries.iter().map(|e| (&e.id, e)).collect()
    }
}
