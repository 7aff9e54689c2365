use std::sync::Arc;

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use tracing::instrument;

use crate::error::StoreError;
use crate::hash::Hasher;
use crate::model::{Change, DeltaState, ManifestEntry, Operation, Source, default_grace};
use crate::store::Store;

/// Result of comparing a remote manifest against locally tracked state.
#[derive(Debug, Clone, Default)]
pub struct DetectedChanges {
    pub added: Vec<ManifestEntry>,
    pub modified: Vec<ManifestEntry>,
    pub deleted: Vec<String>,
    pub unchanged: Vec<ManifestEntry>,
}

/// Outcome of rehashing a set of entries against their stored hashes.
#[derive(Debug, Clone, Default)]
pub struct IntegrityReport {
    pub valid: Vec<String>,
    pub invalid: Vec<String>,
    pub missing: Vec<String>,
}

/// Per-source record of last-known hash, last-modified, and last-synced per
/// entity, answering "what changed?" given a fresh manifest.
pub struct DeltaTracker {
    store: Arc<dyn Store>,
    grace: chrono::Duration,
}

impl DeltaTracker {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            grace: default_grace(),
        }
    }

    #[must_use]
    pub fn with_grace(mut self, grace: chrono::Duration) -> Self {
        self.grace = grace;
        self
    }

    /// `changed?(local, remote)` (§4.3): true if hashes differ, or if hashes
    /// are missing and the remote timestamp is strictly newer. A tied
    /// timestamp with a matching hash is unchanged.
    pub fn changed(local: &DeltaState, remote: &ManifestEntry) -> bool {
        match (&local.hash, &remote.hash) {
            (Some(l), Some(r)) => l != r,
            _ => remote.last_modified > local.last_modified,
        }
    }

    /// `has_local_modifications` (§4.3): the single source of truth used by
    /// the Conflict Resolver.
    pub fn has_local_modifications(&self, state: &DeltaState) -> bool {
        state.has_local_modifications(self.grace)
    }

    /// `detect_changes(source, remote_manifest)` (§4.3): O(n+m) via hash maps
    /// keyed by entity id.
    #[instrument(skip(self, remote_entries), err)]
    pub async fn detect_changes(
        &self,
        source: Source,
        remote_entries: &[ManifestEntry],
    ) -> Result<DetectedChanges, StoreError> {
        let local_states = self.store.get_all_delta_states(source).await?;
        let local_by_id: FxHashMap<&str, &DeltaState> =
            local_states.iter().map(|(id, state)| (id.as_str(), state)).collect();
        let remote_by_id: FxHashMap<&str, &ManifestEntry> =
            remote_entries.iter().map(|e| (e.id.as_str(), e)).collect();

        let mut result = DetectedChanges::default();
        for entry in remote_entries {
            match local_by_id.get(entry.id.as_str()) {
                None => result.added.push(entry.clone()),
                Some(local) => {
                    if Self::changed(local, entry) {
                        result.modified.push(entry.clone());
                    } else {
                        result.unchanged.push(entry.clone());
                    }
                }
            }
        }
        for (id, _) in local_states.iter() {
            if !remote_by_id.contains_key(id.as_str()) {
                result.deleted.push(id.clone());
            }
        }
        Ok(result)
    }

    /// Write back `(hash, last_modified, last_synced)` after a successful
    /// apply of `change`.
    #[instrument(skip(self, change), err)]
    pub async fn record_applied(&self, change: &Change, now: DateTime<Utc>) -> Result<(), StoreError> {
        let key = change.key();
        let existing = self
            .store
            .get_delta_state(key.source, key.entity_id.as_str())
            .await?;
        let mut state = existing.unwrap_or_else(|| DeltaState::new(key.entity_type, change.timestamp, now));
        state.advance(change.hash.clone(), change.timestamp, now);
        self.store
            .put_delta_state(key.source, key.entity_id.as_str(), state)
            .await
    }

    /// Remove the delta state for an entity the authoritative source has
    /// dropped (§3 lifecycle).
    #[instrument(skip(self), err)]
    pub async fn record_deleted(&self, source: Source, id: &str) -> Result<(), StoreError> {
        self.store.delete_delta_state(source, id).await
    }

    /// Rehash a set of `(id, content)` pairs against their stored hashes and
    /// partition into valid/invalid/missing.
    #[instrument(skip(self, entries, hasher), err)]
    pub async fn verify_integrity(
        &self,
        source: Source,
        entries: &[(String, serde_json::Value)],
        hasher: &Hasher,
    ) -> Result<IntegrityReport, StoreError> {
        let mut report = IntegrityReport::default();
        for (id, content) in entries {
            match self.store.get_delta_state(source, id).await? {
                None => report.missing.push(id.clone()),
                Some(state) => {
                    let expected = hasher.hash_value(content);
                    match &state.hash {
                        Some(stored) if *stored == expected => report.valid.push(id.clone()),
                        _ => report.invalid.push(id.clone()),
                    }
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntityType;
    use crate::store::InMemoryStore;
    use chrono::Utc;

    fn manifest_entry(id: &str, hash: Option<&str>, last_modified: DateTime<Utc>) -> ManifestEntry {
        let mut entry = ManifestEntry::new(id, EntityType::Book, last_modified);
        entry.hash = hash.map(|h| h.to_string());
        entry
    }

    #[tokio::test]
    async fn detects_added_modified_deleted_unchanged() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let now = Utc::now();
        store
            .put_delta_state(
                Source::Library,
                "keep",
                DeltaState::new(EntityType::Book, now, now).with_hash("h1"),
            )
            .await
            .unwrap();
        store
            .put_delta_state(
                Source::Library,
                "stale",
                DeltaState::new(EntityType::Book, now, now).with_hash("h2"),
            )
            .await
            .unwrap();
        store
            .put_delta_state(
                Source::Library,
                "gone",
                DeltaState::new(EntityType::Book, now, now).with_hash("h3"),
            )
            .await
            .unwrap();

        let tracker = DeltaTracker::new(Arc::clone(&store));
        let remote = vec![
            manifest_entry("keep", Some("h1"), now),
            manifest_entry("stale", Some("h2-new"), now),
            manifest_entry("new", Some("h4"), now),
        ];
        let diff = tracker.detect_changes(Source::Library, &remote).await.unwrap();
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.added[0].id.as_str(), "new");
        assert_eq!(diff.modified.len(), 1);
        assert_eq!(diff.modified[0].id.as_str(), "stale");
        assert_eq!(diff.deleted, vec!["gone".to_string()]);
        assert_eq!(diff.unchanged.len(), 1);
        assert_eq!(diff.unchanged[0].id.as_str(), "keep");
    }

    #[tokio::test]
    async fn tied_timestamp_with_missing_hash_is_unchanged() {
        let now = Utc::now();
        let local = DeltaState::new(EntityType::Book, now, now);
        let remote = manifest_entry("x", None, now);
        assert!(!DeltaTracker::changed(&local, &remote));
    }

    #[tokio::test]
    async fn record_applied_advances_last_synced_monotonically() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let tracker = DeltaTracker::new(Arc::clone(&store));
        let t0 = Utc::now();
        let change = Change::new(Source::Library, EntityType::Book, "a", Operation::Update, t0)
            .with_hash("h1");
        tracker.record_applied(&change, t0).await.unwrap();
        let state = store.get_delta_state(Source::Library, "a").await.unwrap().unwrap();
        assert_eq!(state.hash.as_deref(), Some("h1"));
        assert!(state.last_synced >= t0);
    }
}
