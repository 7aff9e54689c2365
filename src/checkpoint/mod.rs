//! Checkpoint Manager (§4.8): periodic durable snapshot of pending changes
//! and unresolved conflicts, with resume discovery and reclamation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use tokio::sync::Mutex as AsyncMutex;
use tracing::instrument;

use crate::error::StoreError;
use crate::model::{Change, Checkpoint, Conflict, Source};
use crate::store::{CheckpointRecord, Store};

/// Checkpoint cadence and retention, mirroring `config::CheckpointConfig`.
#[derive(Debug, Clone, Copy)]
pub struct CheckpointPolicy {
    pub checkpoint_interval: u32,
    pub max_age: chrono::Duration,
    pub max_checkpoints: usize,
}

impl Default for CheckpointPolicy {
    fn default() -> Self {
        Self {
            checkpoint_interval: 50,
            max_age: chrono::Duration::days(7),
            max_checkpoints: 10,
        }
    }
}

/// Owns the in-memory "current checkpoint" for one session, mutated only by
/// the caller that drives the session loop and persisted through the Store.
/// Checkpoint writes are serialized by the internal async mutex — at most
/// one write in flight at a time (§5).
pub struct CheckpointManager {
    store: Arc<dyn Store>,
    policy: CheckpointPolicy,
    write_gate: AsyncMutex<()>,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn Store>, policy: CheckpointPolicy) -> Self {
        Self {
            store,
            policy,
            write_gate: AsyncMutex::new(()),
        }
    }

    /// Create a checkpoint at session start with empty pending sets and the
    /// initial adapter progress counters.
    pub fn create(&self, session_id: impl Into<String>, now: DateTime<Utc>) -> Checkpoint {
        Checkpoint::new(session_id, now)
    }

    /// Persist the current pending state. Called every
    /// `checkpoint_interval` completions by the caller. Overwriting the same
    /// `session_id` is idempotent — the newer `updated_at` simply wins.
    #[instrument(skip(self, checkpoint), err)]
    pub async fn update(&self, checkpoint: &Checkpoint, now: DateTime<Utc>) -> Result<(), StoreError> {
        let _gate = self.write_gate.lock().await;
        let created_at = match self.store.get_checkpoint(&checkpoint.session_id).await? {
            Some(existing) => existing.created_at,
            None => now,
        };
        self.store
            .put_checkpoint(CheckpointRecord {
                checkpoint: checkpoint.clone(),
                created_at,
                updated_at: now,
                complete: false,
            })
            .await
    }

    /// Mark the session's checkpoint complete; it is exempted from future
    /// resume discovery.
    #[instrument(skip(self), err)]
    pub async fn complete(&self, session_id: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        let _gate = self.write_gate.lock().await;
        self.store.mark_checkpoint_complete(session_id, now).await
    }

    /// List incomplete checkpoints, most recent first — the resume
    /// discovery a host calls at startup.
    pub async fn discover_resumable(&self) -> Result<Vec<CheckpointRecord>, StoreError> {
        self.store.list_incomplete_checkpoints().await
    }

    pub async fn load(&self, session_id: &str) -> Result<Option<CheckpointRecord>, StoreError> {
        self.store.get_checkpoint(session_id).await
    }

    /// Delete checkpoints older than `max_age`, then trim complete
    /// checkpoints down to `max_checkpoints`, keeping the most recent.
    /// Called once at initialization.
    #[instrument(skip(self), err)]
    pub async fn reclaim(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut reclaimed = 0;
        let incomplete = self.store.list_incomplete_checkpoints().await?;
        for record in incomplete {
            if now - record.updated_at >= self.policy.max_age {
                self.store.delete_checkpoint(&record.checkpoint.session_id).await?;
                reclaimed += 1;
            }
        }
        let mut complete = self.store.list_complete_checkpoints().await?;
        for record in &complete {
            if now - record.updated_at >= self.policy.max_age {
                self.store.delete_checkpoint(&record.checkpoint.session_id).await?;
            }
        }
        complete.retain(|r| now - r.updated_at < self.policy.max_age);
        if complete.len() > self.policy.max_checkpoints {
            // `complete` is already sorted most-recent-first by the store.
            for record in complete.into_iter().skip(self.policy.max_checkpoints) {
                self.store.delete_checkpoint(&record.checkpoint.session_id).await?;
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }
}

/// Convenience constructor for the `pending_changes`/`pending_conflicts`
/// portion of a checkpoint, used by the Sync Engine when it snapshots
/// in-flight executor state.
pub fn snapshot(
    session_id: impl Into<String>,
    now: DateTime<Utc>,
    pending_changes: Vec<Change>,
    pending_conflicts: Vec<Conflict>,
    adapter_progress: FxHashMap<Source, usize>,
    last_sync_timestamp: FxHashMap<Source, DateTime<Utc>>,
) -> Checkpoint {
    let mut checkpoint = Checkpoint::new(session_id, now);
    checkpoint.pending_changes = pending_changes;
    checkpoint.set_pending_conflicts(pending_conflicts);
    checkpoint.adapter_progress = adapter_progress;
    checkpoint.last_sync_timestamp = last_sync_timestamp;
    checkpoint
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityType, Operation};
    use crate::store::InMemoryStore;
    use chrono::Duration as ChronoDuration;

    #[tokio::test]
    async fn update_then_complete_round_trips() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let manager = CheckpointManager::new(Arc::clone(&store), CheckpointPolicy::default());
        let now = Utc::now();
        let change = Change::new(Source::Library, EntityType::Book, "a", Operation::Update, now);
        let checkpoint = snapshot("s1", now, vec![change], vec![], FxHashMap::default(), FxHashMap::default());

        manager.update(&checkpoint, now).await.unwrap();
        let loaded = manager.load("s1").await.unwrap().unwrap();
        assert!(!loaded.complete);
        assert_eq!(loaded.checkpoint.pending_changes.len(), 1);

        manager.complete("s1", now).await.unwrap();
        let loaded = manager.load("s1").await.unwrap().unwrap();
        assert!(loaded.complete);

        let resumable = manager.discover_resumable().await.unwrap();
        assert!(resumable.is_empty());
    }

    #[tokio::test]
    async fn reclaims_checkpoints_older_than_max_age() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let policy = CheckpointPolicy {
            max_age: ChronoDuration::days(7),
            ..CheckpointPolicy::default()
        };
        let manager = CheckpointManager::new(Arc::clone(&store), policy);
        let old_time = Utc::now() - ChronoDuration::days(8);
        let checkpoint = snapshot("stale", old_time, vec![], vec![], FxHashMap::default(), FxHashMap::default());
        manager.update(&checkpoint, old_time).await.unwrap();

        let reclaimed = manager.reclaim(Utc::now()).await.unwrap();
        assert_eq!(reclaimed, 1);
        assert!(manager.load("stale").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn keeps_at_most_max_checkpoints_complete_ones() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let policy = CheckpointPolicy {
            max_checkpoints: 2,
            ..CheckpointPolicy::default()
        };
        let manager = CheckpointManager::new(Arc::clone(&store), policy);
        let now = Utc::now();
        for i in 0..5 {
            let ts = now + ChronoDuration::seconds(i);
            let id = format!("s{i}");
            let checkpoint = snapshot(&id, ts, vec![], vec![], FxHashMap::default(), FxHashMap::default());
            manager.update(&checkpoint, ts).await.unwrap();
            manager.complete(&id, ts).await.unwrap();
        }
        manager.reclaim(now + ChronoDuration::seconds(10)).await.unwrap();
        let remaining = store.list_complete_checkpoints().await.unwrap();
        assert_eq!(remaining.len(), 2);
    }
}
