//! Persistent Store (§4.1): a namespaced key-value store for delta states,
//! sync metadata, checkpoints, and cached manifests. Exclusively owns all
//! persisted records — no other component mutates durable state directly.

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::InMemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::model::{Checkpoint, DeltaState, Manifest, Source};

/// Per-source bookkeeping kept in the `sync_metadata` collection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncMetadata {
    pub last_sync_time: Option<DateTime<Utc>>,
    pub last_manifest_hash: Option<String>,
    pub total_synced_items: u64,
    pub last_error: Option<String>,
}

/// Record wrapping a persisted checkpoint with store-level bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub checkpoint: Checkpoint,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub complete: bool,
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// The Store's persistence boundary (§6): everything above it is opaque to
/// the core provided round-trip fidelity of the documented fields holds.
///
/// All writes are atomic per key. `put_batch` within one collection is
/// all-or-nothing. Implementations must be `Send + Sync` for use across
/// executor tasks.
#[async_trait]
pub trait Store: Send + Sync {
    // -- delta_states --------------------------------------------------
    async fn get_delta_state(&self, source: Source, id: &str) -> Result<Option<DeltaState>>;
    async fn put_delta_state(&self, source: Source, id: &str, state: DeltaState) -> Result<()>;
    async fn put_delta_states_batch(
        &self,
        entries: Vec<(Source, String, DeltaState)>,
    ) -> Result<()>;
    async fn delete_delta_state(&self, source: Source, id: &str) -> Result<()>;
    async fn get_all_delta_states(&self, source: Source) -> Result<Vec<(String, DeltaState)>>;

    // -- sync_metadata ---------------------------------------------------
    async fn get_sync_metadata(&self, source: Source) -> Result<SyncMetadata>;
    async fn put_sync_metadata(&self, source: Source, metadata: SyncMetadata) -> Result<()>;
    async fn get_last_sync_time(&self, source: Source) -> Result<Option<DateTime<Utc>>>;
    async fn set_last_sync_time(&self, source: Source, time: DateTime<Utc>) -> Result<()>;

    // -- checkpoints -----------------------------------------------------
    async fn put_checkpoint(&self, record: CheckpointRecord) -> Result<()>;
    async fn get_checkpoint(&self, session_id: &str) -> Result<Option<CheckpointRecord>>;
    async fn list_incomplete_checkpoints(&self) -> Result<Vec<CheckpointRecord>>;
    async fn list_complete_checkpoints(&self) -> Result<Vec<CheckpointRecord>>;
    async fn mark_checkpoint_complete(&self, session_id: &str, at: DateTime<Utc>) -> Result<()>;
    async fn delete_checkpoint(&self, session_id: &str) -> Result<()>;

    // -- manifests ---------------------------------------------------------
    async fn get_cached_manifest(&self, source: Source) -> Result<Option<Manifest>>;
    async fn put_cached_manifest(&self, source: Source, manifest: Manifest) -> Result<()>;

    // -- generic helpers used by the persistence boundary (§6) --------------
    async fn clear(&self, source: Option<Source>) -> Result<()>;
}
