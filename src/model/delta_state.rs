use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::EntityType;

/// Per-entity durable record of last-known content identity and sync time,
/// keyed `(source, id)` in the Store. Invariant: `last_synced <=
/// last_modified <= now`, and `last_synced` is monotonically non-decreasing
/// for a given key — enforced by [`DeltaState::advance`] rather than by
/// direct field mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaState {
    pub hash: Option<String>,
    pub last_modified: DateTime<Utc>,
    pub last_synced: DateTime<Utc>,
    pub entity_type: EntityType,
    pub size: Option<u64>,
}

impl DeltaState {
    pub fn new(entity_type: EntityType, last_modified: DateTime<Utc>, last_synced: DateTime<Utc>) -> Self {
        Self {
            hash: None,
            last_modified,
            last_synced,
            entity_type,
            size: None,
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

    /// Advance this state after a successful apply: `hash := change.hash`,
    /// `last_modified := change.timestamp`, `last_synced := now`. Refuses to
    /// move `last_synced` backwards.
    pub fn advance(&mut self, hash: Option<String>, last_modified: DateTime<Utc>, now: DateTime<Utc>) {
        self.hash = hash;
        self.last_modified = last_modified;
        self.last_synced = self.last_synced.max(now);
    }

    /// `has_local_modifications` (§4.3): true iff
    /// `last_modified > last_synced + grace`, where `grace` absorbs clock
    /// resolution noise (default 1s).
    pub fn has_local_modifications(&self, grace: chrono::Duration) -> bool {
        self.last_modified > self.last_synced + grace
    }
}

/// Default clock-resolution grace period used by `has_local_modifications`.
pub fn default_grace() -> chrono::Duration {
    chrono::Duration::seconds(1)
}
