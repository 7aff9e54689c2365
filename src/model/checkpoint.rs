use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use super::change::Change;
use super::conflict::Conflict;
use super::ids::Source;

/// A durable snapshot of a session's in-progress state, sufficient to resume
/// it without repeating completed work or losing in-flight conflicts (§3, §4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub pending_changes: Vec<Change>,
    /// Unresolved conflicts only — resolved ones are dropped from the
    /// checkpoint, since they can never be re-emitted (§4.7 invariant).
    pub pending_conflicts: Vec<Conflict>,
    pub adapter_progress: FxHashMap<Source, usize>,
    pub last_sync_timestamp: FxHashMap<Source, DateTime<Utc>>,
}

impl Checkpoint {
    pub fn new(session_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.into(),
            timestamp,
            pending_changes: Vec::new(),
            pending_conflicts: Vec::new(),
            adapter_progress: FxHashMap::default(),
            last_sync_timestamp: FxHashMap::default(),
        }
    }

    /// Only unresolved conflicts may be carried in a checkpoint; resolved
    /// ones are dropped here rather than trusted to be pre-filtered by the
    /// caller.
    pub fn set_pending_conflicts(&mut self, conflicts: Vec<Conflict>) {
        self.pending_conflicts = conflicts.into_iter().filter(|c| !c.resolved).collect();
    }
}
