use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::conflict::Conflict;
use super::ids::Source;

/// Which planning strategy produced this session's change set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    Incremental,
    Full,
    Custom,
}

impl Default for SyncMode {
    fn default() -> Self {
        SyncMode::Incremental
    }
}

/// Running counters tracked for the duration of a session.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SessionCounters {
    pub total: usize,
    pub processed: usize,
    pub skipped: usize,
    pub errors: usize,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub failed: usize,
    pub conflicts_detected: usize,
    pub conflicts_auto_resolved: usize,
    pub conflicts_manual_required: usize,
}

/// One end-to-end invocation of `sync()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub mode: SyncMode,
    pub adapters: Vec<Source>,
    pub counters: SessionCounters,
    pub conflicts: Vec<Conflict>,
    pub errors: Vec<String>,
    pub last_checkpoint: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(mode: SyncMode, adapters: Vec<Source>, started_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            started_at,
            completed_at: None,
            mode,
            adapters,
            counters: SessionCounters::default(),
            conflicts: Vec::new(),
            errors: Vec::new(),
            last_checkpoint: None,
        }
    }

    pub fn complete(&mut self, completed_at: DateTime<Utc>) {
        self.completed_at = Some(completed_at);
    }

    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }
}
