use serde::{Deserialize, Serialize};

use super::state::EngineState;

/// The external progress channel (§6): emitted on every pending-queue
/// transition, carried by `SyncEvent::Progress`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncProgress {
    pub session_id: String,
    pub status: EngineState,
    pub phase: String,
    pub total: usize,
    pub processed: usize,
    pub skipped: usize,
    pub errors: usize,
    pub percentage: f64,
    pub current_item: Option<String>,
    pub eta_sec: Option<f64>,
    pub speed_items_per_sec: Option<f64>,
    pub memory_bytes: Option<u64>,
}

impl SyncProgress {
    pub fn new(session_id: impl Into<String>, status: EngineState, phase: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            status,
            phase: phase.into(),
            total: 0,
            processed: 0,
            skipped: 0,
            errors: 0,
            percentage: 0.0,
            current_item: None,
            eta_sec: None,
            speed_items_per_sec: None,
            memory_bytes: None,
        }
    }
}
