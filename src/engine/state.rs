use serde::{Deserialize, Serialize};

/// The Sync Engine's run state (§4.9): a plain enum matched exhaustively,
/// following the teacher's preference for explicit states over dynamic,
/// string-keyed dispatch (§9 Design Notes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Idle,
    Initializing,
    DetectingChanges,
    Syncing,
    ResolvingConflicts,
    Completing,
    Paused,
    Error,
}

impl EngineState {
    pub fn can_pause(self) -> bool {
        matches!(self, EngineState::Syncing | EngineState::ResolvingConflicts)
    }

    pub fn can_cancel(self) -> bool {
        !matches!(self, EngineState::Idle)
    }
}
