use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::change::Change;
use super::ids::{EntityId, EntityType};

/// Named policy mapping a conflict to a resolved value (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionStrategy {
    PreferLocal,
    PreferRemote,
    LastWriteWins,
    Merge,
    AskUser,
}

/// A disagreement between a remote change and locally-tracked state on the
/// same entity or field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    pub id: Uuid,
    pub entity_type: EntityType,
    pub entity_id: EntityId,
    pub field: Option<String>,
    pub local_change: Option<Change>,
    pub remote_change: Change,
    pub local_value: Option<serde_json::Value>,
    pub remote_value: Option<serde_json::Value>,
    pub resolved: bool,
    pub resolution_strategy: Option<ResolutionStrategy>,
    pub resolved_value: Option<serde_json::Value>,
}

impl Conflict {
    pub fn new(
        entity_type: EntityType,
        entity_id: impl Into<EntityId>,
        remote_change: Change,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_type,
            entity_id: entity_id.into(),
            field: None,
            local_change: None,
            remote_change,
            local_value: None,
            remote_value: None,
            resolved: false,
            resolution_strategy: None,
            resolved_value: None,
        }
    }

    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    #[must_use]
    pub fn with_local_change(mut self, change: Change) -> Self {
        self.local_change = Some(change);
        self
    }

    #[must_use]
    pub fn with_values(
        mut self,
        local_value: Option<serde_json::Value>,
        remote_value: Option<serde_json::Value>,
    ) -> Self {
        self.local_value = local_value;
        self.remote_value = remote_value;
        self
    }

    /// Mark this conflict resolved exactly once. Returns an error if called
    /// twice — a resolved conflict must never be re-resolved or re-emitted.
    pub fn resolve(&mut self, strategy: ResolutionStrategy, resolved_value: serde_json::Value) -> Result<(), &'static str> {
        if self.resolved {
            return Err("conflict already resolved");
        }
        self.resolved = true;
        self.resolution_strategy = Some(strategy);
        self.resolved_value = Some(resolved_value);
        Ok(())
    }

    /// Group key used by batch-resolve: `(field ∪ entity_type)`.
    pub fn group_key(&self) -> (EntityType, String) {
        (self.entity_type, self.field.clone().unwrap_or_else(|| "*".to_string()))
    }
}
