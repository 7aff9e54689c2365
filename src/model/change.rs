use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ids::{EntityId, EntityType, Operation, Source};

/// A single `(field, old, new, timestamp)` divergence used for field-level
/// conflict detection and merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub old: Option<serde_json::Value>,
    pub new: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// A detected or planned mutation, as produced by an adapter or synthesized
/// by the Sync Engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Change {
    pub id: Uuid,
    pub source: Source,
    pub entity_type: EntityType,
    pub entity_id: EntityId,
    pub operation: Operation,
    pub timestamp: DateTime<Utc>,
    /// Content digest after the mutation; absent for `Delete`.
    pub hash: Option<String>,
    /// Opaque payload delivered to the adapter's `apply_change`; absent for `Delete`.
    pub data: Option<serde_json::Value>,
    pub previous_data: Option<serde_json::Value>,
    pub field_changes: Option<Vec<FieldChange>>,
}

impl Change {
    pub fn new(
        source: Source,
        entity_type: EntityType,
        entity_id: impl Into<EntityId>,
        operation: Operation,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            entity_type,
            entity_id: entity_id.into(),
            operation,
            timestamp,
            hash: None,
            data: None,
            previous_data: None,
            field_changes: None,
        }
    }

    #[must_use]
    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = Some(hash.into());
        self
    }

    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    #[must_use]
    pub fn with_previous_data(mut self, data: serde_json::Value) -> Self {
        self.previous_data = Some(data);
        self
    }

    #[must_use]
    pub fn with_field_changes(mut self, changes: Vec<FieldChange>) -> Self {
        self.field_changes = Some(changes);
        self
    }

    pub fn key(&self) -> super::ids::EntityKey {
        super::ids::EntityKey::new(self.source, self.entity_type, self.entity_id.clone())
    }
}
