use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the three independent data sources the core reconciles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Library,
    Server,
    File,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Library => write!(f, "library"),
            Source::Server => write!(f, "server"),
            Source::File => write!(f, "file"),
        }
    }
}

/// The kind of syncable entity. `entity_type` in the design spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Book,
    Progress,
    Highlight,
    Note,
    Metadata,
    File,
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntityType::Book => "book",
            EntityType::Progress => "progress",
            EntityType::Highlight => "highlight",
            EntityType::Note => "note",
            EntityType::Metadata => "metadata",
            EntityType::File => "file",
        };
        write!(f, "{s}")
    }
}

/// Opaque, stable identifier for an entity within a source. A UUID for
/// books/highlights, path-derived for files — the core never interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The mutation kind carried by a `Change`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
    Sync,
}

/// The stable `(source, entity_type, entity_id)` triple that identifies a
/// syncable item, used as the key into the Store's `delta_states` collection
/// and as the Executor's per-task identity (at most one apply in flight per
/// key at any moment).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub source: Source,
    pub entity_type: EntityType,
    pub entity_id: EntityId,
}

impl EntityKey {
    pub fn new(source: Source, entity_type: EntityType, entity_id: impl Into<EntityId>) -> Self {
        Self {
            source,
            entity_type,
            entity_id: entity_id.into(),
        }
    }

    /// Store key string: `"{source}/{entity_id}"`. Delta states are keyed
    /// `(source, id)` per the spec — `entity_type` travels alongside as a
    /// field, not part of the key, so an entity can't silently migrate type.
    pub fn store_key(&self) -> String {
        format!("{}/{}", self.source, self.entity_id)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.source, self.entity_type, self.entity_id)
    }
}
