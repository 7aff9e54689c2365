//! Entity identity and the durable/in-flight records the core passes between
//! its components: changes, manifests, delta states, conflicts, sessions,
//! and checkpoints (§3 of the design spec).

mod change;
mod checkpoint;
mod conflict;
mod delta_state;
mod ids;
mod manifest;
mod session;

pub use change::{Change, FieldChange};
pub use checkpoint::Checkpoint;
pub use conflict::{Conflict, ResolutionStrategy};
pub use delta_state::{default_grace, DeltaState};
pub use ids::{EntityId, EntityKey, EntityType, Operation, Source};
pub use manifest::{Manifest, ManifestEntry};
pub use session::{Session, SessionCounters, SyncMode};
