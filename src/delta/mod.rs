//! Delta Tracker (§4.3): answers "what changed?" against the Store, and is
//! the single source of truth for whether an entity has local modifications.

mod tracker;

pub use tracker::{DeltaTracker, DetectedChanges, IntegrityReport};
