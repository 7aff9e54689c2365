//! Manifest Differ (§4.4): a Store-free variant of the Delta Tracker that
//! compares two manifest snapshots directly, with a streaming mode for very
//! large manifests.

mod differ;

pub use differ::{ChangedField, CompareCriteria, DiffEntry, DiffKind, ManifestDiff, ManifestDiffer};
