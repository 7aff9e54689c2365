//! Conflict Resolver (§4.7): detects conflicts using cross-source delta
//! state, resolves per field/strategy, and remembers chosen strategies for
//! future conflicts of the same shape.

mod policy;
mod resolver;

pub use policy::{default_field_policies, default_merge, FieldPolicy};
pub use resolver::{ConflictResolver, Resolution};
