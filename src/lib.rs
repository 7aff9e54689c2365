//! `synccore` — the Unified Sync Core.
//!
//! Reconciles state across three independent data sources (a book-metadata
//! library, a remote annotation/progress server, and a local note/highlight
//! file tree) into one coherent vault. This crate owns change detection,
//! delta-state persistence, parallel execution under a concurrency cap and
//! rate limit, conflict detection and resolution, and checkpointing so an
//! interrupted run resumes without repeating completed work or losing
//! in-flight conflicts.
//!
//! The crate does not speak any source's wire protocol — it consumes
//! abstract [`adapter::Adapter`] implementations supplied by the embedder
//! (§6 of the design spec). Nine cooperating components, leaves-first:
//!
//! - [`store`] — the Persistent Store: durable key-value collections for
//!   delta states, sync metadata, checkpoints, and cached manifests.
//! - [`hash`] — the Hasher: canonical content-to-digest normalization.
//! - [`delta`] — the Delta Tracker: per-entity change detection against the
//!   Store.
//! - [`diff`] — the Manifest Differ: a Store-free variant for comparing two
//!   manifest snapshots.
//! - [`ratelimit`] — token-bucket, adaptive, and sliding-window admission
//!   control.
//! - [`executor`] — the Parallel Executor: bounded-concurrency, priority,
//!   retry, pause/cancel task runner.
//! - [`conflict`] — the Conflict Resolver: detection and per-field
//!   resolution strategies.
//! - [`checkpoint`] — the Checkpoint Manager: periodic durable snapshots and
//!   resume discovery.
//! - [`engine`] — the Sync Engine: the orchestrator tying everything
//!   together through a `detect -> plan -> execute -> resolve -> complete`
//!   state machine.

pub mod adapter;
pub mod checkpoint;
pub mod config;
pub mod conflict;
pub mod delta;
pub mod diff;
pub mod engine;
pub mod error;
pub mod executor;
pub mod hash;
pub mod model;
pub mod ratelimit;
pub mod store;
pub mod telemetry;

pub use adapter::{Adapter, AdapterCapabilities, AdapterRegistry, AdapterStats};
pub use config::SyncCoreConfig;
pub use engine::{SyncEngine, SyncEvent, SyncOptions, SyncResult};
pub use error::{Result, SyncCoreError};
pub use store::Store;
