//! Crate-wide error taxonomy.
//!
//! Every fallible operation in `synccore` returns a variant of [`SyncCoreError`]
//! or one of the narrower per-component errors it wraps. Each component error
//! exposes `is_retryable()`/`is_fatal()` so callers (mainly the executor's
//! retry policy and the engine's error transition) can branch on severity
//! without re-matching variants.

use miette::Diagnostic;
use thiserror::Error;

/// Problems at a source adapter boundary.
#[derive(Debug, Error, Diagnostic)]
pub enum AdapterError {
    #[error("failed to connect to adapter {source}: {message}")]
    #[diagnostic(
        code(synccore::adapter::connect),
        help("Verify the adapter's credentials and network reachability.")
    )]
    Connect { source: String, message: String },

    #[error("change detection failed for adapter {source}: {message}")]
    #[diagnostic(code(synccore::adapter::detect))]
    Detect { source: String, message: String },

    #[error("apply failed for {source}/{entity_id}: {message}")]
    #[diagnostic(code(synccore::adapter::apply))]
    Apply {
        source: String,
        entity_id: String,
        message: String,
    },

    #[error("get failed for {source}/{entity_id}: {message}")]
    #[diagnostic(code(synccore::adapter::get))]
    Get {
        source: String,
        entity_id: String,
        message: String,
    },
}

impl AdapterError {
    /// Adapter errors are recoverable by default unless the adapter itself
    /// has already exhausted its own retry budget; the executor decides
    /// whether to retry based on this hint.
    pub fn is_retryable(&self) -> bool {
        true
    }
}

/// Problems with the persistent store.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("key not found: {key}")]
    #[diagnostic(code(synccore::store::not_found))]
    NotFound { key: String },

    #[error("corrupt record at key {key}: {message}")]
    #[diagnostic(
        code(synccore::store::corrupt),
        help("The store never silently drops data; the corrupt record at `{key}` must be repaired or removed manually.")
    )]
    Corrupt { key: String, message: String },

    #[error("store is blocked: another holder has it open at a newer schema version")]
    #[diagnostic(code(synccore::store::blocked))]
    Blocked,

    #[error("store I/O error: {0}")]
    #[diagnostic(code(synccore::store::io))]
    Io(String),
}

impl StoreError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::Corrupt { .. } | StoreError::Blocked)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Io(_))
    }
}

/// Problems produced by the parallel task executor.
#[derive(Debug, Error, Diagnostic)]
pub enum ExecutorError {
    #[error("task {id} timed out after {elapsed_ms}ms")]
    #[diagnostic(code(synccore::executor::timeout))]
    Timeout { id: String, elapsed_ms: u64 },

    #[error("task {id} was cancelled")]
    #[diagnostic(code(synccore::executor::cancelled))]
    Cancelled { id: String },

    #[error("task {id} was rate limited: {message}")]
    #[diagnostic(code(synccore::executor::rate_limited))]
    RateLimited { id: String, message: String },

    #[error("task {id} failed: {message}")]
    #[diagnostic(code(synccore::executor::task_failed))]
    TaskFailed { id: String, message: String },
}

impl ExecutorError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExecutorError::Timeout { .. } | ExecutorError::RateLimited { .. } | ExecutorError::TaskFailed { .. }
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutorError::Cancelled { .. })
    }
}

/// An invariant violation inside the core itself. Always fatal.
#[derive(Debug, Error, Diagnostic)]
#[error("protocol invariant violated: {message}")]
#[diagnostic(
    code(synccore::protocol),
    help("This indicates a bug in synccore itself; {diagnostics}")
)]
pub struct ProtocolError {
    pub message: String,
    pub diagnostics: String,
}

impl ProtocolError {
    pub fn new(message: impl Into<String>, diagnostics: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            diagnostics: diagnostics.into(),
        }
    }
}

/// Top-level error type returned from the Sync Engine's public surface.
///
/// `ConflictUnresolved` is deliberately not a hard failure: it surfaces as a
/// pending conflict in the session result rather than aborting the run.
#[derive(Debug, Error, Diagnostic)]
pub enum SyncCoreError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Executor(#[from] ExecutorError),

    #[error("conflict {id} is unresolved")]
    #[diagnostic(code(synccore::conflict_unresolved))]
    ConflictUnresolved { id: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Protocol(#[from] ProtocolError),
}

impl SyncCoreError {
    /// Whether this error should transition the engine to `error` and force a
    /// checkpoint write before returning.
    pub fn is_fatal(&self) -> bool {
        match self {
            SyncCoreError::Store(e) => e.is_fatal(),
            SyncCoreError::Protocol(_) => true,
            SyncCoreError::Executor(e) => !e.is_retryable() && !e.is_terminal(),
            SyncCoreError::Adapter(_) => false,
            SyncCoreError::ConflictUnresolved { .. } => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncCoreError>;
