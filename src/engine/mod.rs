//! Sync Engine (§4.9): the orchestrator. Runs one session through
//! `detect -> plan -> execute -> resolve -> complete`, emitting events along
//! the way. Grounded in the teacher's `EventBus`-owning `AppRunner`: the
//! Engine, like `AppRunner`, owns the long-lived services (store,
//! checkpointer, event bus) and drives a session's state machine rather than
//! leaving it to ambient globals (§9 Design Notes).

mod events;
mod progress;
mod state;

pub use events::{SyncEvent, Unsubscribe};
pub use progress::SyncProgress;
pub use state::EngineState;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tracing::instrument;

use crate::adapter::{Adapter, AdapterRegistry};
use crate::checkpoint::{CheckpointManager, CheckpointPolicy};
use crate::conflict::{ConflictResolver, Resolution};
use crate::config::SyncCoreConfig;
use crate::delta::DeltaTracker;
use crate::error::SyncCoreError;
use crate::executor::{ExecutorProgress, ParallelExecutor, Priority, Task};
use crate::hash::Hasher;
use crate::model::{
    Change, Checkpoint, Conflict, EntityType, Operation, Session, SessionCounters, Source, SyncMode,
};
use crate::ratelimit::{RateLimiter, TokenBucketLimiter};
use crate::store::Store;

/// `sync()` call options (§6).
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub mode: SyncMode,
    pub since: Option<DateTime<Utc>>,
    pub entity_types: Option<Vec<EntityType>>,
}

/// The `sync()` return value (§7): `success`, populated counters, duration,
/// and an optional checkpoint if the run did not fully complete.
#[derive(Debug, Clone)]
pub struct SyncResult {
    pub success: bool,
    pub session: Session,
    pub duration: StdDuration,
    pub checkpoint: Option<Checkpoint>,
}

/// Per-change result data carried back from the Executor to the Engine for
/// counter bookkeeping beyond bare success/failure — how many conflicts this
/// particular change's apply resolved automatically.
#[derive(Debug, Clone, Copy, Default)]
struct ProcessOutcome {
    auto_resolved: usize,
}

/// Additive counters produced by running one batch of changes through the
/// Executor (§5 backpressure splits a session's detected changes into
/// multiple such batches; these fields are safe to sum across batches,
/// unlike the gauge reads `skipped`/`conflicts_manual_required` that read
/// the Engine's shared pending state directly).
#[derive(Debug, Clone, Default)]
struct BatchOutcome {
    counters: SessionCounters,
    errors: Vec<String>,
}

struct Inner {
    config: SyncCoreConfig,
    store: Arc<dyn Store>,
    adapters: RwLock<AdapterRegistry>,
    hasher: Arc<Hasher>,
    delta_tracker: DeltaTracker,
    resolver: ConflictResolver,
    checkpoint_manager: CheckpointManager,
    rate_limiter: Arc<dyn RateLimiter>,
    emitter: Arc<events::Emitter>,
    state: Mutex<EngineState>,
    session: Mutex<Option<Session>>,
    pending_changes: Mutex<Vec<Change>>,
    pending_conflicts: Mutex<Vec<Conflict>>,
}

/// The orchestrator tying every other component together (§4.9).
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<Inner>,
}

impl SyncEngine {
    pub fn new(config: SyncCoreConfig, store: Arc<dyn Store>) -> Self {
        let rate_limiter: Arc<dyn RateLimiter> = Arc::new(TokenBucketLimiter::with_fair_queuing(
            config.rate_limit.tokens_per_interval,
            StdDuration::from_millis(config.rate_limit.interval_ms),
            config.rate_limit.max_burst,
            config.rate_limit.fair_queuing,
        ));
        let checkpoint_policy = CheckpointPolicy {
            checkpoint_interval: config.checkpoint.checkpoint_interval,
            max_age: chrono::Duration::seconds(config.checkpoint.max_age_secs),
            max_checkpoints: config.checkpoint.max_checkpoints,
        };
        let hasher = Arc::new(Hasher::new(config.hash_algorithm, Default::default()));
        Self {
            inner: Arc::new(Inner {
                delta_tracker: DeltaTracker::new(Arc::clone(&store)),
                resolver: ConflictResolver::new(Arc::clone(&store)),
                checkpoint_manager: CheckpointManager::new(Arc::clone(&store), checkpoint_policy),
                store,
                adapters: RwLock::new(AdapterRegistry::new()),
                hasher,
                rate_limiter,
                emitter: Arc::new(events::Emitter::new()),
                state: Mutex::new(EngineState::Idle),
                session: Mutex::new(None),
                pending_changes: Mutex::new(Vec::new()),
                pending_conflicts: Mutex::new(Vec::new()),
                config,
            }),
        }
    }

    pub fn register_adapter(&self, adapter: Arc<dyn Adapter>) {
        self.inner.adapters.write().register(adapter);
    }

    /// Register a listener; see [`events::Emitter::on`].
    pub fn on<F>(&self, listener: F) -> Unsubscribe
    where
        F: FnMut(SyncEvent) + Send + 'static,
    {
        self.inner.emitter.on(listener)
    }

    pub fn get_status(&self) -> EngineState {
        *self.inner.state.lock()
    }

    pub fn get_current_session(&self) -> Option<Session> {
        self.inner.session.lock().clone()
    }

    pub fn get_pending_changes(&self) -> Vec<Change> {
        self.inner.pending_changes.lock().clone()
    }

    pub fn get_unresolved_conflicts(&self) -> Vec<Conflict> {
        self.inner.pending_conflicts.lock().clone()
    }

    /// Reclaims stale checkpoints. Call once before the first `sync()`.
    pub async fn initialize(&self) -> Result<(), SyncCoreError> {
        self.inner.checkpoint_manager.reclaim(Utc::now()).await?;
        Ok(())
    }

    pub async fn full_sync(&self) -> Result<SyncResult, SyncCoreError> {
        self.sync(SyncOptions {
            mode: SyncMode::Full,
            ..Default::default()
        })
        .await
    }

    pub async fn incremental_sync(&self, since: Option<DateTime<Utc>>) -> Result<SyncResult, SyncCoreError> {
        self.sync(SyncOptions {
            mode: SyncMode::Incremental,
            since,
            entity_types: None,
        })
        .await
    }

    /// Pauses a running session; no-op outside `syncing`/`resolving-conflicts`.
    pub fn pause(&self) {
        let mut state = self.inner.state.lock();
        if !state.can_pause() {
            return;
        }
        *state = EngineState::Paused;
        drop(state);
        if let Some(session) = self.inner.session.lock().as_ref() {
            self.inner.emitter.emit(SyncEvent::Pause {
                session_id: session.id.clone(),
            });
        }
    }

    /// Resumes a paused session in place (does not rehydrate from a
    /// checkpoint — use [`SyncEngine::resume_if_incomplete`] for that).
    pub fn resume(&self) {
        let mut state = self.inner.state.lock();
        if *state != EngineState::Paused {
            return;
        }
        *state = EngineState::Syncing;
        drop(state);
        if let Some(session) = self.inner.session.lock().as_ref() {
            self.inner.emitter.emit(SyncEvent::Resume {
                session_id: session.id.clone(),
            });
        }
    }

    /// Aborts cooperatively to `idle` from any non-terminal state.
    pub fn cancel(&self) {
        let mut state = self.inner.state.lock();
        if !state.can_cancel() {
            return;
        }
        *state = EngineState::Idle;
        drop(state);
        if let Some(session) = self.inner.session.lock().as_ref() {
            self.inner.emitter.emit(SyncEvent::Cancel {
                session_id: session.id.clone(),
            });
        }
    }

    /// Rehydrates the latest incomplete checkpoint (session id, pending
    /// queue, and unresolved conflicts) and re-enters `syncing` to finish
    /// the remaining work (§4.8, §4.9).
    #[instrument(skip(self), err)]
    pub async fn resume_if_incomplete(&self) -> Result<Option<SyncResult>, SyncCoreError> {
        let resumable = self.inner.checkpoint_manager.discover_resumable().await?;
        let Some(record) = resumable.into_iter().next() else {
            return Ok(None);
        };
        let checkpoint = record.checkpoint;
        let mut session = Session::new(SyncMode::Incremental, self.inner.adapters.read().sources(), Utc::now());
        session.id = checkpoint.session_id.clone();
        *self.inner.session.lock() = Some(session);
        *self.inner.pending_changes.lock() = checkpoint.pending_changes.clone();
        *self.inner.pending_conflicts.lock() = checkpoint.pending_conflicts.clone();

        let result = self
            .run_session(checkpoint.pending_changes, checkpoint.pending_conflicts)
            .await?;
        Ok(Some(result))
    }

    /// Runs one full session: `initializing -> detecting-changes -> syncing
    /// -> (resolving-conflicts)? -> completing -> idle`.
    #[instrument(skip(self, options), err)]
    pub async fn sync(&self, options: SyncOptions) -> Result<SyncResult, SyncCoreError> {
        *self.inner.state.lock() = EngineState::Initializing;
        let adapters_sources = self.inner.adapters.read().sources();
        let session = Session::new(options.mode, adapters_sources, Utc::now());
        let session_id = session.id.clone();
        *self.inner.session.lock() = Some(session);
        self.inner.emitter.emit(SyncEvent::Start {
            session_id: session_id.clone(),
            at: Utc::now(),
        });

        *self.inner.state.lock() = EngineState::DetectingChanges;
        self.emit_progress(&session_id, "detecting-changes", 0, 0, 0, 0);
        let (changes, wave_counters, wave_errors) = match self.detect_all_changes(&options, &session_id).await {
            Ok(v) => v,
            Err(err) => return Err(self.fail_session(&session_id, err).await),
        };

        let mut result = match self.run_session(changes, Vec::new()).await {
            Ok(v) => v,
            Err(err) => return Err(self.fail_session(&session_id, err).await),
        };
        merge_batch_into_session(&mut result, wave_counters, wave_errors);
        Ok(result)
    }

    /// Terminal error handling (§4.9, §7): a fatal error writes the current
    /// pending state as a checkpoint before the engine transitions
    /// `error -> idle`, so a crash-equivalent failure is just as resumable as
    /// a clean mid-run checkpoint. Non-fatal errors (a single adapter/store
    /// call failing in a way the caller can retry) pass through untouched —
    /// they don't represent a condition worth tearing down the session for.
    async fn fail_session(&self, session_id: &str, err: SyncCoreError) -> SyncCoreError {
        if !err.is_fatal() {
            return err;
        }
        let now = Utc::now();
        let pending_changes = self.inner.pending_changes.lock().clone();
        let pending_conflicts = self.inner.pending_conflicts.lock().clone();
        let checkpoint = crate::checkpoint::snapshot(
            session_id.to_string(),
            now,
            pending_changes,
            pending_conflicts,
            Default::default(),
            Default::default(),
        );
        match self.inner.checkpoint_manager.update(&checkpoint, now).await {
            Ok(()) => {
                self.inner.emitter.emit(SyncEvent::Checkpoint {
                    session_id: session_id.to_string(),
                    at: now,
                });
            }
            Err(checkpoint_err) => {
                tracing::error!(
                    target: "synccore::engine",
                    error = %checkpoint_err,
                    "failed to write checkpoint while handling fatal error"
                );
            }
        }
        self.inner.emitter.emit(SyncEvent::Error {
            session_id: session_id.to_string(),
            message: err.to_string(),
        });
        *self.inner.state.lock() = EngineState::Error;
        self.inner.session.lock().take();
        *self.inner.state.lock() = EngineState::Idle;
        err
    }

    /// Detect changes from every registered adapter according to the
    /// session's `mode`. Per §5 backpressure: if the accumulated pending set
    /// reaches `queue_high_water`, the accumulated batch is drained through
    /// the Executor immediately (synchronously, so detection cannot resume
    /// until the batch completes and the queue falls back to empty — at or
    /// below any `queue_low_water`) before detection continues with the
    /// remaining adapters. The counters/errors from any such drained waves
    /// are returned alongside the still-undetected-but-unexecuted remainder.
    async fn detect_all_changes(
        &self,
        options: &SyncOptions,
        session_id: &str,
    ) -> Result<(Vec<Change>, SessionCounters, Vec<String>), SyncCoreError> {
        let adapters: Vec<Arc<dyn Adapter>> = {
            let registry = self.inner.adapters.read();
            registry.iter().map(|(_, a)| Arc::clone(a)).collect()
        };
        let high_water = self.inner.config.executor.queue_high_water;
        let mut all_changes = Vec::new();
        let mut wave_counters = SessionCounters::default();
        let mut wave_errors = Vec::new();
        for adapter in adapters {
            let source = adapter.source();
            let changes = match options.mode {
                SyncMode::Incremental => {
                    let since = match options.since {
                        Some(ts) => Some(ts),
                        None => self.inner.store.get_last_sync_time(source).await?,
                    };
                    adapter.detect_changes(since, options.entity_types.as_deref()).await?
                }
                SyncMode::Full | SyncMode::Custom => {
                    let manifest = adapter.get_manifest(options.entity_types.as_deref(), None).await?;
                    let detected = self.inner.delta_tracker.detect_changes(source, &manifest.entries).await?;
                    let mut changes = Vec::new();
                    let now = Utc::now();
                    for entry in detected.added.iter().chain(detected.modified.iter()) {
                        let data = adapter.get_entity(entry.entity_type, entry.id.as_str()).await?;
                        let operation = if detected.added.iter().any(|e| e.id == entry.id) {
                            Operation::Create
                        } else {
                            Operation::Update
                        };
                        let mut change = Change::new(source, entry.entity_type, entry.id.clone(), operation, now);
                        change.hash = entry.hash.clone();
                        change.data = data;
                        changes.push(change);
                    }
                    for id in &detected.deleted {
                        let entity_type = self
                            .inner
                            .store
                            .get_delta_state(source, id)
                            .await?
                            .map(|state| state.entity_type)
                            .unwrap_or(EntityType::Book);
                        changes.push(Change::new(source, entity_type, id.clone(), Operation::Delete, now));
                    }
                    changes
                }
            };
            for change in &changes {
                self.inner.emitter.emit(SyncEvent::ChangeDetected {
                    session_id: session_id.to_string(),
                    change_id: change.id,
                });
            }
            all_changes.extend(changes);

            if high_water > 0 && all_changes.len() >= high_water {
                tracing::debug!(
                    target: "synccore::engine",
                    pending = all_changes.len(),
                    high_water,
                    "pending queue reached high-water mark; draining before detecting further changes"
                );
                let batch = std::mem::take(&mut all_changes);
                let drained = self.execute_batch(session_id, batch).await?;
                accumulate_batch(&mut wave_counters, &mut wave_errors, drained);
            }
        }
        Ok((all_changes, wave_counters, wave_errors))
    }

    /// Run one batch of changes through a fresh bounded-concurrency Executor
    /// and tally the counters derivable purely from this batch's outcomes
    /// (§4.6, §7). Emits `error` events for per-change failures; does not
    /// touch session/checkpoint state — the caller merges the result.
    async fn execute_batch(&self, session_id: &str, changes: Vec<Change>) -> Result<BatchOutcome, SyncCoreError> {
        let executor: ParallelExecutor<ProcessOutcome> =
            ParallelExecutor::new(self.inner.config.executor.clone(), Arc::clone(&self.inner.rate_limiter));

        let change_by_id: FxHashMap<String, Operation> =
            changes.iter().map(|c| (c.id.to_string(), c.operation)).collect();

        let tasks: Vec<Task<ProcessOutcome>> = changes
            .iter()
            .map(|change| {
                let inner = Arc::clone(&self.inner);
                let change = change.clone();
                let session_id = session_id.to_string();
                let id = change.id.to_string();
                let priority = Self::priority_for(&change);
                Task::new(id, priority, move || {
                    let inner = Arc::clone(&inner);
                    let change = change.clone();
                    let session_id = session_id.clone();
                    async move { process_change(inner, session_id, change).await }
                })
            })
            .collect();

        let checkpoint_interval = self.inner.config.checkpoint.checkpoint_interval;
        let checkpoint_watch = (checkpoint_interval > 0)
            .then(|| self.spawn_periodic_checkpoint(session_id.to_string(), executor.subscribe(), checkpoint_interval));

        let outcomes = executor.run(tasks).await;
        if let Some(handle) = checkpoint_watch {
            handle.abort();
        }

        let mut counters = SessionCounters::default();
        counters.total = changes.len();
        let mut errors = Vec::new();
        for outcome in &outcomes {
            if outcome.success {
                counters.processed += 1;
                if let Some(value) = &outcome.value {
                    counters.conflicts_auto_resolved += value.auto_resolved;
                }
                match change_by_id.get(&outcome.id) {
                    Some(Operation::Create) => counters.created += 1,
                    Some(Operation::Update) => counters.updated += 1,
                    Some(Operation::Delete) => counters.deleted += 1,
                    Some(Operation::Sync) | None => {}
                }
            } else {
                counters.failed += 1;
                counters.errors += 1;
                if let Some(msg) = &outcome.error {
                    errors.push(msg.clone());
                    self.inner.emitter.emit(SyncEvent::Error {
                        session_id: session_id.to_string(),
                        message: msg.clone(),
                    });
                }
            }
        }
        Ok(BatchOutcome { counters, errors })
    }

    /// Watches one batch's completion count on the Executor's progress
    /// channel and writes a mid-run checkpoint every `checkpoint_interval`
    /// completions (§4.8), rather than only once at the end of
    /// `run_session` — so a crash partway through a large batch resumes
    /// from near where it left off instead of from the batch's start.
    /// Aborted by the caller once `executor.run` returns.
    fn spawn_periodic_checkpoint(
        &self,
        session_id: String,
        mut progress: tokio::sync::watch::Receiver<ExecutorProgress>,
        checkpoint_interval: u32,
    ) -> tokio::task::JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        let checkpoint_interval = checkpoint_interval as usize;
        tokio::spawn(async move {
            let mut next_at = checkpoint_interval;
            while progress.changed().await.is_ok() {
                let done = {
                    let snapshot = progress.borrow();
                    snapshot.completed + snapshot.failed
                };
                if done < next_at {
                    continue;
                }
                next_at = done - (done % checkpoint_interval) + checkpoint_interval;

                let now = Utc::now();
                let pending_changes = inner.pending_changes.lock().clone();
                let pending_conflicts = inner.pending_conflicts.lock().clone();
                let checkpoint = crate::checkpoint::snapshot(
                    session_id.clone(),
                    now,
                    pending_changes,
                    pending_conflicts,
                    Default::default(),
                    Default::default(),
                );
                match inner.checkpoint_manager.update(&checkpoint, now).await {
                    Ok(()) => {
                        inner.emitter.emit(SyncEvent::Checkpoint {
                            session_id: session_id.clone(),
                            at: now,
                        });
                    }
                    Err(err) => {
                        tracing::warn!(
                            target: "synccore::engine",
                            error = %err,
                            "periodic mid-batch checkpoint write failed"
                        );
                    }
                }
            }
        })
    }

    /// Build and emit a `SyncProgress` snapshot for the external progress
    /// channel (§6), fired on every queue transition the engine drives.
    fn emit_progress(&self, session_id: &str, phase: &str, total: usize, processed: usize, skipped: usize, errors: usize) {
        let status = *self.inner.state.lock();
        let percentage = if total == 0 { 100.0 } else { (processed as f64 / total as f64) * 100.0 };
        let mut progress = SyncProgress::new(session_id, status, phase);
        progress.total = total;
        progress.processed = processed;
        progress.skipped = skipped;
        progress.errors = errors;
        progress.percentage = percentage;
        self.inner.emitter.emit(SyncEvent::Progress {
            session_id: session_id.to_string(),
            progress,
        });
    }

    /// Assign priority per §4.9: `delete -> high`, `metadata -> low`,
    /// everything else -> `normal`.
    fn priority_for(change: &Change) -> Priority {
        if change.operation == Operation::Delete {
            Priority::High
        } else if change.entity_type == EntityType::Metadata {
            Priority::Low
        } else {
            Priority::Normal
        }
    }

    /// Drives the Executor over `changes`, re-offering `carried_conflicts`
    /// for resolution first, then transitions through
    /// `syncing -> (resolving-conflicts)? -> completing -> idle`.
    async fn run_session(&self, changes: Vec<Change>, carried_conflicts: Vec<Conflict>) -> Result<SyncResult, SyncCoreError> {
        let started_at = std::time::Instant::now();
        let session_id = self
            .inner
            .session
            .lock()
            .as_ref()
            .map(|s| s.id.clone())
            .expect("session set by caller");

        if !carried_conflicts.is_empty() {
            *self.inner.state.lock() = EngineState::ResolvingConflicts;
            for conflict in &carried_conflicts {
                self.inner.emitter.emit(SyncEvent::ConflictDetected {
                    session_id: session_id.clone(),
                    conflict_id: conflict.id,
                });
            }
        }

        *self.inner.state.lock() = EngineState::Syncing;
        self.emit_progress(&session_id, "syncing", changes.len(), 0, 0, 0);

        let batch = self.execute_batch(&session_id, changes).await?;
        let mut counters = batch.counters;
        let mut errors = batch.errors;

        // `skipped`/`conflicts_manual_required` are gauge reads of shared
        // pending state, not per-batch deltas — read once here rather than
        // inside `execute_batch`, which may be called multiple times per
        // session when backpressure splits detection into waves (§5).
        counters.skipped = self.inner.pending_changes.lock().len();
        counters.conflicts_manual_required = self.inner.pending_conflicts.lock().len();
        // `pending_conflicts` already holds any carried conflicts — callers
        // resuming from a checkpoint pre-seed it before invoking this method
        // (see `resume_if_incomplete`) — so counting `carried_conflicts.len()`
        // again here would double it.
        counters.conflicts_detected = counters.conflicts_manual_required + counters.conflicts_auto_resolved;

        *self.inner.state.lock() = EngineState::Completing;
        self.emit_progress(&session_id, "completing", counters.total, counters.processed, counters.skipped, counters.errors);
        let now = Utc::now();
        let pending_changes = self.inner.pending_changes.lock().clone();
        let pending_conflicts = self.inner.pending_conflicts.lock().clone();
        let all_clean = pending_changes.is_empty() && pending_conflicts.is_empty() && errors.is_empty();

        let checkpoint = if all_clean {
            self.inner.checkpoint_manager.complete(&session_id, now).await?;
            None
        } else {
            let checkpoint = crate::checkpoint::snapshot(
                session_id.clone(),
                now,
                pending_changes,
                pending_conflicts,
                Default::default(),
                Default::default(),
            );
            self.inner.checkpoint_manager.update(&checkpoint, now).await?;
            self.inner.emitter.emit(SyncEvent::Checkpoint {
                session_id: session_id.clone(),
                at: now,
            });
            Some(checkpoint)
        };

        let mut session = self.inner.session.lock().take().expect("session set by caller");
        session.counters = counters.clone();
        session.errors = errors;
        session.conflicts = self.inner.pending_conflicts.lock().clone();
        session.complete(now);
        *self.inner.state.lock() = EngineState::Idle;

        self.inner.emitter.emit(SyncEvent::Complete {
            session_id: session_id.clone(),
            counters: counters.clone(),
        });

        Ok(SyncResult {
            success: counters.failed == 0,
            session,
            duration: started_at.elapsed(),
            checkpoint,
        })
    }
}

/// Per-change apply pipeline (§4.9): (a) detect conflict, (b) if clean,
/// apply via the Adapter and update the Delta Tracker, (c) on failure,
/// rethrow so the Executor's retry policy engages. Propagation semantics
/// (an Open Question the distilled spec leaves implicit): a change detected
/// from one adapter is applied to every *other* registered adapter, and the
/// Delta Tracker records the entity as synced for each of them — this is
/// what "reconciling three sources into one vault" means operationally.
async fn process_change(inner: Arc<Inner>, session_id: String, change: Change) -> Result<ProcessOutcome, String> {
    let mut auto_resolved = 0usize;
    let other_sources: Vec<Source> = inner
        .adapters
        .read()
        .sources()
        .into_iter()
        .filter(|s| *s != change.source)
        .collect();

    let local_change = change.previous_data.clone().map(|prev| {
        Change::new(change.source, change.entity_type, change.entity_id.clone(), Operation::Update, change.timestamp)
            .with_data(prev)
    });

    let conflicts = inner
        .resolver
        .detect(&change, &other_sources, local_change.as_ref())
        .await
        .map_err(|e| e.to_string())?;

    let mut field_override: Option<(String, serde_json::Value)> = None;
    if !conflicts.is_empty() {
        let mut still_pending = Vec::new();
        for mut conflict in conflicts {
            let conflict_id = conflict.id;
            match inner.resolver.resolve(&mut conflict) {
                Resolution::Resolved => {
                    auto_resolved += 1;
                    inner.emitter.emit(SyncEvent::ConflictResolved {
                        session_id: session_id.clone(),
                        conflict_id,
                    });
                    if let (Some(field), Some(value)) = (conflict.field.clone(), conflict.resolved_value.clone()) {
                        field_override = Some((field, value));
                    }
                }
                Resolution::Pending => {
                    inner.emitter.emit(SyncEvent::ConflictDetected {
                        session_id: session_id.clone(),
                        conflict_id,
                    });
                    still_pending.push(conflict);
                }
            }
        }
        if !still_pending.is_empty() {
            inner.pending_conflicts.lock().extend(still_pending);
            inner.pending_changes.lock().push(change);
            return Ok(ProcessOutcome { auto_resolved });
        }
    }

    let mut effective = change.clone();
    if let (Some((field, value)), Some(data)) = (field_override, effective.data.as_mut()) {
        if let Some(obj) = data.as_object_mut() {
            obj.insert(field, value);
        }
    }

    let adapters: Vec<Arc<dyn Adapter>> = {
        let registry = inner.adapters.read();
        other_sources.iter().filter_map(|s| registry.get(*s)).collect()
    };
    for adapter in &adapters {
        adapter.apply_change(&effective).await.map_err(|e| e.to_string())?;
    }

    let now = Utc::now();
    inner.delta_tracker.record_applied(&effective, now).await.map_err(|e| e.to_string())?;
    inner.store.set_last_sync_time(change.source, now).await.map_err(|e| e.to_string())?;

    inner.emitter.emit(SyncEvent::ChangeApplied {
        session_id,
        change_id: change.id,
    });
    Ok(ProcessOutcome { auto_resolved })
}

/// Fold one batch's additive counters/errors into a running wave total.
fn accumulate_batch(wave_counters: &mut SessionCounters, wave_errors: &mut Vec<String>, batch: BatchOutcome) {
    wave_counters.total += batch.counters.total;
    wave_counters.processed += batch.counters.processed;
    wave_counters.failed += batch.counters.failed;
    wave_counters.errors += batch.counters.errors;
    wave_counters.created += batch.counters.created;
    wave_counters.updated += batch.counters.updated;
    wave_counters.deleted += batch.counters.deleted;
    wave_counters.conflicts_auto_resolved += batch.counters.conflicts_auto_resolved;
    wave_errors.extend(batch.errors);
}

/// Merge the counters/errors accumulated by any backpressure-driven
/// detection waves (§5) into the final session produced by `run_session`,
/// which only saw the remainder batch.
fn merge_batch_into_session(result: &mut SyncResult, wave_counters: SessionCounters, wave_errors: Vec<String>) {
    if wave_counters.total == 0 && wave_errors.is_empty() {
        return;
    }
    let counters = &mut result.session.counters;
    counters.total += wave_counters.total;
    counters.processed += wave_counters.processed;
    counters.failed += wave_counters.failed;
    counters.errors += wave_counters.errors;
    counters.created += wave_counters.created;
    counters.updated += wave_counters.updated;
    counters.deleted += wave_counters.deleted;
    counters.conflicts_auto_resolved += wave_counters.conflicts_auto_resolved;
    counters.conflicts_detected += wave_counters.conflicts_auto_resolved;
    result.session.errors = wave_errors.into_iter().chain(result.session.errors.drain(..)).collect();
    result.success = counters.failed == 0;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::testing::MockAdapter;
    use crate::config::SyncCoreConfig;
    use crate::store::InMemoryStore;

    fn engine() -> SyncEngine {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        SyncEngine::new(SyncCoreConfig::default(), store)
    }

    #[tokio::test]
    async fn clean_first_sync_creates_all_entities() {
        let engine = engine();
        let library = Arc::new(MockAdapter::new(Source::Library, "library"));
        let now = Utc::now();
        for id in ["a", "b", "c"] {
            library.queue_change(
                Change::new(Source::Library, EntityType::Book, id, Operation::Create, now)
                    .with_hash(format!("hash-{id}"))
                    .with_data(serde_json::json!({ "title": id })),
            );
        }
        engine.register_adapter(library);

        let result = engine
            .sync(SyncOptions {
                mode: SyncMode::Incremental,
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.session.counters.processed, 3);
        assert_eq!(result.session.counters.created, 3);
        assert_eq!(result.session.counters.updated, 0);
        assert_eq!(result.session.counters.deleted, 0);
        assert_eq!(result.session.counters.failed, 0);
        assert!(result.checkpoint.is_none());
        assert_eq!(engine.get_status(), EngineState::Idle);
    }

    /// A `queue_high_water` low enough to split detection into multiple
    /// drained waves still yields counters summed over the whole session.
    #[tokio::test]
    async fn backpressure_drains_waves_and_sums_counters_across_them() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let mut config = SyncCoreConfig::default();
        config.executor.queue_high_water = 2;
        config.executor.queue_low_water = 1;
        let engine = SyncEngine::new(config, store);

        let library = Arc::new(MockAdapter::new(Source::Library, "library"));
        let server = Arc::new(MockAdapter::new(Source::Server, "server"));
        let now = Utc::now();
        for id in ["a", "b"] {
            library.queue_change(
                Change::new(Source::Library, EntityType::Book, id, Operation::Create, now)
                    .with_hash(format!("hash-{id}"))
                    .with_data(serde_json::json!({ "title": id })),
            );
        }
        for id in ["c", "d"] {
            server.queue_change(
                Change::new(Source::Server, EntityType::Book, id, Operation::Create, now)
                    .with_hash(format!("hash-{id}"))
                    .with_data(serde_json::json!({ "title": id })),
            );
        }
        engine.register_adapter(library);
        engine.register_adapter(server);

        let result = engine
            .sync(SyncOptions {
                mode: SyncMode::Incremental,
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.session.counters.total, 4);
        assert_eq!(result.session.counters.processed, 4);
        assert_eq!(result.session.counters.created, 4);
        assert_eq!(result.session.counters.failed, 0);
    }

    #[tokio::test]
    async fn incremental_no_op_after_clean_sync() {
        let engine = engine();
        let library = Arc::new(MockAdapter::new(Source::Library, "library"));
        engine.register_adapter(library);

        let first = engine
            .sync(SyncOptions {
                mode: SyncMode::Incremental,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(first.session.counters.total, 0);
        assert_eq!(first.session.counters.processed, 0);
        assert!(first.checkpoint.is_none());
    }

    #[tokio::test]
    async fn retries_transient_apply_failures_via_executor() {
        let engine = engine();
        let library = Arc::new(MockAdapter::new(Source::Library, "library"));
        let server = Arc::new(MockAdapter::new(Source::Server, "server"));
        let now = Utc::now();
        library.queue_change(
            Change::new(Source::Library, EntityType::Book, "a", Operation::Update, now)
                .with_hash("h1")
                .with_data(serde_json::json!({ "title": "A" })),
        );
        server.fail_next("a", 2);
        engine.register_adapter(library);
        engine.register_adapter(server.clone());

        let result = engine
            .sync(SyncOptions {
                mode: SyncMode::Incremental,
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(server.applied().len(), 1);
    }

    #[tokio::test]
    async fn pause_and_cancel_are_no_ops_when_idle() {
        let engine = engine();
        engine.pause();
        assert_eq!(engine.get_status(), EngineState::Idle);
        engine.cancel();
        assert_eq!(engine.get_status(), EngineState::Idle);
    }
}
