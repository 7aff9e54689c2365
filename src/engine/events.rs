//! Sync Engine event bus (§4.9), grounded in the teacher's
//! `event_bus::{bus::EventBus, hub::EventHub}` split: `Emitter` plays the
//! hub's role (a `tokio::sync::broadcast` channel fanning one event out to
//! many subscribers), and `on()` plays the sink-registration role — each
//! listener runs in its own spawned task, isolating a panicking listener
//! from the others exactly as the teacher's per-sink worker loop does.

use std::fmt;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::model::SessionCounters;

use super::progress::SyncProgress;

const DEFAULT_BUFFER_CAPACITY: usize = 1024;

/// The closed set of events the Sync Engine emits over a session's lifetime
/// (§4.9): `start, progress, change-detected, change-applied,
/// conflict-detected, conflict-resolved, checkpoint, error, complete,
/// cancel, pause, resume`.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    Start {
        session_id: String,
        at: DateTime<Utc>,
    },
    Progress {
        session_id: String,
        progress: SyncProgress,
    },
    ChangeDetected {
        session_id: String,
        change_id: Uuid,
    },
    ChangeApplied {
        session_id: String,
        change_id: Uuid,
    },
    ConflictDetected {
        session_id: String,
        conflict_id: Uuid,
    },
    ConflictResolved {
        session_id: String,
        conflict_id: Uuid,
    },
    Checkpoint {
        session_id: String,
        at: DateTime<Utc>,
    },
    Error {
        session_id: String,
        message: String,
    },
    Complete {
        session_id: String,
        counters: SessionCounters,
    },
    Cancel {
        session_id: String,
    },
    Pause {
        session_id: String,
    },
    Resume {
        session_id: String,
    },
}

impl SyncEvent {
    /// Kebab-case event kind, matching the closed enum named in the spec.
    pub fn kind_label(&self) -> &'static str {
        match self {
            SyncEvent::Start { .. } => "start",
            SyncEvent::Progress { .. } => "progress",
            SyncEvent::ChangeDetected { .. } => "change-detected",
            SyncEvent::ChangeApplied { .. } => "change-applied",
            SyncEvent::ConflictDetected { .. } => "conflict-detected",
            SyncEvent::ConflictResolved { .. } => "conflict-resolved",
            SyncEvent::Checkpoint { .. } => "checkpoint",
            SyncEvent::Error { .. } => "error",
            SyncEvent::Complete { .. } => "complete",
            SyncEvent::Cancel { .. } => "cancel",
            SyncEvent::Pause { .. } => "pause",
            SyncEvent::Resume { .. } => "resume",
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            SyncEvent::Start { session_id, .. }
            | SyncEvent::Progress { session_id, .. }
            | SyncEvent::ChangeDetected { session_id, .. }
            | SyncEvent::ChangeApplied { session_id, .. }
            | SyncEvent::ConflictDetected { session_id, .. }
            | SyncEvent::ConflictResolved { session_id, .. }
            | SyncEvent::Checkpoint { session_id, .. }
            | SyncEvent::Error { session_id, .. }
            | SyncEvent::Complete { session_id, .. }
            | SyncEvent::Cancel { session_id }
            | SyncEvent::Pause { session_id }
            | SyncEvent::Resume { session_id } => session_id,
        }
    }
}

impl fmt::Display for SyncEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncEvent::Error { message, .. } => write!(f, "session {} error: {message}", self.session_id()),
            SyncEvent::Complete { counters, .. } => {
                write!(f, "session {} complete: {} processed", self.session_id(), counters.processed)
            }
            _ => write!(f, "session {}", self.session_id()),
        }
    }
}

/// Fans `SyncEvent`s out to subscribers and registered listeners, grounded
/// in `event_bus::hub::EventHub` (a `tokio::sync::broadcast` channel wrapped
/// to track lag and hand out fresh receivers).
pub struct Emitter {
    sender: tokio::sync::broadcast::Sender<SyncEvent>,
}

impl Default for Emitter {
    fn default() -> Self {
        Self::new()
    }
}

impl Emitter {
    pub fn new() -> Self {
        let (sender, _rx) = tokio::sync::broadcast::channel(DEFAULT_BUFFER_CAPACITY);
        Self { sender }
    }

    /// Publish an event to every current subscriber and listener. Silently
    /// dropped if nobody is listening — mirrors `EventHub::publish` treating
    /// "no subscribers" as a non-error.
    pub fn emit(&self, event: SyncEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// Register a listener closure invoked for every event, running in its
    /// own spawned task so a panic in one listener can never stop another
    /// from being notified (§4.9's listener-panic isolation requirement).
    /// Returns an [`Unsubscribe`] handle that stops the listener when called.
    pub fn on<F>(&self, mut listener: F) -> Unsubscribe
    where
        F: FnMut(SyncEvent) + Send + 'static,
    {
        let mut rx = self.sender.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| listener(event))).is_err() {
                            tracing::warn!(target: "synccore::engine", "sync event listener panicked; continuing");
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Unsubscribe { handle: Some(handle) }
    }
}

/// Handle returned by [`Emitter::on`]. Dropping it leaves the listener
/// running (matching `tokio::task::JoinHandle`'s detach-on-drop semantics);
/// call [`Unsubscribe::unsubscribe`] to stop it explicitly.
pub struct Unsubscribe {
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl Unsubscribe {
    pub fn unsubscribe(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn listener_receives_emitted_events() {
        let emitter = Emitter::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let handle = emitter.on(move |_event| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        emitter.emit(SyncEvent::Start {
            session_id: "s1".to_string(),
            at: Utc::now(),
        });
        emitter.emit(SyncEvent::Cancel { session_id: "s1".to_string() });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
        handle.unsubscribe();
    }

    #[tokio::test]
    async fn panicking_listener_does_not_stop_other_listeners() {
        let emitter = Emitter::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let _panicking = emitter.on(|_event| panic!("boom"));
        let _healthy = emitter.on(move |_event| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        emitter.emit(SyncEvent::Cancel { session_id: "s1".to_string() });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let emitter = Emitter::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let handle = emitter.on(move |_event| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        handle.unsubscribe();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        emitter.emit(SyncEvent::Cancel { session_id: "s1".to_string() });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
