//! End-to-end scenarios against the Sync Engine's public surface: a clean
//! first sync, an incremental no-op, a delete-vs-modify conflict, a
//! field-level merge, retry under a transient adapter failure, and resuming
//! an interrupted session from its checkpoint.

mod common;

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use common::TestAdapter;
use serde_json::json;
use synccore::config::SyncCoreConfig;
use synccore::engine::{EngineState, SyncEngine, SyncOptions};
use synccore::model::{Change, DeltaState, EntityType, FieldChange, Operation, Source, SyncMode};
use synccore::store::{InMemoryStore, Store};

fn engine_with_store() -> (SyncEngine, Arc<dyn Store>) {
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    (SyncEngine::new(SyncCoreConfig::default(), Arc::clone(&store)), store)
}

/// S1: a clean first sync applies every detected change and leaves no
/// checkpoint behind.
#[tokio::test]
async fn s1_clean_first_sync_reaches_idle_with_no_checkpoint() {
    let (engine, _store) = engine_with_store();
    let library = Arc::new(TestAdapter::new(Source::Library, "library"));
    let server = Arc::new(TestAdapter::new(Source::Server, "server"));
    let now = Utc::now();
    for id in ["book-1", "book-2", "book-3"] {
        library.queue_change(
            Change::new(Source::Library, EntityType::Book, id, Operation::Create, now)
                .with_hash(format!("hash-{id}"))
                .with_data(json!({ "title": id })),
        );
    }
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
    assert_eq!(result.session.counters.total, 3);
    assert_eq!(result.session.counters.processed, 3);
    assert!(result.checkpoint.is_none());
    assert_eq!(engine.get_status(), EngineState::Idle);
    assert_eq!(server.applied().len(), 3);
}

/// S2: running an incremental sync again with nothing new queued produces an
/// empty, still-successful session.
#[tokio::test]
async fn s2_incremental_sync_is_a_no_op_once_quiet() {
    let (engine, _store) = engine_with_store();
    let library = Arc::new(TestAdapter::new(Source::Library, "library"));
    engine.register_adapter(library);

    let result = engine
        .sync(SyncOptions {
            mode: SyncMode::Incremental,
            ..Default::default()
        })
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.session.counters.total, 0);
    assert!(result.checkpoint.is_none());
}

/// S3: a source's entity was modified locally (recorded delta state inside
/// the grace window) while another source deletes the same entity. The
/// default ask-user strategy leaves the conflict pending and the change is
/// re-queued rather than applied.
#[tokio::test]
async fn s3_delete_vs_local_modification_is_held_pending() {
    let (engine, store) = engine_with_store();
    let t0 = Utc::now() - ChronoDuration::hours(2);
    let t1 = t0 + ChronoDuration::hours(1);
    let state = DeltaState::new(EntityType::Book, t1, t0).with_hash("h0");
    store.put_delta_state(Source::Library, "book-1", state).await.unwrap();

    let library = Arc::new(TestAdapter::new(Source::Library, "library"));
    library.queue_change(Change::new(
        Source::Library,
        EntityType::Book,
        "book-1",
        Operation::Delete,
        t1 + ChronoDuration::hours(1),
    ));
    engine.register_adapter(library);

    let result = engine
        .sync(SyncOptions {
            mode: SyncMode::Incremental,
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(result.session.counters.total, 1);
    assert_eq!(result.session.counters.conflicts_detected, 1);
    assert_eq!(engine.get_unresolved_conflicts().len(), 1);
    assert!(result.checkpoint.is_some());
    assert!(!engine.get_pending_changes().is_empty());
}

/// S4: two sources disagree on a single field covered by a `merge`
/// auto-resolve policy. The engine resolves the conflict itself and applies
/// the merged value downstream.
#[tokio::test]
async fn s4_field_level_conflict_auto_merges_and_applies() {
    let (engine, _store) = engine_with_store();
    let library = Arc::new(TestAdapter::new(Source::Library, "library"));
    let server = Arc::new(TestAdapter::new(Source::Server, "server"));
    let now = Utc::now();

    let remote_change = Change::new(Source::Server, EntityType::Book, "book-1", Operation::Update, now)
        .with_data(json!({ "tags": ["sci-fi", "favorites"] }))
        .with_previous_data(json!({ "tags": ["sci-fi", "to-read"] }))
        .with_field_changes(vec![FieldChange {
            field: "tags".to_string(),
            old: Some(json!(["sci-fi", "to-read"])),
            new: json!(["sci-fi", "favorites"]),
            timestamp: now,
        }]);
    server.queue_change(remote_change);
    engine.register_adapter(library.clone());
    engine.register_adapter(server);

    let result = engine
        .sync(SyncOptions {
            mode: SyncMode::Incremental,
            ..Default::default()
        })
        .await
        .unwrap();

    assert!(result.success);
    assert!(engine.get_unresolved_conflicts().is_empty());
    let applied = library.applied();
    assert_eq!(applied.len(), 1);
    let tags = applied[0].data.as_ref().unwrap().get("tags").unwrap().as_array().unwrap();
    for tag in ["sci-fi", "to-read", "favorites"] {
        assert!(tags.contains(&json!(tag)), "merged tags missing {tag}: {tags:?}");
    }
}

/// S5: an apply fails twice with a transient error before succeeding; the
/// executor's retry budget absorbs it and the session still reports success.
#[tokio::test]
async fn s5_retries_transient_apply_failure_to_success() {
    let (engine, _store) = engine_with_store();
    let library = Arc::new(TestAdapter::new(Source::Library, "library"));
    let server = Arc::new(TestAdapter::new(Source::Server, "server"));
    let now = Utc::now();
    library.queue_change(
        Change::new(Source::Library, EntityType::Book, "book-1", Operation::Update, now)
            .with_hash("h1")
            .with_data(json!({ "title": "Dune" })),
    );
    server.fail_next("book-1", 2);
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
    assert_eq!(result.session.counters.failed, 0);
    assert_eq!(server.applied().len(), 1);
}

/// S6: a session that ends with unresolved conflicts writes a checkpoint; a
/// fresh engine sharing the same store resumes from it and re-offers the
/// carried conflict for resolution instead of starting over.
#[tokio::test]
async fn s6_resumes_interrupted_session_from_checkpoint() {
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let t0 = Utc::now() - ChronoDuration::hours(2);
    let t1 = t0 + ChronoDuration::hours(1);
    let state = DeltaState::new(EntityType::Book, t1, t0).with_hash("h0");
    store.put_delta_state(Source::Library, "book-1", state).await.unwrap();

    let first_engine = SyncEngine::new(SyncCoreConfig::default(), Arc::clone(&store));
    let library = Arc::new(TestAdapter::new(Source::Library, "library"));
    library.queue_change(Change::new(
        Source::Library,
        EntityType::Book,
        "book-1",
        Operation::Delete,
        t1 + ChronoDuration::hours(1),
    ));
    first_engine.register_adapter(library);
    let first_result = first_engine
        .sync(SyncOptions {
            mode: SyncMode::Incremental,
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(first_result.checkpoint.is_some());

    let second_engine = SyncEngine::new(SyncCoreConfig::default(), Arc::clone(&store));
    second_engine.initialize().await.unwrap();
    let resumed = second_engine.resume_if_incomplete().await.unwrap();
    let resumed = resumed.expect("an incomplete checkpoint should be discovered");
    // The carried conflict from the checkpoint plus the one re-detected while
    // replaying the still-pending delete against the same local delta state.
    assert_eq!(resumed.session.counters.conflicts_detected, 2);
    assert!(!second_engine.get_unresolved_conflicts().is_empty());
}
