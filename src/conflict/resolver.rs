use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::instrument;

use crate::error::StoreError;
use crate::model::{
    default_grace, Change, Conflict, EntityType, Operation, ResolutionStrategy, Source,
};
use crate::store::Store;

use super::policy::{default_field_policies, default_merge, merge_highlights, FieldPolicy};

/// Outcome of attempting to resolve a single conflict.
pub enum Resolution {
    /// Resolved in place; `conflict.resolved` is now `true`.
    Resolved,
    /// The strategy is `ask-user` (or unconfigured and defaults to it); the
    /// conflict remains pending.
    Pending,
}

/// Detects and resolves semantic conflicts between a remote change and
/// locally-tracked state across sources (§4.7).
pub struct ConflictResolver {
    store: Arc<dyn Store>,
    grace: chrono::Duration,
    field_policies: FxHashMap<String, FieldPolicy>,
    /// Strategy used for whole-entity conflicts (delete-vs-modify,
    /// cross-source) that carry no `field`.
    default_strategy: ResolutionStrategy,
    merge_fns: FxHashMap<String, Arc<dyn Fn(&serde_json::Value, &serde_json::Value) -> serde_json::Value + Send + Sync>>,
    /// `(entity_type, field | "*") -> strategy`, consulted before any prompt.
    remembered: Mutex<FxHashMap<(EntityType, String), ResolutionStrategy>>,
}

impl ConflictResolver {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            grace: default_grace(),
            field_policies: default_field_policies(),
            default_strategy: ResolutionStrategy::AskUser,
            merge_fns: FxHashMap::default(),
            remembered: Mutex::new(FxHashMap::default()),
        }
        .with_field_merge("highlights", merge_highlights)
    }

    #[must_use]
    pub fn with_field_policies(mut self, policies: FxHashMap<String, FieldPolicy>) -> Self {
        self.field_policies = policies;
        self
    }

    #[must_use]
    pub fn with_field_merge(
        mut self,
        field: impl Into<String>,
        f: impl Fn(&serde_json::Value, &serde_json::Value) -> serde_json::Value + Send + Sync + 'static,
    ) -> Self {
        self.merge_fns.insert(field.into(), Arc::new(f));
        self
    }

    fn policy_for(&self, field: Option<&str>) -> (ResolutionStrategy, bool) {
        match field.and_then(|f| self.field_policies.get(f)) {
            Some(policy) => (policy.strategy, policy.auto_resolve),
            None => (self.default_strategy, false),
        }
    }

    fn remembered_strategy(&self, entity_type: EntityType, field: Option<&str>) -> Option<ResolutionStrategy> {
        let key = (entity_type, field.unwrap_or("*").to_string());
        self.remembered.lock().get(&key).copied()
    }

    /// Record a "remembered" choice for future conflicts of the same
    /// `(entity_type, field | "*")` shape.
    pub fn remember(&self, entity_type: EntityType, field: Option<&str>, strategy: ResolutionStrategy) {
        let key = (entity_type, field.unwrap_or("*").to_string());
        self.remembered.lock().insert(key, strategy);
    }

    /// Step 1-3 of the detection algorithm (§4.7) for one remote change.
    /// `other_sources` are the other registered adapters' sources (i.e. all
    /// sources except `change.source`). `local_change`, when supplied by the
    /// caller, is the most recent locally-observed change for this entity —
    /// used for field-level reconstruction per the documented limitation in
    /// §9's open questions.
    #[instrument(skip(self, other_sources, local_change), err)]
    pub async fn detect(
        &self,
        change: &Change,
        other_sources: &[Source],
        local_change: Option<&Change>,
    ) -> Result<Vec<Conflict>, StoreError> {
        let mut conflicts = Vec::new();

        if change.operation == Operation::Delete {
            if let Some(state) = self.store.get_delta_state(change.source, change.entity_id.as_str()).await? {
                if state.has_local_modifications(self.grace) {
                    conflicts.push(Conflict::new(change.entity_type, change.entity_id.clone(), change.clone()));
                }
            }
            return Ok(conflicts);
        }

        for &other in other_sources {
            if other == change.source {
                continue;
            }
            if let Some(state) = self.store.get_delta_state(other, change.entity_id.as_str()).await? {
                if !state.has_local_modifications(self.grace) {
                    continue;
                }
                let hash_diverges = match (&state.hash, &change.hash) {
                    (Some(l), Some(r)) => l != r,
                    _ => false,
                };
                let timestamps_overlap =
                    state.last_modified > state.last_synced && change.timestamp > state.last_synced;
                if hash_diverges || timestamps_overlap {
                    conflicts.push(Conflict::new(change.entity_type, change.entity_id.clone(), change.clone()));
                }
            }
        }

        if let Some(field_changes) = &change.field_changes {
            if let Some(local) = local_change {
                for fc in field_changes {
                    if let Some(local_val) = local.data.as_ref().and_then(|d| d.get(&fc.field)) {
                        if *local_val != fc.new {
                            conflicts.push(
                                Conflict::new(change.entity_type, change.entity_id.clone(), change.clone())
                                    .with_field(fc.field.clone())
                                    .with_local_change(local.clone())
                                    .with_values(Some(local_val.clone()), Some(fc.new.clone())),
                            );
                        }
                    }
                }
            }
        }

        Ok(conflicts)
    }

    fn merge_value(&self, field: Option<&str>, local: &serde_json::Value, remote: &serde_json::Value) -> serde_json::Value {
        if let Some(f) = field {
            if let Some(custom) = self.merge_fns.get(f) {
                return custom(local, remote);
            }
        }
        default_merge(local, remote)
    }

    fn resolved_value(&self, conflict: &Conflict, strategy: ResolutionStrategy) -> serde_json::Value {
        use serde_json::Value;
        match strategy {
            ResolutionStrategy::PreferLocal => conflict.local_value.clone().unwrap_or(Value::Null),
            ResolutionStrategy::PreferRemote => conflict.remote_value.clone().unwrap_or(Value::Null),
            ResolutionStrategy::LastWriteWins => {
                let remote_ts = conflict.remote_change.timestamp;
                match &conflict.local_change {
                    Some(local) if local.timestamp > remote_ts => conflict.local_value.clone().unwrap_or(Value::Null),
                    _ => conflict.remote_value.clone().unwrap_or(Value::Null),
                }
            }
            ResolutionStrategy::Merge => {
                let local = conflict.local_value.clone().unwrap_or(Value::Null);
                let remote = conflict.remote_value.clone().unwrap_or(Value::Null);
                self.merge_value(conflict.field.as_deref(), &local, &remote)
            }
            ResolutionStrategy::AskUser => Value::Null,
        }
    }

    /// Attempt to resolve `conflict` in place. Consults the remembered
    /// choice first, then the field policy (or the whole-entity default),
    /// and never re-resolves an already-resolved conflict.
    pub fn resolve(&self, conflict: &mut Conflict) -> Resolution {
        if conflict.resolved {
            return Resolution::Resolved;
        }
        let strategy = self
            .remembered_strategy(conflict.entity_type, conflict.field.as_deref())
            .unwrap_or_else(|| self.policy_for(conflict.field.as_deref()).0);

        if strategy == ResolutionStrategy::AskUser {
            return Resolution::Pending;
        }
        let value = self.resolved_value(conflict, strategy);
        conflict
            .resolve(strategy, value)
            .expect("guarded by the resolved check above");
        Resolution::Resolved
    }

    /// Apply `strategy` to every still-pending conflict in `conflicts` whose
    /// `(entity_type, field | "*")` group key is in `groups`.
    pub fn batch_resolve(
        &self,
        conflicts: &mut [Conflict],
        groups: &FxHashMap<(EntityType, String), ResolutionStrategy>,
    ) -> usize {
        let mut resolved_count = 0;
        for conflict in conflicts.iter_mut() {
            if conflict.resolved {
                continue;
            }
            if let Some(&strategy) = groups.get(&conflict.group_key()) {
                if strategy == ResolutionStrategy::AskUser {
                    continue;
                }
                let value = self.resolved_value(conflict, strategy);
                if conflict.resolve(strategy, value).is_ok() {
                    resolved_count += 1;
                }
            }
        }
        resolved_count
    }

    /// Whether a field is configured to skip the user prompt.
    pub fn auto_resolves(&self, field: Option<&str>) -> bool {
        self.policy_for(field).1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DeltaState, EntityType, FieldChange, Source};
    use crate::store::InMemoryStore;
    use chrono::{Duration as ChronoDuration, Utc};
    use serde_json::json;

    fn resolver() -> (ConflictResolver, Arc<dyn Store>) {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        (ConflictResolver::new(Arc::clone(&store)), store)
    }

    #[tokio::test]
    async fn delete_vs_modify_conflict_detected() {
        let (resolver, store) = resolver();
        let t0 = Utc::now() - ChronoDuration::hours(2);
        let t1 = t0 + ChronoDuration::hours(1);
        let state = DeltaState::new(EntityType::Book, t1, t0).with_hash("h0");
        store.put_delta_state(Source::Library, "a", state).await.unwrap();

        let delete = Change::new(
            Source::Library,
            EntityType::Book,
            "a",
            Operation::Delete,
            t1 + ChronoDuration::hours(1),
        );
        let conflicts = resolver.detect(&delete, &[], None).await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert!(conflicts[0].field.is_none());
    }

    #[tokio::test]
    async fn cross_source_conflict_on_hash_mismatch() {
        let (resolver, store) = resolver();
        let t0 = Utc::now() - ChronoDuration::hours(2);
        let t1 = t0 + ChronoDuration::hours(1);
        let state = DeltaState::new(EntityType::Progress, t1, t0).with_hash("local-hash");
        store.put_delta_state(Source::File, "book-1", state).await.unwrap();

        let remote = Change::new(
            Source::Server,
            EntityType::Progress,
            "book-1",
            Operation::Update,
            t1 + ChronoDuration::hours(1),
        )
        .with_hash("remote-hash");

        let conflicts = resolver.detect(&remote, &[Source::File, Source::Server], None).await.unwrap();
        assert_eq!(conflicts.len(), 1);
    }

    #[tokio::test]
    async fn field_level_conflict_and_merge_resolution() {
        let (resolver, _store) = resolver();
        let now = Utc::now();
        let local_change = Change::new(Source::File, EntityType::Book, "a", Operation::Update, now)
            .with_data(json!({"tags": ["x", "y"]}));
        let remote = Change::new(Source::Server, EntityType::Book, "a", Operation::Update, now)
            .with_data(json!({"tags": ["y", "z"]}))
            .with_field_changes(vec![FieldChange {
                field: "tags".to_string(),
                old: Some(json!(["x", "y"])),
                new: json!(["y", "z"]),
                timestamp: now,
            }]);

        let mut conflicts = resolver.detect(&remote, &[], Some(&local_change)).await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].field.as_deref(), Some("tags"));

        let outcome = resolver.resolve(&mut conflicts[0]);
        assert!(matches!(outcome, Resolution::Resolved));
        let resolved = conflicts[0].resolved_value.clone().unwrap();
        let arr = resolved.as_array().unwrap();
        for v in ["x", "y", "z"] {
            assert!(arr.contains(&json!(v)));
        }
    }

    #[tokio::test]
    async fn ask_user_strategy_leaves_conflict_pending() {
        let (resolver, _store) = resolver();
        let now = Utc::now();
        let remote = Change::new(Source::Library, EntityType::Book, "a", Operation::Delete, now);
        let mut conflict = Conflict::new(EntityType::Book, "a", remote);
        let outcome = resolver.resolve(&mut conflict);
        assert!(matches!(outcome, Resolution::Pending));
        assert!(!conflict.resolved);
    }

    #[tokio::test]
    async fn resolved_conflict_is_never_resolved_twice() {
        let (resolver, _store) = resolver();
        let now = Utc::now();
        let remote = Change::new(Source::Server, EntityType::Book, "a", Operation::Update, now)
            .with_field_changes(vec![FieldChange {
                field: "title".to_string(),
                old: Some(json!("Old")),
                new: json!("New"),
                timestamp: now,
            }]);
        let mut conflict = Conflict::new(EntityType::Book, "a", remote)
            .with_field("title")
            .with_values(Some(json!("Old")), Some(json!("New")));
        assert!(matches!(resolver.resolve(&mut conflict), Resolution::Resolved));
        assert!(matches!(resolver.resolve(&mut conflict), Resolution::Resolved));
        assert_eq!(conflict.resolved_value, Some(json!("New")));
    }
}
