use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::model::ResolutionStrategy;

/// Per-field resolution policy (§4.7): which strategy applies, and whether
/// it may run without surfacing a prompt to the user.
#[derive(Debug, Clone, Copy)]
pub struct FieldPolicy {
    pub strategy: ResolutionStrategy,
    pub auto_resolve: bool,
}

impl FieldPolicy {
    pub fn new(strategy: ResolutionStrategy, auto_resolve: bool) -> Self {
        Self { strategy, auto_resolve }
    }
}

/// The field policy table from §4.7's example configuration: `tags` and
/// `highlights` merge, `rating` defers to the user, `progress` is
/// last-write-wins, `title` prefers the remote copy.
pub fn default_field_policies() -> FxHashMap<String, FieldPolicy> {
    let mut map = FxHashMap::default();
    map.insert("tags".to_string(), FieldPolicy::new(ResolutionStrategy::Merge, true));
    map.insert(
        "highlights".to_string(),
        FieldPolicy::new(ResolutionStrategy::Merge, true),
    );
    map.insert(
        "rating".to_string(),
        FieldPolicy::new(ResolutionStrategy::AskUser, false),
    );
    map.insert(
        "progress".to_string(),
        FieldPolicy::new(ResolutionStrategy::LastWriteWins, true),
    );
    map.insert(
        "title".to_string(),
        FieldPolicy::new(ResolutionStrategy::PreferRemote, true),
    );
    map
}

/// Field-specific merge for `highlights` (§4.7): merge by `id`, newer
/// `updatedAt` wins, rather than the generic array-union `default_merge`
/// uses for `tags`. Entries missing an `id` or `updatedAt` are kept as-is
/// (deduplicated by equality) since there is nothing to group or compare by.
pub fn merge_highlights(local: &Value, remote: &Value) -> Value {
    let (Value::Array(l), Value::Array(r)) = (local, remote) else {
        return default_merge(local, remote);
    };

    let mut by_id: Vec<(String, Value)> = Vec::new();
    let mut unkeyed: Vec<Value> = Vec::new();

    let mut ingest = |entry: &Value| {
        let id = entry.get("id").and_then(Value::as_str);
        match id {
            Some(id) => {
                let updated_at = entry.get("updatedAt").and_then(Value::as_str).unwrap_or("");
                match by_id.iter_mut().find(|(existing_id, _)| existing_id == id) {
                    Some((_, existing)) => {
                        let existing_updated_at = existing.get("updatedAt").and_then(Value::as_str).unwrap_or("");
                        if updated_at > existing_updated_at {
                            *existing = entry.clone();
                        }
                    }
                    None => by_id.push((id.to_string(), entry.clone())),
                }
            }
            None => {
                if !unkeyed.contains(entry) {
                    unkeyed.push(entry.clone());
                }
            }
        }
    };

    for entry in l {
        ingest(entry);
    }
    for entry in r {
        ingest(entry);
    }

    let mut out: Vec<Value> = by_id.into_iter().map(|(_, v)| v).collect();
    out.extend(unkeyed);
    Value::Array(out)
}

/// Default merge used by the `merge` strategy when no field-specific merge
/// function is registered: arrays union (first-seen order), objects
/// shallow-merge (remote wins on key collision), anything else falls back
/// to `prefer-remote`.
pub fn default_merge(local: &Value, remote: &Value) -> Value {
    match (local, remote) {
        (Value::Array(l), Value::Array(r)) => {
            let mut out = l.clone();
            for item in r {
                if !out.contains(item) {
                    out.push(item.clone());
                }
            }
            Value::Array(out)
        }
        (Value::Object(l), Value::Object(r)) => {
            let mut out = l.clone();
            for (k, v) in r {
                out.insert(k.clone(), v.clone());
            }
            Value::Object(out)
        }
        (_, remote) => remote.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn arrays_union_without_duplicates() {
        let local = json!(["x", "y"]);
        let remote = json!(["y", "z"]);
        let merged = default_merge(&local, &remote);
        let arr = merged.as_array().unwrap();
        assert_eq!(arr.len(), 3);
        for v in ["x", "y", "z"] {
            assert!(arr.contains(&json!(v)));
        }
    }

    #[test]
    fn objects_shallow_merge_remote_wins() {
        let local = json!({"a": 1, "b": 2});
        let remote = json!({"b": 3, "c": 4});
        let merged = default_merge(&local, &remote);
        assert_eq!(merged, json!({"a": 1, "b": 3, "c": 4}));
    }

    #[test]
    fn mismatched_shapes_fall_back_to_remote() {
        let local = json!("old");
        let remote = json!("new");
        assert_eq!(default_merge(&local, &remote), remote);
    }

    #[test]
    fn highlights_merge_by_id_keeps_newer_updated_at() {
        let local = json!([
            {"id": "h1", "updatedAt": "2024-01-01T00:00:00Z", "note": "old"},
            {"id": "h2", "updatedAt": "2024-01-01T00:00:00Z", "note": "local-only"},
        ]);
        let remote = json!([
            {"id": "h1", "updatedAt": "2024-02-01T00:00:00Z", "note": "new"},
            {"id": "h3", "updatedAt": "2024-01-15T00:00:00Z", "note": "remote-only"},
        ]);
        let merged = merge_highlights(&local, &remote);
        let arr = merged.as_array().unwrap();
        assert_eq!(arr.len(), 3);

        let h1 = arr.iter().find(|e| e["id"] == "h1").unwrap();
        assert_eq!(h1["note"], "new");
        assert!(arr.iter().any(|e| e["id"] == "h2"));
        assert!(arr.iter().any(|e| e["id"] == "h3"));
    }
}
