use serde_json::Value;
use std::collections::BTreeMap;

/// Controls the 5-step normalization the Hasher applies before digesting
/// structured content (§4.2).
#[derive(Debug, Clone, Default)]
pub struct NormalizeOptions {
    /// Object keys dropped before hashing (e.g. `metadata`).
    pub excluded_keys: Vec<String>,
}

impl NormalizeOptions {
    pub fn with_excluded_keys(keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            excluded_keys: keys.into_iter().map(Into::into).collect(),
        }
    }
}

/// Recognizes RFC 3339 date-looking strings produced by `chrono`'s
/// `to_rfc3339`. Values already in this canonical form pass through
/// unchanged; this exists purely so callers who hash a `serde_json::Value`
/// built from a `chrono::DateTime` don't need a bespoke wrapper type.
fn is_iso8601(s: &str) -> bool {
    chrono::DateTime::parse_from_rfc3339(s).is_ok()
}

/// Apply the Hasher's normalization steps:
/// 1. null stays canonical null.
/// 2. scalars pass through unchanged.
/// 3. arrays keep element order (order is significant).
/// 4. object keys are sorted lexicographically; excluded keys are dropped;
///    date-typed values are rendered as ISO-8601 UTC.
/// 5. the result is a `Value` ready for canonical UTF-8 serialization.
pub fn canonicalize(value: &Value, options: &NormalizeOptions) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Bool(_) | Value::Number(_) => value.clone(),
        Value::String(s) => {
            if is_iso8601(s) {
                match chrono::DateTime::parse_from_rfc3339(s) {
                    Ok(dt) => Value::String(dt.with_timezone(&chrono::Utc).to_rfc3339()),
                    Err(_) => Value::String(s.clone()),
                }
            } else {
                Value::String(s.clone())
            }
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| canonicalize(v, options)).collect()),
        Value::Object(map) => {
            let mut sorted: BTreeMap<String, Value> = BTreeMap::new();
            for (k, v) in map.iter() {
                if options.excluded_keys.iter().any(|ex| ex == k) {
                    continue;
                }
                sorted.insert(k.clone(), canonicalize(v, options));
            }
            let mut out = serde_json::Map::new();
            for (k, v) in sorted {
                out.insert(k, v);
            }
            Value::Object(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_is_irrelevant() {
        let opts = NormalizeOptions::default();
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(canonicalize(&a, &opts), canonicalize(&b, &opts));
    }

    #[test]
    fn excluded_keys_are_dropped() {
        let opts = NormalizeOptions::with_excluded_keys(["metadata"]);
        let a = json!({"id": 1, "metadata": {"noise": true}});
        let b = json!({"id": 1});
        assert_eq!(canonicalize(&a, &opts), canonicalize(&b, &opts));
    }

    #[test]
    fn array_order_is_significant() {
        let opts = NormalizeOptions::default();
        let a = json!([1, 2, 3]);
        let b = json!([3, 2, 1]);
        assert_ne!(canonicalize(&a, &opts), canonicalize(&b, &opts));
    }
}
