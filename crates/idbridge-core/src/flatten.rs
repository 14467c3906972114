//! JSON claim flattening.
//!
//! Nested claim structures are flattened into a path-keyed map so that
//! attribute mappers can address any leaf with a single string key:
//! objects contribute dot-separated segments, arrays bracket-indexed
//! segments. `{"a":{"b":[{"c":1}]}}` flattens to `{"a.b[0].c": "1"}`.

use std::collections::BTreeMap;

use serde_json::Value;

/// Flatten a JSON value into `path -> scalar` entries.
///
/// Scalars are rendered in their JSON text form without quotes;
/// `null` leaves render as `"null"`. A scalar at the root produces no
/// entries since it has no path.
#[must_use]
pub fn flatten(value: &Value) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    flatten_into(value, "", &mut out);
    out
}

/// Flatten `value` under an existing key prefix into `out`.
///
/// Used by extraction code that namespaces claims (e.g. an `id_token.`
/// prefix) into a shared attribute map.
pub fn flatten_into(value: &Value, prefix: &str, out: &mut BTreeMap<String, String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_into(child, &path, out);
            }
        }
        Value::Array(items) => {
            for (idx, child) in items.iter().enumerate() {
                flatten_into(child, &format!("{prefix}[{idx}]"), out);
            }
        }
        scalar => {
            if !prefix.is_empty() {
                out.insert(prefix.to_string(), render_scalar(scalar));
            }
        }
    }
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}
