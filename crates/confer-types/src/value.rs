//! Ordered property values.
//!
//! Properties are an insertion-ordered map of string keys to JSON-shaped
//! values (scalars, sequences, nested maps). The workspace enables
//! `serde_json`'s `preserve_order` feature so declaration order survives every
//! decode and encode.

pub use serde_json::{Number, Value};

/// Insertion-ordered property mapping.
pub type Properties = serde_json::Map<String, Value>;

/// Flatten nested mappings and sequences into dotted keys.
///
/// `{"db": {"hosts": ["a", "b"]}}` becomes `{"db.hosts[0]": "a",
/// "db.hosts[1]": "b"}`. Empty collections are kept as leaf values.
pub fn flatten(properties: &Properties) -> Properties {
    let mut out = Properties::new();
    for (key, value) in properties {
        flatten_into(&mut out, key.clone(), value);
    }
    out
}

fn flatten_into(out: &mut Properties, prefix: String, value: &Value) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                flatten_into(out, format!("{prefix}.{key}"), child);
            }
        }
        Value::Array(items) if !items.is_empty() => {
            for (idx, child) in items.iter().enumerate() {
                flatten_into(out, format!("{prefix}[{idx}]"), child);
            }
        }
        leaf => {
            out.insert(prefix, leaf.clone());
        }
    }
}

/// Text form of a scalar value. `None` for non-empty collections.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some(String::new()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        Value::Array(items) if items.is_empty() => Some(String::new()),
        Value::Object(map) if map.is_empty() => Some(String::new()),
        _ => None,
    }
}
