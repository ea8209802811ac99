//! Lossy structural summaries for older context layers
//!
//! Collections collapse to a count plus the first few identifying names, so a layer
//! listing forty tables becomes `{"count": 40, "items": ["users", "orders", ...]}`.

use serde_json::{json, Map, Value};

/// Fields consulted, in order, for an element's display name
pub const NAME_KEYS: [&str; 3] = ["name", "id", "title"];

/// Field reported next to the name when present
pub const TYPE_KEY: &str = "type";

/// Items kept when summarizing the most recent phase
pub const RECENT_ITEMS: usize = 10;

/// Items kept when summarizing earlier phases
pub const EARLIER_ITEMS: usize = 5;

/// Summarize a layer, keeping its top-level keys.
pub fn summarize(value: &Value, max_items: usize) -> Value {
    match value {
        Value::Object(map) => {
            let mut summary = Map::with_capacity(map.len());
            for (key, entry) in map {
                summary.insert(key.clone(), summarize_entry(entry, max_items));
            }
            Value::Object(summary)
        }
        Value::Array(items) => summarize_collection(items, max_items),
        other => other.clone(),
    }
}

fn summarize_entry(value: &Value, max_items: usize) -> Value {
    match value {
        Value::Array(items) => summarize_collection(items, max_items),
        Value::Object(map) => {
            let keys: Vec<Value> = map
                .keys()
                .take(max_items)
                .map(|key| Value::String(key.clone()))
                .collect();
            json!({ "count": map.len(), "keys": keys })
        }
        other => other.clone(),
    }
}

fn summarize_collection(items: &[Value], max_items: usize) -> Value {
    let names: Vec<Value> = items.iter().take(max_items).map(identify).collect();
    json!({ "count": items.len(), "items": names })
}

/// Short identifying label for a collection element
fn identify(item: &Value) -> Value {
    let Value::Object(map) = item else {
        return match item {
            Value::Array(inner) => Value::String(format!("[{} items]", inner.len())),
            scalar => scalar.clone(),
        };
    };

    let name = NAME_KEYS
        .iter()
        .find_map(|key| map.get(*key).and_then(scalar_label));
    let kind = map.get(TYPE_KEY).and_then(scalar_label);

    let label = match (name, kind) {
        (Some(name), Some(kind)) => format!("{}: {}", name, kind),
        (Some(name), None) => name,
        (None, Some(kind)) => kind,
        (None, None) => format!("{{{} fields}}", map.len()),
    };
    Value::String(label)
}

fn scalar_label(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
