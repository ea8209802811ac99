//! Canonical state hashing for cycle detection using BLAKE3
//!
//! Two refinement states are considered equal when they differ only in object key
//! order, array order (for scalars, or for objects carrying a stable identifier), string
//! case, or whitespace. Canonicalization erases exactly those differences; the canonical
//! serialization is then hashed.

use serde::Serialize;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::sync::Arc;
use unicode_normalization::UnicodeNormalization;

/// 32-byte BLAKE3 digest of a canonical state
pub type StateHash = [u8; 32];

/// Extracts a stable identity from an object so arrays of objects can be ordered by it.
pub trait StableIdExtractor: Send + Sync {
    fn stable_id(&self, object: &Map<String, Value>) -> Option<String>;
}

/// Looks up the first present scalar among a fixed list of keys.
#[derive(Debug, Clone)]
pub struct KeyIdExtractor {
    keys: Vec<String>,
}

impl KeyIdExtractor {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for KeyIdExtractor {
    fn default() -> Self {
        Self::new(["id", "name"])
    }
}

impl StableIdExtractor for KeyIdExtractor {
    fn stable_id(&self, object: &Map<String, Value>) -> Option<String> {
        self.keys.iter().find_map(|key| match object.get(key)? {
            Value::String(s) => Some(normalize_text(s)),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        })
    }
}

/// Canonicalizer with a pluggable stable-id extractor
#[derive(Clone)]
pub struct Canonicalizer {
    extractor: Arc<dyn StableIdExtractor>,
}

impl Default for Canonicalizer {
    fn default() -> Self {
        Self::new(Arc::new(KeyIdExtractor::default()))
    }
}

impl std::fmt::Debug for Canonicalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Canonicalizer").finish_non_exhaustive()
    }
}

impl Canonicalizer {
    pub fn new(extractor: Arc<dyn StableIdExtractor>) -> Self {
        Self { extractor }
    }

    /// Recursively normalize a value
    pub fn canonicalize(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(normalize_text(s)),
            Value::Object(object) => Value::Object(self.canonicalize_object(object)),
            Value::Array(items) => Value::Array(self.canonicalize_array(items)),
            scalar => scalar.clone(),
        }
    }

    fn canonicalize_object(&self, object: &Map<String, Value>) -> Map<String, Value> {
        let mut entries: Vec<(&String, &Value)> =
            object.iter().filter(|(_, value)| !value.is_null()).collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));

        // Map preserves insertion order, so inserting sorted keys fixes the serialization
        let mut canonical = Map::with_capacity(entries.len());
        for (key, value) in entries {
            canonical.insert(key.clone(), self.canonicalize(value));
        }
        canonical
    }

    fn canonicalize_array(&self, items: &[Value]) -> Vec<Value> {
        let canonical: Vec<Value> = items.iter().map(|item| self.canonicalize(item)).collect();

        let all_objects = !canonical.is_empty() && canonical.iter().all(Value::is_object);
        if all_objects {
            let ids: Option<Vec<String>> = canonical
                .iter()
                .map(|item| item.as_object().and_then(|o| self.extractor.stable_id(o)))
                .collect();
            if let Some(ids) = ids {
                let mut keyed: Vec<(String, String, Value)> = ids
                    .into_iter()
                    .zip(canonical)
                    .map(|(id, value)| (id, serialize(&value), value))
                    .collect();
                // Duplicate ids fall back to the serialization so the order stays total
                keyed.sort_by(|a, b| match a.0.cmp(&b.0) {
                    Ordering::Equal => a.1.cmp(&b.1),
                    other => other,
                });
                return keyed.into_iter().map(|(_, _, value)| value).collect();
            }
        }

        let mut keyed: Vec<(String, Value)> = canonical
            .into_iter()
            .map(|value| (serialize(&value), value))
            .collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        keyed.into_iter().map(|(_, value)| value).collect()
    }

    /// Canonical serialization of a value
    pub fn canonical_string(&self, value: &Value) -> String {
        serialize(&self.canonicalize(value))
    }

    /// Hash the canonical serialization of a value
    pub fn hash_value(&self, value: &Value) -> StateHash {
        let canonical = self.canonical_string(value);
        *blake3::hash(canonical.as_bytes()).as_bytes()
    }

    /// Hash any serializable state
    pub fn hash<T: Serialize + ?Sized>(&self, state: &T) -> Result<StateHash, serde_json::Error> {
        let value = serde_json::to_value(state)?;
        Ok(self.hash_value(&value))
    }
}

/// Canonical hash using the default `id`/`name` extractor
pub fn canonical_hash(value: &Value) -> StateHash {
    Canonicalizer::default().hash_value(value)
}

/// NFC, lower-case, whitespace runs collapsed to one space, trimmed
pub fn normalize_text(text: &str) -> String {
    let lowered: String = text.nfc().collect::<String>().to_lowercase();
    lowered.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn serialize(value: &Value) -> String {
    // Serializing a Value cannot fail: keys are strings and numbers are finite
    serde_json::to_string(value).unwrap_or_default()
}
