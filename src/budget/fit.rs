//! Fitting values into a token allowance
//!
//! A value costs the tokens of its compact JSON serialization, punctuation included,
//! which is what a caller sends to the model. A null (absent) layer costs nothing.

use crate::budget::tokenizer::Tokenizer;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

/// Oversized text is cut to this share of its allowance, leaving template margin
pub const TRUNCATION_RATIO: f64 = 0.9;

/// Smallest remaining space worth spending on a partially kept mapping entry
pub const MIN_PARTIAL_TOKENS: usize = 100;

/// Serializes kept mapping entries as a JSON object without building a `Map`
struct Entries<'e>(&'e [(String, Value)]);

impl Serialize for Entries<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(key, value)| (key, value)))
    }
}

/// Fits values to token allowances with one tokenizer
pub struct Fitter<'a> {
    tokenizer: &'a dyn Tokenizer,
}

impl<'a> Fitter<'a> {
    pub fn new(tokenizer: &'a dyn Tokenizer) -> Self {
        Self { tokenizer }
    }

    /// Token cost of a value as sent: its serialized form
    pub fn cost(&self, value: &Value) -> usize {
        if value.is_null() {
            return 0;
        }
        self.tokens_of(value)
    }

    /// Text within budget passes through; otherwise keep 90% of the budget in tokens.
    pub fn fit_text(&self, text: &str, budget: usize) -> String {
        if self.tokenizer.count_tokens(text) <= budget {
            return text.to_string();
        }
        let keep = (budget as f64 * TRUNCATION_RATIO).floor() as usize;
        self.tokenizer.truncate(text, keep)
    }

    /// Fit any value to `budget` tokens, preserving its shape.
    ///
    /// Returns `Value::Null` when not even an empty value of the same shape fits.
    pub fn fit(&self, value: &Value, budget: usize) -> Value {
        if self.cost(value) <= budget {
            return value.clone();
        }
        match value {
            Value::String(s) => self.fit_string(s, budget),
            Value::Object(map) => self.fit_object(map, budget),
            Value::Array(items) => self.fit_array(items, budget),
            _ => Value::Null,
        }
    }

    fn tokens_of<S: Serialize + ?Sized>(&self, value: &S) -> usize {
        // Serializing JSON values and string-keyed maps cannot fail
        let text = serde_json::to_string(value).unwrap_or_default();
        self.tokenizer.count_tokens(&text)
    }

    /// Cut to 90% of the budget, then shrink further if quoting or escapes overflow it.
    fn fit_string(&self, text: &str, budget: usize) -> Value {
        let mut keep = (budget as f64 * TRUNCATION_RATIO).floor() as usize;
        loop {
            let candidate = Value::String(self.tokenizer.truncate(text, keep));
            let cost = self.tokens_of(&candidate);
            if cost <= budget {
                return candidate;
            }
            if keep == 0 {
                return Value::Null;
            }
            keep = keep.saturating_sub(cost - budget);
        }
    }

    /// Greedy over entries in order. The first entry that does not fit is fitted, in its
    /// own shape, into the remaining space if that space exceeds `MIN_PARTIAL_TOKENS`;
    /// nothing after it is kept.
    fn fit_object(&self, map: &Map<String, Value>, budget: usize) -> Value {
        let separator = self.tokenizer.count_tokens(",");
        let mut kept: Vec<(String, Value)> = Vec::new();
        let mut used = self.tokens_of(&Entries(&kept));

        for (key, value) in map {
            let key_cost = (if kept.is_empty() { 0 } else { separator })
                + self.tokens_of(key)
                + self.tokenizer.count_tokens(":");
            let cost = key_cost + self.tokens_of(value);
            if used + cost <= budget {
                kept.push((key.clone(), value.clone()));
                used += cost;
                continue;
            }

            let remaining = budget.saturating_sub(used);
            if remaining > MIN_PARTIAL_TOKENS && remaining > key_cost {
                let partial = self.fit(value, remaining - key_cost);
                if !partial.is_null() {
                    kept.push((key.clone(), partial));
                }
            }
            break;
        }

        // Token counts need not add up across fragments for every tokenizer
        while self.tokens_of(&Entries(&kept)) > budget && kept.pop().is_some() {}
        if self.tokens_of(&Entries(&kept)) > budget {
            return Value::Null;
        }
        Value::Object(kept.into_iter().collect())
    }

    /// Whole elements only; the sequence is cut at the first element that does not fit.
    fn fit_array(&self, items: &[Value], budget: usize) -> Value {
        let separator = self.tokenizer.count_tokens(",");
        let mut kept: Vec<Value> = Vec::new();
        let mut used = self.tokens_of(&kept);

        for item in items {
            let cost = (if kept.is_empty() { 0 } else { separator }) + self.tokens_of(item);
            if used + cost > budget {
                break;
            }
            used += cost;
            kept.push(item.clone());
        }

        while self.tokens_of(&kept) > budget && kept.pop().is_some() {}
        if self.tokens_of(&kept) > budget {
            return Value::Null;
        }
        Value::Array(kept)
    }
}
