//! Property-based tests for canonical state hashing

use proptest::prelude::*;
use schemaforge::refinement::{canonical_hash, Canonicalizer, KeyIdExtractor};
use serde_json::{json, Map, Value};
use std::sync::Arc;

fn tables(names: &[String]) -> Vec<Value> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| json!({"name": name, "columns": i, "comment": format!("table {}", name)}))
        .collect()
}

/// Rebuild an object with its keys in reverse insertion order
fn reversed_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut reversed = Map::new();
            for (key, value) in map.iter().rev() {
                reversed.insert(key.clone(), reversed_keys(value));
            }
            Value::Object(reversed)
        }
        Value::Array(items) => Value::Array(items.iter().map(reversed_keys).collect()),
        other => other.clone(),
    }
}

#[test]
fn test_list_order_does_not_change_hash() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(
            &(prop::collection::vec("[a-z]{1,8}", 1..12), any::<usize>()),
            |(names, rotation)| {
                let mut items = tables(&names);
                let original = json!({"tables": items.clone()});
                let shift = rotation % items.len();
                items.rotate_left(shift);
                let rotated = json!({"tables": items.clone()});
                items.reverse();
                let reversed = json!({"tables": items});

                prop_assert_eq!(canonical_hash(&original), canonical_hash(&rotated));
                prop_assert_eq!(canonical_hash(&original), canonical_hash(&reversed));
                Ok(())
            },
        )
        .unwrap();
}

#[test]
fn test_key_order_does_not_change_hash() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(&prop::collection::vec("[a-z]{1,8}", 0..8), |names| {
            let state = json!({"phase": "entities", "tables": tables(&names), "version": 3});
            prop_assert_eq!(canonical_hash(&state), canonical_hash(&reversed_keys(&state)));
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_case_and_whitespace_do_not_change_hash() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(
            &prop::collection::vec("[a-z]{1,6}", 1..6),
            |words| {
                let plain = words.join(" ");
                let noisy = format!("  {}\t", words.join("   ").to_uppercase());
                prop_assert_eq!(
                    canonical_hash(&json!({"description": plain})),
                    canonical_hash(&json!({"description": noisy}))
                );
                Ok(())
            },
        )
        .unwrap();
}

#[test]
fn test_distinct_table_sets_hash_differently() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(
            &(prop::collection::btree_set("[a-z]{1,8}", 1..6), "[a-z]{9,12}"),
            |(names, extra)| {
                let names: Vec<String> = names.into_iter().collect();
                let mut grown = names.clone();
                grown.push(extra);
                prop_assert_ne!(
                    canonical_hash(&json!({"tables": tables(&names)})),
                    canonical_hash(&json!({"tables": tables(&grown)}))
                );
                Ok(())
            },
        )
        .unwrap();
}

#[test]
fn test_custom_extractor_hash_is_stable_across_runs() {
    let canonicalizer = Canonicalizer::new(Arc::new(KeyIdExtractor::new(["table_name"])));
    let state = json!({"tables": [{"table_name": "b"}, {"table_name": "a"}]});
    let first = canonicalizer.hash_value(&state);
    let second = canonicalizer.hash_value(&reversed_keys(&state));
    assert_eq!(first, second);
    assert_eq!(first, canonicalizer.hash(&state).unwrap());
}
