//! Integration tests for the context budgeter

use schemaforge::budget::{
    ApproximateTokenizer, ContextBudget, ContextBudgeter, ContextLayers, Tokenizer,
    TokenizerRegistry,
};
use serde_json::{json, Value};
use std::sync::Arc;

fn prose(words: usize) -> String {
    (0..words)
        .map(|i| ["users", "orders", "reference", "index", "unique"][i % 5])
        .collect::<Vec<_>>()
        .join(" ")
}

fn budgeter(total_limit: usize) -> ContextBudgeter {
    ContextBudgeter::new(ContextBudget::new(total_limit))
}

#[test]
fn test_content_under_budget_is_identity() {
    let budgeter = budgeter(10_000);
    let current = json!({"phase": "entities", "notes": prose(200)});
    let external = json!({"types": ["uuid", "text", "timestamptz"]});

    let once = budgeter.prepare_context(current.clone(), Value::Null, Value::Null, external.clone(), false);
    assert_eq!(once.current, current);
    assert_eq!(once.external, external);

    let twice = budgeter.prepare_context(once.current.clone(), Value::Null, Value::Null, once.external.clone(), false);
    assert_eq!(twice, once);
}

#[test]
fn test_oversized_text_is_token_prefix() {
    let budgeter = budgeter(1_000);
    let text = prose(2_000);
    let prepared = budgeter.prepare_context(
        Value::String(text.clone()),
        Value::Null,
        Value::Null,
        Value::Null,
        false,
    );

    let fitted = prepared.current.as_str().unwrap();
    let allowance = prepared.allocation.current;
    let tokenizer = budgeter.tokenizer();
    assert!(tokenizer.count_tokens(fitted) <= allowance);

    let tokens = tokenizer.tokenize(&text);
    let kept = tokenizer.count_tokens(fitted);
    assert_eq!(fitted, tokens[..kept].concat());
    assert_eq!(kept, allowance * 9 / 10);
}

#[test]
fn test_enhanced_keeps_more_current_state() {
    let budgeter = budgeter(1_000);
    let text = Value::String(prose(2_000));

    let nominal = budgeter.prepare_context(text.clone(), Value::Null, Value::Null, Value::Null, false);
    let enhanced = budgeter.prepare_context(text, Value::Null, Value::Null, Value::Null, true);

    assert!(enhanced.usage.current > nominal.usage.current);
    assert_eq!(enhanced.allocation.current, 450);
}

#[test]
fn test_missing_layers_are_empty_slices() {
    let budgeter = budgeter(4_000);
    let prepared = budgeter.prepare_layers(ContextLayers::default(), false);
    assert_eq!(prepared.current, Value::Null);
    assert_eq!(prepared.recent, Value::Null);
    assert_eq!(prepared.earlier, Value::Null);
    assert_eq!(prepared.external, Value::Null);
    assert_eq!(prepared.usage.total(), 0);
}

#[test]
fn test_older_layers_compressed_structurally() {
    let budgeter = budgeter(50_000);
    let tables: Vec<Value> = (0..25)
        .map(|i| json!({"name": format!("table_{}", i), "columns": [{"name": "id", "type": "uuid"}]}))
        .collect();
    let history = json!({"tables": tables, "relationships": {"a": 1, "b": 2}});

    let prepared = budgeter.prepare_context(Value::Null, history.clone(), history, Value::Null, false);
    assert_eq!(prepared.recent["tables"]["count"], 25);
    assert_eq!(prepared.recent["tables"]["items"][0], "table_0");
    assert_eq!(prepared.earlier["tables"]["items"].as_array().unwrap().len(), 5);
    assert_eq!(prepared.earlier["relationships"], json!({"count": 2, "keys": ["a", "b"]}));
}

#[test]
fn test_registered_tokenizer_is_used() {
    struct WordTokenizer;

    impl Tokenizer for WordTokenizer {
        fn name(&self) -> &str {
            "words"
        }

        fn tokenize<'a>(&self, text: &'a str) -> Vec<&'a str> {
            text.split_inclusive(' ').collect()
        }
    }

    let mut registry = TokenizerRegistry::new();
    registry.register("schema-model", Arc::new(WordTokenizer));
    registry.register("other", Arc::new(ApproximateTokenizer::default()));

    let budget = ContextBudget {
        total_limit: 100,
        model: "schema-model-large".to_string(),
    };
    let budgeter = ContextBudgeter::from_registry(budget, &registry);
    assert_eq!(budgeter.tokenizer().name(), "words");

    let prepared = budgeter.prepare_context(
        Value::String(prose(100)),
        Value::Null,
        Value::Null,
        Value::Null,
        false,
    );
    // 30-token slice, cut to 27 words
    assert_eq!(prepared.current.as_str().unwrap().split_whitespace().count(), 27);
}

fn table_layer(tables: usize, columns: usize) -> Value {
    let tables: Vec<Value> = (0..tables)
        .map(|t| {
            let cols: Vec<Value> = (0..columns)
                .map(|c| json!({"name": format!("column_{}", c), "type": "varchar(255)"}))
                .collect();
            json!({"name": format!("table_{}", t), "columns": cols})
        })
        .collect();
    json!({ "tables": tables })
}

#[test]
fn test_nested_table_list_keeps_whole_tables() {
    let budgeter = budgeter(4_000);
    let layer = table_layer(60, 12);
    let prepared = budgeter.prepare_context(layer.clone(), Value::Null, Value::Null, Value::Null, false);

    let all = layer["tables"].as_array().unwrap();
    let kept = prepared.current["tables"].as_array().unwrap();
    assert!(!kept.is_empty() && kept.len() < all.len());
    assert_eq!(kept.as_slice(), &all[..kept.len()]);
}

#[test]
fn test_serialized_layers_fit_their_slices() {
    let budgeter = budgeter(2_000);
    let tokenizer = budgeter.tokenizer();
    for enhanced in [false, true] {
        let prepared = budgeter.prepare_context(
            table_layer(40, 12),
            Value::Null,
            Value::Null,
            json!({"types": (0..400).map(|i| format!("type_{}", i)).collect::<Vec<_>>()}),
            enhanced,
        );
        let current = serde_json::to_string(&prepared.current).unwrap();
        let external = serde_json::to_string(&prepared.external).unwrap();
        assert!(tokenizer.count_tokens(&current) <= prepared.allocation.current);
        assert!(tokenizer.count_tokens(&external) <= prepared.allocation.external);
        assert_eq!(tokenizer.count_tokens(&current), prepared.usage.current);
    }
}
