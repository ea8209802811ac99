//! End-to-end composition: refinement loops whose steps budget their context and make
//! governed calls to a fake model.

use async_trait::async_trait;
use schemaforge::budget::{ContextBudget, ContextBudgeter};
use schemaforge::config::KernelConfig;
use schemaforge::error::KernelError;
use schemaforge::governor::RateGovernor;
use schemaforge::refinement::{run_loop, LoopConfig, StepFunction, TerminationReason};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Stands in for the model transport; counts overlapping calls
#[derive(Default)]
struct FakeModel {
    active: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
    rejects: bool,
}

impl FakeModel {
    fn rejecting() -> Self {
        Self {
            rejects: true,
            ..Self::default()
        }
    }

    async fn complete(&self, prompt_tokens: usize) -> Result<Value, KernelError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.rejects {
            return Err(KernelError::InvalidInput("prompt rejected".to_string()));
        }
        Ok(json!({"table": format!("t{}", call), "prompt_tokens": prompt_tokens}))
    }
}

struct SchemaStep {
    governor: Arc<RateGovernor>,
    budgeter: ContextBudgeter,
    model: Arc<FakeModel>,
    catalog: Value,
}

#[async_trait]
impl StepFunction<Value> for SchemaStep {
    type Error = KernelError;

    async fn call(&mut self, previous: Option<&Value>) -> Result<Value, KernelError> {
        let current = previous.cloned().unwrap_or_else(|| json!({"tables": []}));
        let context = self.budgeter.prepare_context(
            current.clone(),
            Value::Null,
            Value::Null,
            self.catalog.clone(),
            false,
        );
        let prompt_tokens = context.usage.total();

        let reply = self
            .governor
            .guarded(
                Some("schema"),
                prompt_tokens as u64,
                self.model.complete(prompt_tokens),
            )
            .await?;

        let mut next = current;
        if let Some(tables) = next["tables"].as_array_mut() {
            tables.push(reply["table"].clone());
        }
        Ok(next)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_loops_share_one_governor() {
    let mut config = KernelConfig::default();
    config.rate_governor.max_concurrent = 2;
    config
        .rate_governor
        .max_concurrency_per_category
        .insert("schema".to_string(), 2);
    config.rate_governor.requests_per_minute = 1_000;
    let config = config.validated().unwrap();

    let governor = Arc::new(RateGovernor::new(config.rate_governor.clone()).unwrap());
    let model = Arc::new(FakeModel::default());
    let catalog = json!({"types": ["uuid", "text", "integer", "timestamptz"]});

    let mut handles = Vec::new();
    for _ in 0..5 {
        let mut step = SchemaStep {
            governor: Arc::clone(&governor),
            budgeter: ContextBudgeter::new(ContextBudget::new(4_000)),
            model: Arc::clone(&model),
            catalog: catalog.clone(),
        };
        let loop_config = config.refinement.clone();
        handles.push(tokio::spawn(async move {
            run_loop(
                &mut step,
                |state: &Value| state["tables"].as_array().map(|t| t.len()) == Some(3),
                &loop_config,
            )
            .await
        }));
    }

    for handle in handles {
        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.terminated_by, TerminationReason::ConditionMet);
        assert_eq!(result.iterations, 3);
    }

    assert!(model.peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(model.calls.load(Ordering::SeqCst), 15);
    assert_eq!(governor.stats().total_granted, 15);
}

#[tokio::test]
async fn test_model_error_propagates_and_releases_slots() {
    let config = KernelConfig::default();
    let governor = Arc::new(RateGovernor::new(config.rate_governor.clone()).unwrap());
    let model = Arc::new(FakeModel::rejecting());

    let mut step = SchemaStep {
        governor: Arc::clone(&governor),
        budgeter: ContextBudgeter::new(ContextBudget::default()),
        model: Arc::clone(&model),
        catalog: Value::Null,
    };
    let err = run_loop(&mut step, |_| false, &LoopConfig::new(3, 10))
        .await
        .unwrap_err();

    assert!(matches!(err, KernelError::InvalidInput(_)));
    assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    assert_eq!(governor.stats().in_flight, 0);
    assert_eq!(
        governor.available_slots(None),
        config.rate_governor.max_concurrent
    );
}
