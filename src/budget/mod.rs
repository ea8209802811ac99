//! Context Budgeter
//!
//! Fits layered pipeline context into a fixed token budget. The budget is split into
//! fixed slices (current step 30%, recent phase 25%, earlier phases 25%, external
//! catalogs 15%, reserve 5%). Older layers are summarized structurally before being
//! fitted; every layer is then fitted to its slice by shape. The budgeter never fails:
//! unknown models get an approximate tokenizer and oversized content is truncated.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

pub mod fit;
pub mod summarize;
pub mod tokenizer;

pub use fit::{Fitter, MIN_PARTIAL_TOKENS, TRUNCATION_RATIO};
pub use tokenizer::{ApproximateTokenizer, Tokenizer, TokenizerRegistry};

/// Slice shares in percent of the total budget
pub const CURRENT_PERCENT: usize = 30;
pub const RECENT_PERCENT: usize = 25;
pub const EARLIER_PERCENT: usize = 25;
pub const EXTERNAL_PERCENT: usize = 15;
pub const RESERVE_PERCENT: usize = 5;

/// Enhanced steps widen the current slice to 1.5x (45% of the total)
pub const ENHANCED_CURRENT_PERCENT: usize = CURRENT_PERCENT * 3 / 2;

/// Token budget configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextBudget {
    #[serde(default = "default_total_limit")]
    pub total_limit: usize,

    /// Model name hint; only used to pick a tokenizer
    #[serde(default = "default_model")]
    pub model: String,
}

fn default_total_limit() -> usize {
    8_000
}

fn default_model() -> String {
    "gpt-4".to_string()
}

impl Default for ContextBudget {
    fn default() -> Self {
        Self {
            total_limit: default_total_limit(),
            model: default_model(),
        }
    }
}

impl ContextBudget {
    pub fn new(total_limit: usize) -> Self {
        Self {
            total_limit,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.total_limit == 0 {
            return Err("total_limit must be greater than 0".to_string());
        }
        if self.model.trim().is_empty() {
            return Err("model cannot be empty".to_string());
        }
        Ok(())
    }

    /// Token allowance per slice
    pub fn allocate(&self, enhanced: bool) -> SliceAllocation {
        let share = |percent: usize| self.total_limit * percent / 100;
        let current_percent = if enhanced {
            ENHANCED_CURRENT_PERCENT
        } else {
            CURRENT_PERCENT
        };
        let nominal = share(CURRENT_PERCENT)
            + share(RECENT_PERCENT)
            + share(EARLIER_PERCENT)
            + share(EXTERNAL_PERCENT);

        SliceAllocation {
            current: share(current_percent),
            recent: share(RECENT_PERCENT),
            earlier: share(EARLIER_PERCENT),
            external: share(EXTERNAL_PERCENT),
            reserve: self.total_limit.saturating_sub(nominal),
            enhanced,
        }
    }
}

/// Per-slice token allowances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceAllocation {
    pub current: usize,
    pub recent: usize,
    pub earlier: usize,
    pub external: usize,
    /// Never allocated to content
    pub reserve: usize,
    pub enhanced: bool,
}

impl SliceAllocation {
    /// Tokens handed out to content slices
    pub fn allocated(&self) -> usize {
        self.current + self.recent + self.earlier + self.external
    }
}

/// Input layers; missing layers are `Value::Null`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextLayers {
    #[serde(default)]
    pub current: Value,
    #[serde(default)]
    pub recent: Value,
    #[serde(default)]
    pub earlier: Value,
    #[serde(default)]
    pub external: Value,
}

impl ContextLayers {
    pub fn new(current: Value) -> Self {
        Self {
            current,
            ..Self::default()
        }
    }

    pub fn with_recent(mut self, recent: Value) -> Self {
        self.recent = recent;
        self
    }

    pub fn with_earlier(mut self, earlier: Value) -> Self {
        self.earlier = earlier;
        self
    }

    pub fn with_external(mut self, external: Value) -> Self {
        self.external = external;
        self
    }
}

/// Serialized token cost per slice, as sent to the model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextUsage {
    pub current: usize,
    pub recent: usize,
    pub earlier: usize,
    pub external: usize,
}

impl ContextUsage {
    pub fn total(&self) -> usize {
        self.current + self.recent + self.earlier + self.external
    }
}

/// Context fitted to its slices
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetedContext {
    pub current: Value,
    pub recent: Value,
    pub earlier: Value,
    pub external: Value,
    pub allocation: SliceAllocation,
    pub usage: ContextUsage,
}

/// Stateless budgeter; safe to share across calls and tasks
#[derive(Clone)]
pub struct ContextBudgeter {
    budget: ContextBudget,
    tokenizer: Arc<dyn Tokenizer>,
}

impl ContextBudgeter {
    /// Budgeter using the default registry (approximate tokenizer for every model)
    pub fn new(budget: ContextBudget) -> Self {
        Self::from_registry(budget, &TokenizerRegistry::default())
    }

    pub fn from_registry(budget: ContextBudget, registry: &TokenizerRegistry) -> Self {
        let tokenizer = registry.for_model(&budget.model);
        Self { budget, tokenizer }
    }

    pub fn with_tokenizer(budget: ContextBudget, tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self { budget, tokenizer }
    }

    pub fn budget(&self) -> &ContextBudget {
        &self.budget
    }

    pub fn tokenizer(&self) -> &dyn Tokenizer {
        self.tokenizer.as_ref()
    }

    pub fn count_tokens(&self, text: &str) -> usize {
        self.tokenizer.count_tokens(text)
    }

    /// Fit four context layers to the budget.
    ///
    /// `recent` and `earlier` are summarized first; `current` gets 1.5x its slice when
    /// `enhanced` is set.
    pub fn prepare_context(
        &self,
        current: Value,
        recent: Value,
        earlier: Value,
        external: Value,
        enhanced: bool,
    ) -> BudgetedContext {
        let allocation = self.budget.allocate(enhanced);
        let fitter = Fitter::new(self.tokenizer.as_ref());

        let recent = summarize::summarize(&recent, summarize::RECENT_ITEMS);
        let earlier = summarize::summarize(&earlier, summarize::EARLIER_ITEMS);

        let current = fitter.fit(&current, allocation.current);
        let recent = fitter.fit(&recent, allocation.recent);
        let earlier = fitter.fit(&earlier, allocation.earlier);
        let external = fitter.fit(&external, allocation.external);

        let usage = ContextUsage {
            current: fitter.cost(&current),
            recent: fitter.cost(&recent),
            earlier: fitter.cost(&earlier),
            external: fitter.cost(&external),
        };

        debug!(
            total_limit = self.budget.total_limit,
            enhanced,
            tokenizer = self.tokenizer.name(),
            current = usage.current,
            recent = usage.recent,
            earlier = usage.earlier,
            external = usage.external,
            "Context prepared"
        );

        BudgetedContext {
            current,
            recent,
            earlier,
            external,
            allocation,
            usage,
        }
    }

    pub fn prepare_layers(&self, layers: ContextLayers, enhanced: bool) -> BudgetedContext {
        self.prepare_context(
            layers.current,
            layers.recent,
            layers.earlier,
            layers.external,
            enhanced,
        )
    }
}

impl std::fmt::Debug for ContextBudgeter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextBudgeter")
            .field("budget", &self.budget)
            .field("tokenizer", &self.tokenizer.name())
            .finish()
    }
}
