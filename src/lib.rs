//! SchemaForge: Governance Kernel for Iterative Schema Generation
//!
//! Safety primitives for pipelines that repeatedly call an external generative model:
//! a bounded refinement loop with oscillation detection, a sliding-window rate and
//! concurrency governor, and a token budgeter for layered context.

pub mod budget;
pub mod cli;
pub mod config;
pub mod error;
pub mod governor;
pub mod logging;
pub mod refinement;

pub use budget::{BudgetedContext, ContextBudget, ContextBudgeter, ContextLayers};
pub use error::KernelError;
pub use governor::{Permit, RateGovernor, RateGovernorConfig};
pub use refinement::{run_loop, step_fn, LoopConfig, LoopResult, StepFunction, TerminationReason};
