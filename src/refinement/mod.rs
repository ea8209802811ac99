//! Iterative Refinement Loop Controller
//!
//! Repeats a caller-supplied async step, feeding each result back into the next
//! iteration, until a termination predicate holds or a safety bound fires: iteration
//! cap, wall-clock deadline, or oscillation between recently seen states.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod canonical;
pub mod controller;
pub mod oscillation;

pub use canonical::{canonical_hash, Canonicalizer, KeyIdExtractor, StableIdExtractor, StateHash};
pub use controller::{
    run_loop, step_fn, FnStep, LoopResult, RefinementLoop, StepFunction, TerminationReason,
};
pub use oscillation::OscillationDetector;

/// Loop bounds and cycle detection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Hard cap on completed iterations
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Overall deadline for the whole loop, in seconds
    #[serde(default = "default_max_wall_time_sec")]
    pub max_wall_time_sec: u64,

    /// Number of prior iterations a new state is compared against
    #[serde(default = "default_oscillation_window")]
    pub oscillation_window: usize,

    #[serde(default = "default_true")]
    pub enable_cycle_detection: bool,
}

fn default_max_iterations() -> usize {
    5
}

fn default_max_wall_time_sec() -> u64 {
    300
}

fn default_oscillation_window() -> usize {
    3
}

fn default_true() -> bool {
    true
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_wall_time_sec: default_max_wall_time_sec(),
            oscillation_window: default_oscillation_window(),
            enable_cycle_detection: default_true(),
        }
    }
}

impl LoopConfig {
    pub fn new(max_iterations: usize, max_wall_time_sec: u64) -> Self {
        Self {
            max_iterations,
            max_wall_time_sec,
            ..Self::default()
        }
    }

    pub fn with_oscillation_window(mut self, window: usize) -> Self {
        self.oscillation_window = window;
        self
    }

    pub fn with_cycle_detection(mut self, enabled: bool) -> Self {
        self.enable_cycle_detection = enabled;
        self
    }

    pub fn wall_time(&self) -> Duration {
        Duration::from_secs(self.max_wall_time_sec)
    }

    /// Validate loop bounds
    pub fn validate(&self) -> Result<(), String> {
        if self.max_iterations == 0 {
            return Err("max_iterations must be at least 1".to_string());
        }
        if self.max_wall_time_sec == 0 {
            return Err("max_wall_time_sec must be at least 1".to_string());
        }
        if self.enable_cycle_detection && self.oscillation_window == 0 {
            return Err(
                "oscillation_window must be at least 1 when cycle detection is enabled"
                    .to_string(),
            );
        }
        Ok(())
    }
}
