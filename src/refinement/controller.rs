//! Refinement loop execution

use crate::refinement::canonical::{Canonicalizer, StableIdExtractor, StateHash};
use crate::refinement::oscillation::OscillationDetector;
use crate::refinement::LoopConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Deadline used when `max_wall_time_sec` is too large to represent as an instant
const UNBOUNDED_WALL_TIME: Duration = Duration::from_secs(86_400 * 365 * 30);

/// One refinement step.
///
/// `previous` is `None` on the first iteration and the prior iteration's output after
/// that. Errors are returned to the loop's caller untouched.
#[async_trait]
pub trait StepFunction<T>: Send
where
    T: Send + Sync,
{
    type Error: Send;

    async fn call(&mut self, previous: Option<&T>) -> Result<T, Self::Error>;
}

/// Adapts an async closure taking an owned copy of the previous result.
pub struct FnStep<F>(F);

/// Wrap a closure `FnMut(Option<T>) -> impl Future<Output = Result<T, E>>` as a step.
pub fn step_fn<F>(f: F) -> FnStep<F> {
    FnStep(f)
}

#[async_trait]
impl<T, E, F, Fut> StepFunction<T> for FnStep<F>
where
    T: Clone + Send + Sync,
    E: Send,
    F: FnMut(Option<T>) -> Fut + Send,
    Fut: Future<Output = Result<T, E>> + Send,
{
    type Error = E;

    async fn call(&mut self, previous: Option<&T>) -> Result<T, E> {
        (self.0)(previous.cloned()).await
    }
}

/// Why a loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    ConditionMet,
    MaxIterations,
    Timeout,
    Oscillation,
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TerminationReason::ConditionMet => "condition_met",
            TerminationReason::MaxIterations => "max_iterations",
            TerminationReason::Timeout => "timeout",
            TerminationReason::Oscillation => "oscillation",
        };
        f.write_str(name)
    }
}

/// Outcome of a refinement loop
#[derive(Debug, Clone)]
pub struct LoopResult<T> {
    /// Output of the last completed iteration
    pub result: Option<T>,
    pub iterations: usize,
    pub terminated_by: TerminationReason,
    /// Every completed iteration's output, oldest first
    pub history: Vec<T>,
    pub condition_met: bool,
    /// Canonical hashes recorded while cycle detection was enabled
    pub state_hashes: Vec<StateHash>,
    pub elapsed: Duration,
}

impl<T> LoopResult<T> {
    pub fn is_converged(&self) -> bool {
        self.condition_met
    }
}

/// Loop controller bundling bounds with a canonicalizer
#[derive(Debug, Clone)]
pub struct RefinementLoop {
    config: LoopConfig,
    canonicalizer: Canonicalizer,
}

impl RefinementLoop {
    pub fn new(config: LoopConfig) -> Self {
        Self {
            config,
            canonicalizer: Canonicalizer::default(),
        }
    }

    /// Order arrays of objects by a caller-specific identity when hashing states
    pub fn with_id_extractor(mut self, extractor: Arc<dyn StableIdExtractor>) -> Self {
        self.canonicalizer = Canonicalizer::new(extractor);
        self
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Run `step` until `termination_check` holds or a bound fires.
    pub async fn run<T, S, C>(
        &self,
        step: &mut S,
        mut termination_check: C,
    ) -> Result<LoopResult<T>, S::Error>
    where
        T: Serialize + Clone + Send + Sync,
        S: StepFunction<T> + ?Sized,
        C: FnMut(&T) -> bool,
    {
        let started = Instant::now();
        let deadline = started
            .checked_add(self.config.wall_time())
            .unwrap_or_else(|| started + UNBOUNDED_WALL_TIME);
        let mut run = LoopState::new(&self.config, started);

        for iteration in 0..self.config.max_iterations {
            let outcome = tokio::time::timeout_at(deadline, step.call(run.history.last())).await;
            let output = match outcome {
                Ok(result) => result?,
                Err(_) => {
                    warn!(
                        iteration,
                        completed = run.history.len(),
                        max_wall_time_sec = self.config.max_wall_time_sec,
                        "Refinement loop deadline elapsed; discarding in-flight iteration"
                    );
                    return Ok(run.finish(TerminationReason::Timeout));
                }
            };
            run.history.push(output);
            let current = &run.history[run.history.len() - 1];

            debug!(
                iteration,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Refinement iteration completed"
            );

            if termination_check(current) {
                return Ok(run.finish(TerminationReason::ConditionMet));
            }

            if self.config.enable_cycle_detection {
                match self.canonicalizer.hash(current) {
                    Ok(hash) => {
                        run.state_hashes.push(hash);
                        if run.detector.observe(hash) {
                            warn!(
                                iteration,
                                state_hash = %hex::encode(hash),
                                window = self.config.oscillation_window,
                                "Refinement loop revisited a recent state"
                            );
                            return Ok(run.finish(TerminationReason::Oscillation));
                        }
                    }
                    Err(e) => {
                        warn!(
                            iteration,
                            error = %e,
                            "State is not representable as a value; skipping cycle check"
                        );
                    }
                }
            }
        }

        Ok(run.finish(TerminationReason::MaxIterations))
    }
}

struct LoopState<T> {
    history: Vec<T>,
    state_hashes: Vec<StateHash>,
    detector: OscillationDetector,
    started: Instant,
}

impl<T: Clone> LoopState<T> {
    fn new(config: &LoopConfig, started: Instant) -> Self {
        Self {
            history: Vec::with_capacity(config.max_iterations.min(64)),
            state_hashes: Vec::new(),
            detector: OscillationDetector::new(config.oscillation_window),
            started,
        }
    }

    fn finish(self, terminated_by: TerminationReason) -> LoopResult<T> {
        let condition_met = terminated_by == TerminationReason::ConditionMet;
        let elapsed = self.started.elapsed();
        info!(
            iterations = self.history.len(),
            terminated_by = %terminated_by,
            elapsed_ms = elapsed.as_millis() as u64,
            "Refinement loop finished"
        );
        LoopResult {
            result: self.history.last().cloned(),
            iterations: self.history.len(),
            terminated_by,
            history: self.history,
            condition_met,
            state_hashes: self.state_hashes,
            elapsed,
        }
    }
}

/// Run a refinement loop with the default canonicalizer.
pub async fn run_loop<T, S, C>(
    step: &mut S,
    termination_check: C,
    config: &LoopConfig,
) -> Result<LoopResult<T>, S::Error>
where
    T: Serialize + Clone + Send + Sync,
    S: StepFunction<T> + ?Sized,
    C: FnMut(&T) -> bool,
{
    RefinementLoop::new(config.clone())
        .run(step, termination_check)
        .await
}
