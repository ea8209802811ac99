//! Rate and Concurrency Governor
//!
//! Shared guard acquired before every call to the external model. Admission is bounded
//! by two trailing 60-second windows (request count and weighted cost) and by a global
//! concurrency semaphore nested with optional per-category semaphores. Concurrency slots
//! are held for the whole guarded call, not just at admission.
//!
//! One governor is constructed per process (or per test) and shared by `Arc`.

use crate::error::KernelError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

pub mod permit;
pub mod window;

pub use permit::Permit;
pub use window::SlidingWindow;

/// Length of the trailing rate window
pub const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Governor limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateGovernorConfig {
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u64,

    /// Ceiling on summed estimated cost (e.g. tokens) per minute
    #[serde(default = "default_cost_per_minute")]
    pub cost_per_minute: u64,

    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Per-category concurrency caps, nested inside the global cap
    #[serde(default)]
    pub max_concurrency_per_category: HashMap<String, usize>,
}

fn default_requests_per_minute() -> u64 {
    50
}

fn default_cost_per_minute() -> u64 {
    40_000
}

fn default_max_concurrent() -> usize {
    5
}

impl Default for RateGovernorConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
            cost_per_minute: default_cost_per_minute(),
            max_concurrent: default_max_concurrent(),
            max_concurrency_per_category: HashMap::new(),
        }
    }
}

impl RateGovernorConfig {
    pub fn with_category(mut self, category: impl Into<String>, limit: usize) -> Self {
        self.max_concurrency_per_category
            .insert(category.into(), limit);
        self
    }

    /// Zero capacities would block every caller forever, so they are rejected here.
    pub fn validate(&self) -> Result<(), String> {
        if self.requests_per_minute == 0 {
            return Err("requests_per_minute must be greater than 0".to_string());
        }
        if self.cost_per_minute == 0 {
            return Err("cost_per_minute must be greater than 0".to_string());
        }
        if self.max_concurrent == 0 {
            return Err("max_concurrent must be greater than 0".to_string());
        }
        let mut zero: Vec<&str> = self
            .max_concurrency_per_category
            .iter()
            .filter(|(_, limit)| **limit == 0)
            .map(|(name, _)| name.as_str())
            .collect();
        if !zero.is_empty() {
            zero.sort_unstable();
            return Err(format!(
                "category concurrency limits must be greater than 0: {}",
                zero.join(", ")
            ));
        }
        Ok(())
    }
}

/// Point-in-time governor counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GovernorStats {
    pub in_flight: usize,
    pub requests_in_window: u64,
    pub cost_in_window: u64,
    pub total_granted: u64,
    /// Admissions that had to sleep for a rate window
    pub total_waited: u64,
}

struct RateWindows {
    requests: SlidingWindow,
    cost: SlidingWindow,
    total_granted: u64,
    total_waited: u64,
}

impl RateWindows {
    fn prune(&mut self, now: Instant) {
        self.requests.prune(now);
        self.cost.prune(now);
    }
}

/// Process-wide guard for external model calls
pub struct RateGovernor {
    config: RateGovernorConfig,
    windows: Mutex<RateWindows>,
    global: Arc<Semaphore>,
    categories: HashMap<String, Arc<Semaphore>>,
    in_flight: Arc<AtomicUsize>,
}

impl RateGovernor {
    /// Build a governor; each call yields an independent handle with fresh counters.
    pub fn new(config: RateGovernorConfig) -> Result<Self, KernelError> {
        config
            .validate()
            .map_err(|e| KernelError::ConfigError(format!("Invalid rate governor: {}", e)))?;

        let categories = config
            .max_concurrency_per_category
            .iter()
            .map(|(name, limit)| (name.clone(), Arc::new(Semaphore::new(*limit))))
            .collect();

        debug!(
            requests_per_minute = config.requests_per_minute,
            cost_per_minute = config.cost_per_minute,
            max_concurrent = config.max_concurrent,
            categories = config.max_concurrency_per_category.len(),
            "Rate governor constructed"
        );

        Ok(Self {
            windows: Mutex::new(RateWindows {
                requests: SlidingWindow::new(RATE_WINDOW, config.requests_per_minute),
                cost: SlidingWindow::new(RATE_WINDOW, config.cost_per_minute),
                total_granted: 0,
                total_waited: 0,
            }),
            global: Arc::new(Semaphore::new(config.max_concurrent)),
            categories,
            in_flight: Arc::new(AtomicUsize::new(0)),
            config,
        })
    }

    pub fn config(&self) -> &RateGovernorConfig {
        &self.config
    }

    /// Wait for concurrency slots and rate-window room, then return a permit.
    ///
    /// The category slot is taken first, then the global slot, then rate admission.
    /// Admission is recorded in the same critical section that checks it, so a caller
    /// cancelled at any await point leaves no trace in the windows and every slot it
    /// held is returned on drop.
    ///
    /// A caller sleeping on a full rate window keeps its concurrency slots while it
    /// sleeps. When the windows are full no other caller could be admitted either, and
    /// holding the slots keeps waiters in FIFO order; admitting before taking a slot
    /// would instead record window entries for callers still queued on a semaphore.
    pub async fn acquire(&self, category: Option<&str>, estimated_cost: u64) -> Permit {
        let category_slot = match category.and_then(|name| self.categories.get(name)) {
            Some(semaphore) => Some(Self::take_slot(semaphore).await),
            None => None,
        };
        let global_slot = Self::take_slot(&self.global).await;

        self.admit(category, estimated_cost).await;

        Permit::new(
            category.map(str::to_string),
            estimated_cost,
            Arc::clone(&self.in_flight),
            category_slot,
            global_slot,
        )
    }

    /// Run `operation` while holding a permit.
    pub async fn guarded<F, T>(
        &self,
        category: Option<&str>,
        estimated_cost: u64,
        operation: F,
    ) -> T
    where
        F: Future<Output = T>,
    {
        let _permit = self.acquire(category, estimated_cost).await;
        operation.await
    }

    async fn take_slot(semaphore: &Arc<Semaphore>) -> OwnedSemaphorePermit {
        match Arc::clone(semaphore).acquire_owned().await {
            Ok(slot) => slot,
            // The semaphores are private and never closed
            Err(_) => unreachable!("governor semaphore closed"),
        }
    }

    async fn admit(&self, category: Option<&str>, estimated_cost: u64) {
        let mut waited = false;
        loop {
            let wait = {
                let mut windows = self.windows.lock();
                let now = Instant::now();
                windows.prune(now);

                let request_wait = windows.requests.wait_for(now, 1);
                let cost_wait = windows.cost.wait_for(now, estimated_cost);
                match request_wait.max(cost_wait) {
                    None => {
                        if estimated_cost > windows.cost.ceiling() {
                            warn!(
                                estimated_cost,
                                cost_per_minute = windows.cost.ceiling(),
                                "Request cost exceeds the per-minute ceiling; admitted alone"
                            );
                        }
                        windows.requests.record(now, 1);
                        windows.cost.record(now, estimated_cost);
                        windows.total_granted += 1;
                        if waited {
                            windows.total_waited += 1;
                        }
                        return;
                    }
                    Some(wait) => wait,
                }
            };

            waited = true;
            debug!(
                category = category.unwrap_or("-"),
                estimated_cost,
                wait_ms = wait.as_millis() as u64,
                "Rate window full; waiting"
            );
            sleep(wait).await;
        }
    }

    /// Snapshot of current counters
    pub fn stats(&self) -> GovernorStats {
        let mut windows = self.windows.lock();
        windows.prune(Instant::now());
        GovernorStats {
            in_flight: self.in_flight.load(Ordering::SeqCst),
            requests_in_window: windows.requests.total(),
            cost_in_window: windows.cost.total(),
            total_granted: windows.total_granted,
            total_waited: windows.total_waited,
        }
    }

    /// Slots currently free for a category, or globally when `category` is `None`.
    pub fn available_slots(&self, category: Option<&str>) -> usize {
        match category.and_then(|name| self.categories.get(name)) {
            Some(semaphore) => semaphore.available_permits(),
            None => self.global.available_permits(),
        }
    }
}

impl std::fmt::Debug for RateGovernor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateGovernor")
            .field("config", &self.config)
            .field("in_flight", &self.in_flight.load(Ordering::SeqCst))
            .finish()
    }
}
