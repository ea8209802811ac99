//! Scoped permit for one guarded model call

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::OwnedSemaphorePermit;
use tokio::time::Instant;
use tracing::trace;

/// One in-flight guarded operation.
///
/// Holds the global concurrency slot and, for configured categories, the category slot
/// until dropped. Dropping releases both on every exit path.
#[must_use = "the guarded call is only bounded while the permit is alive"]
pub struct Permit {
    category: Option<String>,
    estimated_cost: u64,
    acquired_at: Instant,
    in_flight: Arc<AtomicUsize>,
    _category_slot: Option<OwnedSemaphorePermit>,
    _global_slot: OwnedSemaphorePermit,
}

impl Permit {
    pub(crate) fn new(
        category: Option<String>,
        estimated_cost: u64,
        in_flight: Arc<AtomicUsize>,
        category_slot: Option<OwnedSemaphorePermit>,
        global_slot: OwnedSemaphorePermit,
    ) -> Self {
        in_flight.fetch_add(1, Ordering::SeqCst);
        Self {
            category,
            estimated_cost,
            acquired_at: Instant::now(),
            in_flight,
            _category_slot: category_slot,
            _global_slot: global_slot,
        }
    }

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    pub fn estimated_cost(&self) -> u64 {
        self.estimated_cost
    }

    pub fn held_for(&self) -> std::time::Duration {
        self.acquired_at.elapsed()
    }
}

impl std::fmt::Debug for Permit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Permit")
            .field("category", &self.category)
            .field("estimated_cost", &self.estimated_cost)
            .field("acquired_at", &self.acquired_at)
            .finish()
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        trace!(
            category = self.category.as_deref().unwrap_or("-"),
            held_ms = self.acquired_at.elapsed().as_millis() as u64,
            "Rate governor permit released"
        );
    }
}
