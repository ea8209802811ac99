//! Trailing sliding-window counter

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Weighted counter over a trailing time window.
///
/// Each admission is stored with its timestamp, so the total always reflects exactly the
/// entries younger than `span`. An entry recorded at `t` stops counting at `t + span`.
/// The total saturates at `u64::MAX` rather than wrapping.
#[derive(Debug)]
pub struct SlidingWindow {
    span: Duration,
    ceiling: u64,
    entries: VecDeque<(Instant, u64)>,
    total: u64,
}

impl SlidingWindow {
    pub fn new(span: Duration, ceiling: u64) -> Self {
        Self {
            span,
            ceiling,
            entries: VecDeque::new(),
            total: 0,
        }
    }

    /// Drop entries that have aged out of the window
    pub fn prune(&mut self, now: Instant) {
        while let Some(&(at, weight)) = self.entries.front() {
            if now.saturating_duration_since(at) < self.span {
                break;
            }
            self.entries.pop_front();
            self.total = self.total.saturating_sub(weight);
        }
        if self.entries.is_empty() {
            self.total = 0;
        }
    }

    /// How long until `weight` more fits under the ceiling; `None` if it fits now.
    ///
    /// Expects a pruned window. A weight above the ceiling on its own fits once the
    /// window is empty.
    pub fn wait_for(&self, now: Instant, weight: u64) -> Option<Duration> {
        let wanted = self.total.saturating_add(weight);
        if weight == 0 || wanted <= self.ceiling {
            return None;
        }
        if self.entries.is_empty() {
            return None;
        }

        let excess = wanted - self.ceiling;
        let mut freed = 0u64;
        let mut release_at = None;
        for &(at, entry_weight) in &self.entries {
            freed = freed.saturating_add(entry_weight);
            release_at = Some(at);
            if freed >= excess {
                break;
            }
        }

        release_at.map(|at| (at + self.span).saturating_duration_since(now))
    }

    pub fn record(&mut self, now: Instant, weight: u64) {
        if weight == 0 {
            return;
        }
        self.entries.push_back((now, weight));
        self.total = self.total.saturating_add(weight);
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }
}
