//! Rolling window of recent state hashes

use crate::refinement::canonical::StateHash;
use std::collections::VecDeque;

/// Detects a refinement loop revisiting one of its recent states.
#[derive(Debug, Clone)]
pub struct OscillationDetector {
    window: usize,
    recent: VecDeque<StateHash>,
}

impl OscillationDetector {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            recent: VecDeque::with_capacity(window),
        }
    }

    /// Compare `hash` against the window, then record it.
    ///
    /// The hash is recorded whether or not it matched, so the window always holds the
    /// most recent `window` iterations.
    pub fn observe(&mut self, hash: StateHash) -> bool {
        let repeated = self.recent.contains(&hash);
        if self.window > 0 {
            if self.recent.len() == self.window {
                self.recent.pop_front();
            }
            self.recent.push_back(hash);
        }
        repeated
    }

    pub fn len(&self) -> usize {
        self.recent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recent.is_empty()
    }
}
