//! Round-robin cursor over a route's target pool.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Stores the index of the next target to hand out.
///
/// The index always stays in `[0, len)` for the pool length it was last
/// advanced with, so a pool that shrinks never reads out of bounds.
#[derive(Debug, Default)]
pub struct RoundRobin {
    index: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a given index (carried over when a pool is rebuilt).
    pub fn starting_at(index: usize) -> Self {
        Self {
            index: AtomicUsize::new(index),
        }
    }

    /// Current index, without advancing.
    pub fn current(&self) -> usize {
        self.index.load(Ordering::Relaxed)
    }

    /// Return the index to use now and advance to `(j + 1) % len`.
    pub fn next_index(&self, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }

        let previous = self
            .index
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |j| Some((j % len + 1) % len))
            .unwrap_or_else(|j| j);
        Some(previous % len)
    }
}
