//! In-process window store.
//!
//! Windows for identities that stop sending are dropped by a sweep that
//! runs at most once per [`SWEEP_INTERVAL_MS`], piggybacking on requests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::Result;
use crate::security::rate_limit::clock::{Clock, SystemClock};
use crate::security::rate_limit::limiter::{LimitTier, RateLimitProvider};

pub const SWEEP_INTERVAL_MS: u64 = 60_000;

#[derive(Debug, Default)]
struct Window {
    precision_ms: u64,
    /// Oldest first.
    stamps: VecDeque<u64>,
}

impl Window {
    fn drained(&self, now: u64) -> bool {
        self.stamps
            .back()
            .map_or(true, |ts| *ts <= now.saturating_sub(self.precision_ms))
    }
}

/// Timestamps per `identity:precision` key.
pub struct LocalProvider {
    windows: DashMap<String, Window>,
    clock: Arc<dyn Clock>,
    last_sweep: AtomicU64,
}

impl LocalProvider {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let last_sweep = AtomicU64::new(clock.now_ms());
        Self {
            windows: DashMap::new(),
            clock,
            last_sweep,
        }
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    fn increment(&self, key: String, tier: &LimitTier, now: u64) -> u64 {
        let aged = now.saturating_sub(tier.precision_ms);
        let mut window = self.windows.entry(key).or_insert_with(|| Window {
            precision_ms: tier.precision_ms,
            stamps: VecDeque::new(),
        });

        // timestamps only grow per key, so stale ones sit at the front
        while window.stamps.front().is_some_and(|ts| *ts <= aged) {
            window.stamps.pop_front();
        }

        let count = window.stamps.len() as u64;
        if count < tier.amount {
            window.stamps.push_back(now);
        }
        count
    }

    /// Drop every window whose newest timestamp has aged out.
    fn sweep(&self, now: u64) {
        let last = self.last_sweep.load(Ordering::Relaxed);
        if now.saturating_sub(last) < SWEEP_INTERVAL_MS {
            return;
        }
        // one caller sweeps, the others carry on
        if self
            .last_sweep
            .compare_exchange(last, now, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        let before = self.windows.len();
        self.windows.retain(|_, window| !window.drained(now));
        tracing::debug!(dropped = before.saturating_sub(self.windows.len()), "Swept rate limit windows");
    }
}

impl Default for LocalProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RateLimitProvider for LocalProvider {
    async fn increment_request(&self, identity: &str, tiers: &[LimitTier]) -> Result<Vec<u64>> {
        let now = self.clock.now_ms();
        self.sweep(now);
        Ok(tiers
            .iter()
            .map(|tier| self.increment(tier.key(identity), tier, now))
            .collect())
    }
}
