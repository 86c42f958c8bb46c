//! Multi-tier sliding-window rate limiter.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ProxyError, Result};

/// At most `amount` requests in any trailing `precision_ms` window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct LimitTier {
    pub amount: u64,
    #[serde(rename = "precision")]
    pub precision_ms: u64,
}

impl LimitTier {
    pub const fn new(amount: u64, precision_ms: u64) -> Self {
        Self {
            amount,
            precision_ms,
        }
    }

    /// Counter key for an identity under this tier.
    pub fn key(&self, identity: &str) -> String {
        format!("{}:{}", identity, self.precision_ms)
    }
}

/// Ten requests per second.
pub fn default_tiers() -> Vec<LimitTier> {
    vec![LimitTier::new(10, 1000)]
}

/// Storage for the per-tier windows.
#[async_trait]
pub trait RateLimitProvider: Send + Sync {
    /// Purge stale entries, record this request where there is room, and
    /// return each tier's count as it was before recording, in tier order.
    async fn increment_request(&self, identity: &str, tiers: &[LimitTier]) -> Result<Vec<u64>>;
}

pub struct RateLimiter {
    provider: Arc<dyn RateLimitProvider>,
    tiers: Vec<LimitTier>,
}

impl RateLimiter {
    pub fn new(provider: Arc<dyn RateLimitProvider>, tiers: Vec<LimitTier>) -> Self {
        Self { provider, tiers }
    }

    pub fn tiers(&self) -> &[LimitTier] {
        &self.tiers
    }

    /// Count the request against every tier and fail with
    /// `TooManyRequests` when any of them is already full.
    pub async fn validate_request(
        &self,
        identity: &str,
        alternate: Option<&[LimitTier]>,
    ) -> Result<()> {
        let tiers = alternate.unwrap_or(&self.tiers);
        if tiers.is_empty() {
            return Ok(());
        }

        let counts = self.provider.increment_request(identity, tiers).await?;
        if counts.len() != tiers.len() {
            return Err(ProxyError::Store(format!(
                "provider returned {} counts for {} tiers",
                counts.len(),
                tiers.len()
            )));
        }

        let violated = counts.iter().zip(tiers).find(|(count, tier)| **count >= tier.amount);
        if let Some((count, tier)) = violated {
            tracing::debug!(
                identity = %identity,
                count = *count,
                amount = tier.amount,
                precision_ms = tier.precision_ms,
                "Rate limit tier exceeded"
            );
            return Err(ProxyError::TooManyRequests);
        }
        Ok(())
    }
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter").field("tiers", &self.tiers).finish()
    }
}
