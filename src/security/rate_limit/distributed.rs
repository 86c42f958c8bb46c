//! Window store shared by every proxy instance.
//!
//! Each tier is a sorted set scored by timestamp. One request issues, per
//! tier and inside a single transaction: drop aged members, read the
//! cardinality, add a member scored by the timestamp through a
//! check-and-add script, and refresh the key's expiry.
//!
//! Members are unique per request so that requests landing in the same
//! millisecond, on one instance or several, are each counted.

use std::sync::Arc;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use uuid::Uuid;

use crate::error::Result;
use crate::security::rate_limit::clock::{Clock, SystemClock};
use crate::security::rate_limit::limiter::{LimitTier, RateLimitProvider};

/// Adds member `ARGV[3]` scored `ARGV[2]` to `KEYS[1]` only while the set
/// holds fewer than `ARGV[1]` members.
pub const CHECK_AND_ADD_SCRIPT: &str = r#"local c = tonumber(redis.call('ZCARD', KEYS[1]));
if c == nil or tonumber(ARGV[1]) > c then
  redis.call('ZADD', KEYS[1], ARGV[2], ARGV[3]);
  return 1;
else
  return 0;
end"#;

/// One tier's update within a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowUpdate {
    pub key: String,
    pub amount: u64,
    pub now_ms: u64,
    /// Set member recorded for this request, scored by `now_ms`.
    pub member: String,
    /// Members scored at or below this are dropped.
    pub aged_ms: u64,
    pub ttl_secs: u64,
}

impl WindowUpdate {
    fn new(identity: &str, tier: &LimitTier, now_ms: u64, member: &str) -> Self {
        Self {
            key: tier.key(identity),
            amount: tier.amount,
            now_ms,
            member: member.to_string(),
            aged_ms: now_ms.saturating_sub(tier.precision_ms),
            ttl_secs: (tier.precision_ms + 1).div_ceil(1000).max(1),
        }
    }
}

/// A sorted-set store able to apply a batch of window updates atomically.
#[async_trait]
pub trait SortedSetBackend: Send + Sync {
    /// Apply all updates in one round trip, returning each set's
    /// cardinality after purging and before the add.
    async fn apply(&self, updates: &[WindowUpdate]) -> Result<Vec<u64>>;
}

pub struct DistributedProvider {
    backend: Arc<dyn SortedSetBackend>,
    clock: Arc<dyn Clock>,
}

impl DistributedProvider {
    pub fn new(backend: Arc<dyn SortedSetBackend>) -> Self {
        Self::with_clock(backend, Arc::new(SystemClock))
    }

    pub fn with_clock(backend: Arc<dyn SortedSetBackend>, clock: Arc<dyn Clock>) -> Self {
        Self { backend, clock }
    }

    /// Connect to Redis at `url`.
    pub async fn connect(url: &str) -> Result<Self> {
        let backend = RedisBackend::connect(url).await?;
        Ok(Self::new(Arc::new(backend)))
    }
}

#[async_trait]
impl RateLimitProvider for DistributedProvider {
    async fn increment_request(&self, identity: &str, tiers: &[LimitTier]) -> Result<Vec<u64>> {
        let now = self.clock.now_ms();
        let member = format!("{}-{}", now, Uuid::new_v4().simple());
        let updates: Vec<WindowUpdate> = tiers
            .iter()
            .map(|tier| WindowUpdate::new(identity, tier, now, &member))
            .collect();
        self.backend.apply(&updates).await
    }
}

/// [`SortedSetBackend`] over a Redis connection.
pub struct RedisBackend {
    conn: ConnectionManager,
    script_sha: tokio::sync::RwLock<String>,
}

impl RedisBackend {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let mut conn = ConnectionManager::new(client).await?;
        let sha = load_script(&mut conn).await?;
        tracing::info!(url = %url, script = %sha, "Connected to rate limit store");
        Ok(Self {
            conn,
            script_sha: tokio::sync::RwLock::new(sha),
        })
    }

    fn pipeline(updates: &[WindowUpdate], sha: &str) -> redis::Pipeline {
        let mut pipe = redis::pipe();
        pipe.atomic();
        for update in updates {
            pipe.cmd("ZREMRANGEBYSCORE")
                .arg(&update.key)
                .arg(0)
                .arg(update.aged_ms)
                .ignore()
                .cmd("ZCARD")
                .arg(&update.key)
                .cmd("EVALSHA")
                .arg(sha)
                .arg(1)
                .arg(&update.key)
                .arg(update.amount)
                .arg(update.now_ms)
                .arg(&update.member)
                .ignore()
                .cmd("EXPIRE")
                .arg(&update.key)
                .arg(update.ttl_secs)
                .ignore();
        }
        pipe
    }
}

async fn load_script(conn: &mut ConnectionManager) -> Result<String> {
    let sha: String = redis::cmd("SCRIPT")
        .arg("LOAD")
        .arg(CHECK_AND_ADD_SCRIPT)
        .query_async(conn)
        .await?;
    Ok(sha)
}

#[async_trait]
impl SortedSetBackend for RedisBackend {
    async fn apply(&self, updates: &[WindowUpdate]) -> Result<Vec<u64>> {
        let mut conn = self.conn.clone();
        let sha = self.script_sha.read().await.clone();

        let first: redis::RedisResult<Vec<u64>> =
            Self::pipeline(updates, &sha).query_async(&mut conn).await;
        match first {
            Ok(counts) => Ok(counts),
            Err(e) if e.kind() == redis::ErrorKind::NoScriptError => {
                // the server lost its script cache, e.g. after a restart
                tracing::warn!("Rate limit script missing on store, reloading");
                let sha = load_script(&mut conn).await?;
                *self.script_sha.write().await = sha.clone();
                let counts: Vec<u64> = Self::pipeline(updates, &sha).query_async(&mut conn).await?;
                Ok(counts)
            }
            Err(e) => Err(e.into()),
        }
    }
}
