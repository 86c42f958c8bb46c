//! Sliding-window rate limiting.
//!
//! # Data Flow
//! ```text
//! RateLimitMiddleware (bypass flag, identity, alternate tiers)
//!     → limiter.rs (any tier full ⇒ TooManyRequests)
//!     → local.rs        (per-process timestamps)
//!       distributed.rs  (sorted sets in Redis, one transaction per request)
//! ```
//!
//! # Design Decisions
//! - Counts are read after purging and before recording the request
//! - Every tier is updated even when another tier rejects
//! - A full window does not record the rejected request

pub mod clock;
pub mod distributed;
pub mod limiter;
pub mod local;
pub mod middleware;

pub use clock::{Clock, ManualClock, SystemClock};
pub use distributed::{DistributedProvider, RedisBackend, SortedSetBackend, WindowUpdate};
pub use limiter::{default_tiers, LimitTier, RateLimitProvider, RateLimiter};
pub use local::LocalProvider;
pub use middleware::RateLimitMiddleware;
