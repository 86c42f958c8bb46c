//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → rate_limit (resolver middleware, per identity windows)
//!     → Pass to routing
//!
//! Forwarded request:
//!     → headers.rs (strip hop-by-hop, add X-Forwarded-*)
//! ```
//!
//! # Design Decisions
//! - Rate limiting runs inside the resolver pipeline so earlier middleware
//!   can bypass or retune it per request
//! - No trust in client input: hop-by-hop headers never reach upstreams

pub mod headers;
pub mod rate_limit;
