//! Resolver pipeline.
//!
//! # Data Flow
//! ```text
//! Request
//!     → context.rs (per-request state: source host, identity, route)
//!     → pipeline.rs (resolvers by descending priority)
//!         → chain.rs (matcher, then middleware, then error middleware)
//!     → routing::RouteCache (normalize the chosen route)
//! ```
//!
//! # Design Decisions
//! - Resolvers never run concurrently for one request
//! - A finished response stops every remaining step
//! - Errors stay inside the failing resolver's own error chain

pub mod chain;
pub mod context;
pub mod middleware;
pub mod pipeline;

pub use chain::{Resolver, ResolverId};
pub use context::RequestContext;
pub use middleware::{error_fn, middleware_fn, ErrorMiddleware, Handler, Middleware, Outcome};
pub use pipeline::ResolverPipeline;
