//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! register(source, target, options)
//!     → target.rs (parse source into (host, path), build Target)
//!     → table.rs (find or create descriptor, re-sort by path length)
//!
//! Request (host, path)
//!     → table.rs (longest-prefix lookup, no side effects)
//!     → route.rs (normalize resolver output into a descriptor)
//!     → RouteDescriptor::select_target (round robin, once per request)
//! ```
//!
//! # Design Decisions
//! - Prefix matching only on segment boundaries (`/foo` never matches `/foobar`)
//! - Deterministic: longest path first, ties by registration order
//! - Lookups never mutate; only selection advances the cursor

pub mod matcher;
pub mod route;
pub mod table;
pub mod target;

pub use matcher::{AndMatcher, Matcher, MethodMatcher, UrlPattern};
pub use route::{RouteCache, RouteInput, RouteSpec};
pub use table::{RouteDescriptor, RouteSummary, RoutingTable, Unregistered};
pub use target::{RouteOptions, Source, Target};
