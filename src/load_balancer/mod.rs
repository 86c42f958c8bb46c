//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Route descriptor selected for a proxied request
//!     → round_robin.rs (read index j, advance to (j + 1) % len)
//!     → targets[j] forwarded to
//! ```
//!
//! # Design Decisions
//! - The cursor lives on the route descriptor, one per (host, path)
//! - Selection happens once per forwarded request, never on lookup

pub mod round_robin;

pub use round_robin::RoundRobin;
