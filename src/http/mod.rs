//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, request ID, timeout, tracing)
//!     → request.rs (source host, request ID, upgrade detection)
//!     → ReverseProxy::get_target (resolvers, routing table)
//!     → forward.rs (rewrite and send upstream) or websocket.rs (bridge)
//!     → response.rs (local answers: 404, errors, HTTPS redirects)
//!     → Send to client
//! ```

pub mod forward;
pub mod request;
pub mod response;
pub mod server;
pub mod websocket;

pub use forward::{Forwarder, HttpForwarder, Inbound};
pub use request::X_REQUEST_ID;
pub use response::ResponseWriter;
pub use server::{AppState, HttpServer};
