//! Switchyard: a host and path based reverse proxy.
//!
//! Requests pass through a priority-ordered resolver pipeline (certificate
//! challenges, rate limiting, user resolvers, the routing table) before
//! being forwarded to a round-robin selected upstream.

pub mod admin;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod net;
pub mod observability;
pub mod proxy;
pub mod resolver;
pub mod routing;
pub mod security;

pub use config::schema::ProxyConfig;
pub use error::{ProxyError, Result};
pub use http::{HttpForwarder, HttpServer, ResponseWriter};
pub use lifecycle::Shutdown;
pub use proxy::{ForwardPlan, ProxyOptions, ReverseProxy};
pub use resolver::{Middleware, Outcome, RequestContext, Resolver, ResolverId};
pub use routing::RouteOptions;
