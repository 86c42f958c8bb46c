//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → routes registered on the ReverseProxy
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → ReverseProxy::reload_routes swaps the routing table
//! ```
//!
//! # Design Decisions
//! - Only routes are hot reloaded; listeners and stores need a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AcmeChallengeConfig, AdminConfig, HttpsConfig, ListenerConfig, ObservabilityConfig,
    ProxyConfig, ProxySettings, RateLimitConfig, RouteConfig, StoreConfig, TimeoutConfig,
};
pub use validation::ValidationError;
pub use watcher::ConfigWatcher;
