//! Configuration schema.
//!
//! Every section is optional in the TOML file; missing values fall back to
//! the `Default` impls below.

use serde::{Deserialize, Serialize};

use crate::net::tls::SslOptions;
use crate::security::rate_limit::{default_tiers, LimitTier};

/// Root configuration for the reverse proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Plain HTTP listener.
    pub listener: ListenerConfig,

    /// Optional HTTPS listener with its default certificate.
    pub https: Option<HttpsConfig>,

    /// Request forwarding behaviour.
    pub proxy: ProxySettings,

    /// Statically registered routes.
    pub routes: Vec<RouteConfig>,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// Local responder for certificate challenges.
    pub acme_challenge: Option<AcmeChallengeConfig>,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// HTTPS listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpsConfig {
    #[serde(default = "default_https_bind")]
    pub bind_address: String,

    /// Path to the default certificate chain (PEM).
    pub cert_path: String,

    /// Path to the default private key (PEM).
    pub key_path: String,

    /// Port advertised in HTTPS redirects, when it differs from the bind port.
    #[serde(default)]
    pub redirect_port: Option<u16>,
}

fn default_https_bind() -> String {
    "0.0.0.0:8443".to_string()
}

impl HttpsConfig {
    /// Port used in `Location` headers of HTTPS redirects.
    pub fn advertised_port(&self) -> Option<u16> {
        self.redirect_port.or_else(|| {
            self.bind_address
                .rsplit(':')
                .next()
                .and_then(|port| port.parse().ok())
                .filter(|port| *port != 443)
        })
    }
}

/// Forwarding behaviour shared by all routes.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxySettings {
    /// Take the source host from `X-Forwarded-Host` when present.
    pub prefer_forwarded_host: bool,

    /// Add `X-Forwarded-For`, `-Proto` and `-Host` to forwarded requests.
    pub xfwd: bool,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            prefer_forwarded_host: false,
            xfwd: true,
        }
    }
}

/// A route registered at startup.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Source host with optional path, e.g. "example.com/api".
    pub source: String,

    /// Upstream URLs, balanced round robin.
    pub targets: Vec<String>,

    /// Send the target's host in the Host header instead of the client's.
    #[serde(default)]
    pub use_target_host_header: bool,

    #[serde(default)]
    pub ssl: Option<SslOptions>,
}

/// Where rate limit windows are kept.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreConfig {
    /// In process memory, per proxy instance.
    #[default]
    Local,
    /// Shared Redis instance.
    Redis { url: String },
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Priority of the rate limit resolver.
    pub priority: i32,

    /// Limit tiers applied to every request.
    pub tiers: Vec<LimitTier>,

    pub store: StoreConfig,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            priority: 1000,
            tiers: default_tiers(),
            store: StoreConfig::Local,
        }
    }
}

/// Challenge responder running on localhost.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AcmeChallengeConfig {
    #[serde(default = "default_challenge_port")]
    pub port: u16,
}

fn default_challenge_port() -> u16 {
    3000
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream connect timeout in seconds.
    pub connect_secs: u64,

    /// Whole request timeout in seconds, upstream response included.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// "pretty" or "json".
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

pub(crate) const PLACEHOLDER_API_KEY: &str = "CHANGE_ME_IN_PRODUCTION";

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // placeholder, refused by validation once the admin API is enabled
            api_key: PLACEHOLDER_API_KEY.to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config() {
        let config: ProxyConfig = toml::from_str("").unwrap();
        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
        assert!(config.proxy.xfwd);
        assert!(!config.rate_limit.enabled);
        assert_eq!(config.rate_limit.tiers, vec![LimitTier::new(10, 1000)]);
        assert_eq!(config.rate_limit.store, StoreConfig::Local);
        assert!(config.https.is_none());
    }

    #[test]
    fn test_full_config() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [listener]
            bind_address = "127.0.0.1:8080"

            [https]
            cert_path = "certs/default.crt"
            key_path = "certs/default.key"
            bind_address = "0.0.0.0:8443"

            [proxy]
            prefer_forwarded_host = true

            [[routes]]
            source = "example.com/api"
            targets = ["127.0.0.1:3000", "http://127.0.0.1:3001/v1"]
            use_target_host_header = true

            [[routes]]
            source = "secure.example.com"
            targets = ["127.0.0.1:4000"]
            ssl = { redirect = true }

            [rate_limit]
            enabled = true
            priority = 500
            tiers = [{ amount = 1, precision = 1000 }, { amount = 100, precision = 60000 }]
            store = { type = "redis", url = "redis://127.0.0.1:6379" }

            [acme_challenge]
            port = 3100
            "#,
        )
        .unwrap();

        assert_eq!(config.routes.len(), 2);
        assert_eq!(config.routes[0].targets.len(), 2);
        assert!(config.routes[0].use_target_host_header);
        assert!(config.routes[1].ssl.as_ref().unwrap().redirect);
        assert_eq!(
            config.rate_limit.store,
            StoreConfig::Redis {
                url: "redis://127.0.0.1:6379".into()
            }
        );
        assert_eq!(config.rate_limit.tiers[1], LimitTier::new(100, 60_000));
        assert_eq!(config.acme_challenge.unwrap().port, 3100);
        assert_eq!(config.https.unwrap().advertised_port(), Some(8443));
    }
}
