//! Upstream targets and registration sources.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ProxyError, Result};
use crate::net::SslOptions;

/// Options attached to a route at registration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(default)]
pub struct RouteOptions {
    /// TLS settings for the source host.
    pub ssl: Option<SslOptions>,

    /// Send the target's host in the `Host` header instead of the client's.
    pub use_target_host_header: bool,
}

/// One concrete upstream endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    url: Url,
    /// Redirect to HTTPS when the source host has a certificate.
    pub ssl_redirect: bool,
    /// Overwrite the forwarded `Host` header with [`Target::host`].
    pub use_target_host_header: bool,
}

impl Target {
    /// Build a target from a URL string, defaulting the scheme to `http`.
    pub fn parse(input: &str, options: &RouteOptions) -> Result<Self> {
        let url = prepare_url(input)?;
        Ok(Self {
            url,
            ssl_redirect: options.ssl.as_ref().map_or(true, |ssl| ssl.redirect),
            use_target_host_header: options.use_target_host_header,
        })
    }

    /// Canonical URL, used to identify the target on unregistration.
    pub fn href(&self) -> &str {
        self.url.as_str()
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    pub fn hostname(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    pub fn port(&self) -> Option<u16> {
        self.url.port_or_known_default()
    }

    /// `hostname[:port]`, the port only when given explicitly.
    pub fn host(&self) -> String {
        match self.url.port() {
            Some(port) => format!("{}:{}", self.hostname(), port),
            None => self.hostname().to_string(),
        }
    }

    /// Sub-path prepended to forwarded URLs, if any.
    pub fn path(&self) -> Option<&str> {
        match self.url.path() {
            "" | "/" => None,
            path => Some(path),
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.href())
    }
}

/// The `(hostname, path)` a route is registered under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub hostname: String,
    pub path: String,
}

impl Source {
    pub fn parse(input: &str) -> Result<Self> {
        let url = prepare_url(input)?;
        let hostname = url
            .host_str()
            .ok_or_else(|| ProxyError::config(format!("source {} has no host", input)))?
            .to_lowercase();
        let path = match url.path() {
            "" => "/".to_string(),
            path => path.to_string(),
        };
        Ok(Self { hostname, path })
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.hostname, self.path)
    }
}

fn scheme_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^https?://").expect("static regex"))
}

/// Parse `input` as an http(s) URL, adding `http://` when no scheme is given.
pub fn prepare_url(input: &str) -> Result<Url> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ProxyError::config("empty url"));
    }

    let candidate = if scheme_pattern().is_match(input) {
        input.to_string()
    } else {
        format!("http://{}", input)
    };

    let url = Url::parse(&candidate)
        .map_err(|e| ProxyError::config(format!("uri is not a valid http uri {}: {}", input, e)))?;

    match url.scheme() {
        "http" | "https" if url.host_str().is_some_and(|h| !h.is_empty()) => Ok(url),
        _ => Err(ProxyError::config(format!("uri is not a valid http uri {}", input))),
    }
}

/// Join a target sub-path in front of an (already stripped) request URL.
pub fn join_path(base: &str, url: &str) -> String {
    let base = base.trim_end_matches('/');
    if url.starts_with('/') {
        format!("{}{}", base, url)
    } else {
        format!("{}/{}", base, url)
    }
}
