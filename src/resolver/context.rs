//! Per-request resolution state.

use std::net::SocketAddr;

use crate::routing::RouteInput;
use crate::security::rate_limit::LimitTier;

/// State owned by one in-flight resolution. Never shared across requests.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Lowercased source hostname, without port.
    pub src: Option<String>,

    /// Address of the connected client.
    pub client_addr: Option<SocketAddr>,

    /// Value of the `x-request-id` header.
    pub request_id: Option<String>,

    /// Identity the rate limiter counts against, set by an earlier
    /// middleware (an authorization check, for instance).
    pub id: Option<String>,

    /// Skip rate limiting for this request.
    pub bypass_rate_limits: bool,

    /// Limit tiers replacing the configured defaults for this request.
    pub alternate_limits: Option<Vec<LimitTier>>,

    /// Route chosen by a resolver.
    pub route: Option<RouteInput>,
}

impl RequestContext {
    pub fn new(src: Option<String>) -> Self {
        Self {
            src,
            ..Default::default()
        }
    }

    pub fn with_client_addr(mut self, addr: SocketAddr) -> Self {
        self.client_addr = Some(addr);
        self
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }

    /// Key used for rate limiting: explicit id, then client IP.
    pub fn rate_limit_identity(&self) -> String {
        if let Some(id) = &self.id {
            return id.clone();
        }
        match self.client_addr {
            Some(addr) => addr.ip().to_string(),
            None => "anonymous".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_identity_fallbacks() {
        let mut ctx = RequestContext::new(Some("example.com".into()));
        assert_eq!(ctx.rate_limit_identity(), "anonymous");

        ctx = ctx.with_client_addr("10.0.0.7:41000".parse().unwrap());
        assert_eq!(ctx.rate_limit_identity(), "10.0.0.7");

        ctx.id = Some("user-42".into());
        assert_eq!(ctx.rate_limit_identity(), "user-42");
    }
}
