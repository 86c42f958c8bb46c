//! Resolver middleware enforcing the limiter.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::request::Parts;

use crate::error::ProxyError;
use crate::http::response::ResponseWriter;
use crate::observability::metrics;
use crate::resolver::{Middleware, Outcome, RequestContext};
use crate::security::rate_limit::limiter::RateLimiter;

/// Counts each request against the limiter, diverting into the error
/// chain when a tier is full or the store fails.
#[derive(Debug, Clone)]
pub struct RateLimitMiddleware {
    limiter: Arc<RateLimiter>,
}

impl RateLimitMiddleware {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

#[async_trait]
impl Middleware for RateLimitMiddleware {
    async fn handle(
        &self,
        ctx: &mut RequestContext,
        _req: &Parts,
        _res: &ResponseWriter,
    ) -> Outcome {
        if ctx.bypass_rate_limits {
            return Outcome::Continue;
        }

        let identity = ctx.rate_limit_identity();
        match self
            .limiter
            .validate_request(&identity, ctx.alternate_limits.as_deref())
            .await
        {
            Ok(()) => Outcome::Continue,
            Err(ProxyError::TooManyRequests) => {
                tracing::warn!(client = %identity, "Rate limit exceeded");
                metrics::record_rate_limited();
                Outcome::Divert(ProxyError::TooManyRequests)
            }
            Err(e) => {
                tracing::error!(client = %identity, error = %e, "Rate limit store failed");
                Outcome::Divert(e)
            }
        }
    }
}
