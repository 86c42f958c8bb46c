//! Crate-wide error type.
//!
//! Every failure the proxy can surface to a client maps onto one variant of
//! [`ProxyError`], and every variant maps onto exactly one HTTP status. A
//! request nobody routes is not an error; it goes to the not-found responder.

use axum::http::StatusCode;
use thiserror::Error;

/// Errors produced while registering, resolving or forwarding requests.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// A rate limit tier was exceeded.
    #[error("Too Many Requests")]
    TooManyRequests,

    /// Raised by user middleware, or a panic caught inside it.
    #[error("middleware error: {0}")]
    Middleware(String),

    /// The selected upstream could not be reached.
    #[error("upstream {target} unreachable: {reason}")]
    UpstreamUnreachable {
        target: String,
        reason: String,
        /// The upstream refused the connection outright.
        refused: bool,
    },

    /// Invalid registration input.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The rate limit store failed.
    #[error("rate limit store error: {0}")]
    Store(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    /// Shorthand for [`ProxyError::Configuration`].
    pub fn config(message: impl Into<String>) -> Self {
        ProxyError::Configuration(message.into())
    }

    /// Shorthand for [`ProxyError::Middleware`].
    pub fn middleware(message: impl std::fmt::Display) -> Self {
        ProxyError::Middleware(message.to_string())
    }

    /// The status code written when this error ends a request.
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ProxyError::UpstreamUnreachable { refused: true, .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<redis::RedisError> for ProxyError {
    fn from(err: redis::RedisError) -> Self {
        ProxyError::Store(err.to_string())
    }
}

pub type Result<T, E = ProxyError> = std::result::Result<T, E>;
