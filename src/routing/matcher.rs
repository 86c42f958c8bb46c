//! Request predicates that gate resolvers.
//!
//! # Responsibilities
//! - Match the request URL (path and query) against a pattern
//! - Match the HTTP method
//! - Combine conditions with AND semantics
//!
//! # Design Decisions
//! - A resolver without a matcher runs for every request
//! - URL patterns are unanchored regular expressions, anchor with `^`

use axum::http::{request::Parts, Method};
use regex::Regex;

use crate::error::{ProxyError, Result};

/// Trait for matching requests against conditions.
pub trait Matcher: Send + Sync + std::fmt::Debug {
    /// Returns true if the request matches this condition.
    fn matches(&self, req: &Parts) -> bool;
}

/// Path and query of a request, as forwarded.
pub fn request_url(req: &Parts) -> &str {
    req.uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/")
}

/// Matches the request URL against a regular expression.
#[derive(Debug, Clone)]
pub struct UrlPattern {
    pattern: Regex,
}

impl UrlPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| ProxyError::config(format!("invalid url pattern {}: {}", pattern, e)))?;
        Ok(Self { pattern })
    }
}

impl Matcher for UrlPattern {
    fn matches(&self, req: &Parts) -> bool {
        self.pattern.is_match(request_url(req))
    }
}

/// Matches one of a set of HTTP methods.
#[derive(Debug, Clone)]
pub struct MethodMatcher {
    methods: Vec<Method>,
}

impl MethodMatcher {
    pub fn new(methods: impl IntoIterator<Item = Method>) -> Self {
        Self {
            methods: methods.into_iter().collect(),
        }
    }
}

impl Matcher for MethodMatcher {
    fn matches(&self, req: &Parts) -> bool {
        self.methods.contains(&req.method)
    }
}

/// Combines multiple matchers with AND semantics.
#[derive(Debug)]
pub struct AndMatcher {
    matchers: Vec<Box<dyn Matcher>>,
}

impl AndMatcher {
    pub fn new(matchers: Vec<Box<dyn Matcher>>) -> Self {
        Self { matchers }
    }
}

impl Matcher for AndMatcher {
    fn matches(&self, req: &Parts) -> bool {
        self.matchers.iter().all(|m| m.matches(req))
    }
}
