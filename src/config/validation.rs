//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check that sources and targets parse as routable URLs
//! - Validate value ranges (timeouts > 0, tiers non-zero, addresses parse)
//! - Reject TLS routes without an HTTPS listener
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{ProxyConfig, StoreConfig, PLACEHOLDER_API_KEY};
use crate::routing::{RouteOptions, Source, Target};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if let Some(https) = &config.https {
        check_address(&mut errors, "https.bind_address", &https.bind_address);
    }
    if config.admin.enabled {
        check_address(&mut errors, "admin.bind_address", &config.admin.bind_address);
        let key = config.admin.api_key.trim();
        if key.is_empty() || key == PLACEHOLDER_API_KEY {
            errors.push(ValidationError::new("admin.api_key", "must be set to a real key"));
        }
    }
    if config.observability.metrics_enabled {
        check_address(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }
    if !matches!(config.observability.log_format.as_str(), "pretty" | "json") {
        errors.push(ValidationError::new(
            "observability.log_format",
            format!("unknown format {:?}, expected \"pretty\" or \"json\"", config.observability.log_format),
        ));
    }

    for (i, route) in config.routes.iter().enumerate() {
        let field = format!("routes[{}]", i);
        if let Err(e) = Source::parse(&route.source) {
            errors.push(ValidationError::new(format!("{}.source", field), e.to_string()));
        }
        if route.targets.is_empty() {
            errors.push(ValidationError::new(format!("{}.targets", field), "at least one target is required"));
        }
        for target in &route.targets {
            if let Err(e) = Target::parse(target, &RouteOptions::default()) {
                errors.push(ValidationError::new(format!("{}.targets", field), e.to_string()));
            }
        }
        if route.ssl.is_some() && config.https.is_none() {
            errors.push(ValidationError::new(
                format!("{}.ssl", field),
                "TLS routes need an [https] listener",
            ));
        }
    }

    if config.rate_limit.enabled {
        if config.rate_limit.tiers.is_empty() {
            errors.push(ValidationError::new("rate_limit.tiers", "at least one tier is required"));
        }
        for (i, tier) in config.rate_limit.tiers.iter().enumerate() {
            if tier.precision_ms == 0 {
                errors.push(ValidationError::new(format!("rate_limit.tiers[{}].precision", i), "must be > 0"));
            }
        }
        if let StoreConfig::Redis { url } = &config.rate_limit.store {
            if !url.starts_with("redis://") && !url.starts_with("rediss://") {
                errors.push(ValidationError::new("rate_limit.store.url", "must be a redis:// URL"));
            }
        }
    }

    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::new("timeouts.connect_secs", "must be > 0"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be > 0"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &str, address: &str) {
    if address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(field, format!("invalid socket address {:?}", address)));
    }
}
