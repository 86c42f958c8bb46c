//! Inbound request inspection.
//!
//! # Responsibilities
//! - Work out the source host a request is routed on
//! - Tag every request with an `x-request-id` (generated when missing)
//! - Detect WebSocket upgrades
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - Source hosts are compared lowercase and without port

use axum::http::{header, request::Parts, HeaderMap, HeaderName};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

const X_FORWARDED_HOST: &str = "x-forwarded-host";

/// Host the request is routed on: `X-Forwarded-Host` when preferred and
/// present, otherwise the request authority. Lowercased, port removed.
pub fn source_host(parts: &Parts, prefer_forwarded_host: bool) -> Option<String> {
    let forwarded = prefer_forwarded_host
        .then(|| parts.headers.get(X_FORWARDED_HOST))
        .flatten()
        .and_then(|v| v.to_str().ok())
        // the first proxy in the chain saw the client's host
        .and_then(|v| v.split(',').next());

    let raw = forwarded.or_else(|| authority(parts))?;
    let host = strip_port(raw.trim());
    (!host.is_empty()).then(|| host.to_lowercase())
}

/// `Host` header, or the `:authority` pseudo-header on HTTP/2 where
/// hyper moves it into the URI.
pub fn authority(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| parts.uri.authority().map(|a| a.as_str()))
}

fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        // IPv6 literal
        return rest.split(']').next().unwrap_or(rest);
    }
    host.split(':').next().unwrap_or(host)
}

pub fn request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

pub fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    let upgrade = headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
    let connection = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
    upgrade && connection
}

/// Layer generating a UUID `x-request-id` for requests that lack one.
pub fn set_request_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid)
}

/// Layer copying `x-request-id` onto the response.
pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::new(X_REQUEST_ID)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, Request};

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_static(value));
        }
        map
    }

    fn parts(uri: &str, pairs: &[(&'static str, &'static str)]) -> Parts {
        let (mut parts, _) = Request::builder().uri(uri).body(()).unwrap().into_parts();
        parts.headers = headers(pairs);
        parts
    }

    #[test]
    fn test_source_host() {
        let p = parts("/", &[("host", "Example.COM:8080")]);
        assert_eq!(source_host(&p, false).as_deref(), Some("example.com"));
        assert_eq!(source_host(&parts("/", &[]), false), None);
        assert_eq!(source_host(&parts("/", &[("host", "[::1]:80")]), false).as_deref(), Some("::1"));
    }

    #[test]
    fn test_http2_authority_without_host_header() {
        let p = parts("https://Example.com:8443/a?b=1", &[]);
        assert_eq!(authority(&p), Some("Example.com:8443"));
        assert_eq!(source_host(&p, false).as_deref(), Some("example.com"));

        let both = parts("http://ignored.com/", &[("host", "real.com")]);
        assert_eq!(source_host(&both, false).as_deref(), Some("real.com"));
    }

    #[test]
    fn test_forwarded_host_only_when_preferred() {
        let p = parts("/", &[("host", "internal:8080"), ("x-forwarded-host", "public.com, lb.internal")]);
        assert_eq!(source_host(&p, false).as_deref(), Some("internal"));
        assert_eq!(source_host(&p, true).as_deref(), Some("public.com"));

        let no_forwarded = parts("/", &[("host", "internal")]);
        assert_eq!(source_host(&no_forwarded, true).as_deref(), Some("internal"));
    }

    #[test]
    fn test_websocket_detection() {
        assert!(is_websocket_upgrade(&headers(&[
            ("upgrade", "websocket"),
            ("connection", "keep-alive, Upgrade")
        ])));
        assert!(!is_websocket_upgrade(&headers(&[("upgrade", "websocket")])));
        assert!(!is_websocket_upgrade(&headers(&[("connection", "upgrade"), ("upgrade", "h2c")])));
    }
}
