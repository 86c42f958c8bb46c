//! Forwarding resolved requests upstream.
//!
//! # Responsibilities
//! - Rewrite the request for the selected target (URL, Host, X-Forwarded-*)
//! - Send it over the pooled client (HTTP or HTTPS upstreams) and stream
//!   the response back
//! - Hand WebSocket upgrades to the bridge in websocket.rs
//! - Map connection failures onto [`ProxyError::UpstreamUnreachable`]
//!
//! # Design Decisions
//! - No retries: a failed upstream is reported to the error responder
//! - HTTPS upstreams are verified against the webpki roots

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::request::Parts;
use axum::http::{header, HeaderValue, Request, Uri};
use axum::response::Response;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;

use crate::error::{ProxyError, Result};
use crate::http::{request, response, websocket};
use crate::proxy::ForwardPlan;
use crate::security::headers::{add_forwarded_headers, strip_hop_by_hop};

/// The inbound side of a forwarded request.
#[derive(Debug, Clone, Copy)]
pub struct Inbound<'a> {
    pub parts: &'a Parts,
    pub client: Option<SocketAddr>,
    /// `http` or `https`, the listener the request arrived on.
    pub proto: &'static str,
    pub local_port: Option<u16>,
}

impl Inbound<'_> {
    /// Headers to send upstream: hop-by-hop removed, Host filled from the
    /// request authority when missing, forwarding headers
    /// added when `xfwd`, Host replaced when the plan says so.
    pub fn upstream_headers(&self, plan: &ForwardPlan, xfwd: bool) -> axum::http::HeaderMap {
        let mut headers = self.parts.headers.clone();
        strip_hop_by_hop(&mut headers);
        if !headers.contains_key(header::HOST) {
            // HTTP/2 clients send `:authority` only
            if let Some(value) = request::authority(self.parts).and_then(|a| HeaderValue::from_str(a).ok()) {
                headers.insert(header::HOST, value);
            }
        }
        if xfwd {
            add_forwarded_headers(&mut headers, self.client, self.local_port, self.proto);
        }
        if let Some(host) = &plan.host_override {
            if let Ok(value) = HeaderValue::from_str(host) {
                headers.insert(header::HOST, value);
            }
        }
        headers
    }
}

#[async_trait]
pub trait Forwarder: Send + Sync {
    /// Send the request to `plan.target` and return its response.
    async fn forward(&self, inbound: Inbound<'_>, body: Body, plan: &ForwardPlan) -> Result<Response>;

    /// Complete a WebSocket upgrade and bridge it to `plan.target`.
    async fn forward_upgrade(
        &self,
        inbound: Inbound<'_>,
        upgrade: WebSocketUpgrade,
        plan: &ForwardPlan,
    ) -> Result<Response>;

    /// Answer a plain HTTP request with a redirect to HTTPS.
    fn redirect(&self, inbound: Inbound<'_>, plan: &ForwardPlan, redirect_port: Option<u16>) -> Response {
        let host = request::authority(inbound.parts).unwrap_or_default();
        response::redirect_to_https(host, redirect_port, &plan.original_url)
    }
}

/// Forwarder over hyper's pooled client.
#[derive(Clone)]
pub struct HttpForwarder {
    client: Client<HttpsConnector<HttpConnector>, Body>,
    xfwd: bool,
}

impl HttpForwarder {
    pub fn new(connect_timeout: Duration, xfwd: bool) -> Self {
        let mut connector = HttpConnector::new();
        connector.enforce_http(false);
        connector.set_connect_timeout(Some(connect_timeout));
        connector.set_nodelay(true);

        let https = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .wrap_connector(connector);

        let client = Client::builder(TokioExecutor::new()).build(https);
        Self { client, xfwd }
    }
}

#[async_trait]
impl Forwarder for HttpForwarder {
    async fn forward(&self, inbound: Inbound<'_>, body: Body, plan: &ForwardPlan) -> Result<Response> {
        let target = &plan.target;
        let scheme = match target.scheme() {
            scheme @ ("http" | "https") => scheme,
            other => {
                return Err(ProxyError::UpstreamUnreachable {
                    target: target.to_string(),
                    reason: format!("unsupported upstream scheme {}", other),
                    refused: false,
                })
            }
        };

        let uri: Uri = upstream_uri(scheme, plan)
            .parse()
            .map_err(|e| ProxyError::config(format!("invalid upstream uri: {}", e)))?;

        let mut request = Request::builder()
            .method(inbound.parts.method.clone())
            .uri(uri)
            .body(body)
            .map_err(|e| ProxyError::config(format!("invalid upstream request: {}", e)))?;
        *request.headers_mut() = inbound.upstream_headers(plan, self.xfwd);

        match self.client.request(request).await {
            Ok(upstream) => {
                let (mut parts, body) = upstream.into_parts();
                strip_hop_by_hop(&mut parts.headers);
                Ok(Response::from_parts(parts, Body::new(body)))
            }
            Err(e) => {
                tracing::error!(upstream = %target, error = %e, "Upstream request failed");
                Err(ProxyError::UpstreamUnreachable {
                    target: target.to_string(),
                    reason: e.to_string(),
                    refused: e.is_connect(),
                })
            }
        }
    }

    async fn forward_upgrade(
        &self,
        inbound: Inbound<'_>,
        upgrade: WebSocketUpgrade,
        plan: &ForwardPlan,
    ) -> Result<Response> {
        let scheme = match plan.target.scheme() {
            "https" => "wss",
            _ => "ws",
        };
        let (upstream, protocol) =
            websocket::connect_upstream(&upstream_uri(scheme, plan), &inbound, plan, self.xfwd).await?;
        let upgrade = match protocol {
            Some(protocol) => upgrade.protocols([protocol]),
            None => upgrade,
        };
        Ok(upgrade.on_upgrade(move |socket| websocket::bridge(socket, upstream)))
    }
}

/// Absolute URI of the upstream request.
pub(crate) fn upstream_uri(scheme: &str, plan: &ForwardPlan) -> String {
    let target = &plan.target;
    let authority = match target.port() {
        Some(port) => format!("{}:{}", target.hostname(), port),
        None => target.hostname().to_string(),
    };
    format!("{}://{}{}", scheme, authority, plan.url)
}
