//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the proxy handler
//! - Wire up middleware (tracing, timeout, request ID)
//! - Bind plain HTTP and HTTPS listeners
//! - Dispatch every request through [`ReverseProxy::get_target`]
//! - Redirect, forward or answer locally depending on the outcome

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ws::WebSocketUpgrade, ConnectInfo, FromRequestParts, State},
    http::{request::Parts, Request},
    response::Response,
    routing::any,
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::http::forward::{Forwarder, Inbound};
use crate::http::request::{
    is_websocket_upgrade, propagate_request_id_layer, request_id, set_request_id_layer, source_host,
};
use crate::http::response::{self, ResponseWriter};
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::proxy::ReverseProxy;
use crate::resolver::RequestContext;

/// Grace period for in-flight requests on the HTTPS listener.
const TLS_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub proxy: Arc<ReverseProxy>,
    pub forwarder: Arc<dyn Forwarder>,
    /// `http` or `https`.
    pub proto: &'static str,
    pub local_port: Option<u16>,
}

/// HTTP(S) front end of the reverse proxy.
pub struct HttpServer {
    proxy: Arc<ReverseProxy>,
    forwarder: Arc<dyn Forwarder>,
    request_timeout: Duration,
}

impl HttpServer {
    pub fn new(proxy: Arc<ReverseProxy>, forwarder: Arc<dyn Forwarder>, request_timeout: Duration) -> Self {
        Self {
            proxy,
            forwarder,
            request_timeout,
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    pub fn router(&self, proto: &'static str, local_port: Option<u16>) -> Router {
        let state = AppState {
            proxy: self.proxy.clone(),
            forwarder: self.forwarder.clone(),
            proto,
            local_port,
        };

        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(TimeoutLayer::new(self.request_timeout))
            .layer(propagate_request_id_layer())
            .layer(TraceLayer::new_for_http())
            .layer(set_request_id_layer())
    }

    /// Serve plain HTTP until `shutdown` fires.
    pub async fn run(&self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self
            .router("http", Some(addr.port()))
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.signalled())
            .await?;

        tracing::info!(address = %addr, "HTTP server stopped");
        Ok(())
    }

    /// Serve HTTPS until `shutdown` fires. Certificates come from `tls`,
    /// which selects them per SNI host.
    pub async fn run_tls(
        &self,
        addr: SocketAddr,
        tls: RustlsConfig,
        shutdown: Shutdown,
    ) -> Result<(), std::io::Error> {
        tracing::info!(address = %addr, "HTTPS server starting");

        let handle = axum_server::Handle::new();
        let drain = handle.clone();
        let signalled = shutdown.signalled();
        tokio::spawn(async move {
            signalled.await;
            drain.graceful_shutdown(Some(TLS_DRAIN_TIMEOUT));
        });

        let app = self
            .router("https", Some(addr.port()))
            .into_make_service_with_connect_info::<SocketAddr>();

        axum_server::bind_rustls(addr, tls).handle(handle).serve(app).await?;

        tracing::info!(address = %addr, "HTTPS server stopped");
        Ok(())
    }
}

/// Main proxy handler.
async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let start = Instant::now();
    let (mut parts, body) = request.into_parts();
    let method = parts.method.to_string();

    let upgrade = if is_websocket_upgrade(&parts.headers) {
        WebSocketUpgrade::from_request_parts(&mut parts, &state).await.ok()
    } else {
        None
    };

    let response = dispatch(&state, client, &parts, body, upgrade).await;
    metrics::record_request(&method, response.status().as_u16(), start);
    response
}

async fn dispatch(
    state: &AppState,
    client: SocketAddr,
    parts: &Parts,
    body: Body,
    upgrade: Option<WebSocketUpgrade>,
) -> Response {
    let proxy = &state.proxy;
    let mut ctx = RequestContext::new(source_host(parts, proxy.options().prefer_forwarded_host))
        .with_client_addr(client)
        .with_request_id(request_id(&parts.headers));

    let res = ResponseWriter::new();
    let resolved = proxy.get_target(&mut ctx, parts, &res).await;

    // a middleware may have answered even when resolution failed afterwards
    if res.is_finished() {
        return res.take().unwrap_or_else(response::internal_server_error);
    }

    let plan = match resolved {
        Ok(Some(plan)) => plan,
        Ok(None) => {
            metrics::record_no_route();
            return proxy.not_found_response(parts);
        }
        Err(e) => {
            tracing::warn!(request_id = ?ctx.request_id, error = %e, "Resolution failed");
            return proxy.error_response(&e, parts);
        }
    };

    let inbound = Inbound {
        parts,
        client: Some(client),
        proto: state.proto,
        local_port: state.local_port,
    };

    if state.proto == "http" && proxy.should_redirect(ctx.src.as_deref(), &plan.target) {
        tracing::info!(request_id = ?ctx.request_id, src = ?ctx.src, "Redirecting to HTTPS");
        return state.forwarder.redirect(inbound, &plan, proxy.options().redirect_port);
    }

    let forwarded = match upgrade {
        Some(upgrade) => state.forwarder.forward_upgrade(inbound, upgrade, &plan).await,
        None => state.forwarder.forward(inbound, body, &plan).await,
    };

    forwarded.unwrap_or_else(|e| proxy.error_response(&e, parts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ProxyError, Result};
    use crate::proxy::{ForwardPlan, ProxyOptions};
    use crate::resolver::{middleware_fn, Outcome, Resolver};
    use crate::routing::RouteOptions;
    use async_trait::async_trait;
    use axum::http::{header, StatusCode};
    use axum::response::IntoResponse;
    use std::sync::Mutex;

    /// Records plans instead of forwarding.
    #[derive(Default)]
    struct RecordingForwarder {
        urls: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl Forwarder for RecordingForwarder {
        async fn forward(&self, _inbound: Inbound<'_>, _body: Body, plan: &ForwardPlan) -> Result<Response> {
            if self.fail {
                return Err(ProxyError::UpstreamUnreachable {
                    target: plan.target.to_string(),
                    reason: "connection refused".into(),
                    refused: true,
                });
            }
            self.urls
                .lock()
                .unwrap()
                .push(format!("{}{}", plan.target.host(), plan.url));
            Ok(Response::new(Body::from("proxied")))
        }

        async fn forward_upgrade(
            &self,
            _inbound: Inbound<'_>,
            _upgrade: WebSocketUpgrade,
            _plan: &ForwardPlan,
        ) -> Result<Response> {
            Err(ProxyError::middleware("no upgrades in tests"))
        }
    }

    fn state(proxy: ReverseProxy, forwarder: Arc<RecordingForwarder>) -> AppState {
        AppState {
            proxy: Arc::new(proxy),
            forwarder,
            proto: "http",
            local_port: Some(8080),
        }
    }

    fn parts(host: &str, uri: &str) -> Parts {
        Request::builder()
            .uri(uri)
            .header(header::HOST, host)
            .body(())
            .unwrap()
            .into_parts()
            .0
    }

    async fn call(state: &AppState, host: &str, uri: &str) -> Response {
        dispatch(state, "10.0.0.1:4000".parse().unwrap(), &parts(host, uri), Body::empty(), None).await
    }

    #[tokio::test]
    async fn test_forwards_resolved_request() {
        let proxy = ReverseProxy::new(ProxyOptions::default());
        proxy
            .register("example.com/api", "127.0.0.1:3000/v2", &RouteOptions::default())
            .unwrap();
        let forwarder = Arc::new(RecordingForwarder::default());
        let state = state(proxy, forwarder.clone());

        let response = call(&state, "Example.com:8080", "/api/items").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(*forwarder.urls.lock().unwrap(), vec!["127.0.0.1:3000/v2/items".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_host_is_not_found() {
        let state = state(ReverseProxy::new(ProxyOptions::default()), Arc::default());
        assert_eq!(call(&state, "nowhere.com", "/").await.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_custom_not_found() {
        let proxy = ReverseProxy::new(ProxyOptions::default())
            .with_not_found(|_| (StatusCode::IM_A_TEAPOT, "nothing here").into_response());
        let state = state(proxy, Arc::default());
        assert_eq!(call(&state, "nowhere.com", "/").await.status(), StatusCode::IM_A_TEAPOT);
    }

    #[tokio::test]
    async fn test_upstream_failure_goes_to_error_responder() {
        let proxy = ReverseProxy::new(ProxyOptions::default());
        proxy.register("example.com", "127.0.0.1:3000", &RouteOptions::default()).unwrap();
        let forwarder = Arc::new(RecordingForwarder {
            fail: true,
            ..Default::default()
        });
        let state = state(proxy, forwarder);
        assert_eq!(call(&state, "example.com", "/").await.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_middleware_response_is_returned() {
        let proxy = ReverseProxy::new(ProxyOptions::default());
        proxy.register("example.com", "127.0.0.1:3000", &RouteOptions::default()).unwrap();
        proxy
            .add_resolver(Resolver::for_all_requests().priority(50).use_handler(middleware_fn(
                |_, _, res| {
                    res.end((StatusCode::UNAUTHORIZED, "who are you"));
                    Outcome::Complete
                },
            )))
            .unwrap();
        let forwarder = Arc::new(RecordingForwarder::default());
        let state = state(proxy, forwarder.clone());

        assert_eq!(call(&state, "example.com", "/").await.status(), StatusCode::UNAUTHORIZED);
        assert!(forwarder.urls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unhandled_middleware_error() {
        let proxy = ReverseProxy::new(ProxyOptions::default());
        proxy.register("example.com", "127.0.0.1:3000", &RouteOptions::default()).unwrap();
        proxy
            .add_resolver(
                Resolver::for_all_requests()
                    .priority(50)
                    .use_handler(middleware_fn(|_, _, _| Outcome::Divert(ProxyError::middleware("denied")))),
            )
            .unwrap();
        let state = state(proxy, Arc::default());

        assert_eq!(
            call(&state, "example.com", "/").await.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_https_redirect_on_plain_listener() {
        let proxy = ReverseProxy::new(ProxyOptions {
            https_enabled: true,
            redirect_port: Some(8443),
            ..Default::default()
        });
        let options = RouteOptions {
            ssl: Some(crate::net::SslOptions {
                redirect: true,
                ..Default::default()
            }),
            ..Default::default()
        };
        proxy.register("secure.com", "127.0.0.1:3000", &options).unwrap();
        let forwarder = Arc::new(RecordingForwarder::default());
        let mut state = state(proxy, forwarder.clone());

        let response = call(&state, "secure.com", "/login?next=/").await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers()[header::LOCATION],
            "https://secure.com:8443/login?next=/"
        );

        state.proto = "https";
        assert_eq!(call(&state, "secure.com", "/login").await.status(), StatusCode::OK);
        assert_eq!(forwarder.urls.lock().unwrap().len(), 1);
    }
}
