//! The reverse proxy: route registry, resolver pipeline and certificates.
//!
//! # Data Flow
//! ```text
//! register(source, target, options)
//!     → certificates (ssl options)
//!     → routing table
//!
//! Request
//!     → resolvers (challenge 9999, rate limit, user resolvers, table lookup 0)
//!     → get_target (prefix strip, round robin, target path, host override)
//!     → ForwardPlan handed to the HTTP layer
//! ```

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};

use crate::config::{ProxyConfig, RouteConfig, StoreConfig};
use crate::error::{ProxyError, Result};
use crate::http::response::{self, ResponseWriter};
use crate::net::tls::{CertificateRegistry, CertificateStore};
use crate::resolver::{RequestContext, Resolver, ResolverId, ResolverPipeline};
use crate::routing::matcher::request_url;
use crate::routing::target::{join_path, prepare_url};
use crate::routing::{RouteInput, RouteOptions, RoutingTable, Source, Target, Unregistered};
use crate::security::rate_limit::{
    DistributedProvider, LocalProvider, RateLimitMiddleware, RateLimitProvider, RateLimiter,
};

/// Priority of the table lookup resolver.
pub const DEFAULT_RESOLVER_PRIORITY: i32 = 0;

/// Priority of the certificate challenge resolver.
pub const CHALLENGE_RESOLVER_PRIORITY: i32 = 9999;

const CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge";

pub type NotFoundResponder = Arc<dyn Fn(&Parts) -> Response + Send + Sync>;
pub type ErrorResponder = Arc<dyn Fn(&ProxyError, &Parts) -> Response + Send + Sync>;

/// Proxy-wide settings.
#[derive(Debug, Clone, Default)]
pub struct ProxyOptions {
    /// Take the source host from `X-Forwarded-Host` when present.
    pub prefer_forwarded_host: bool,
    /// Add `X-Forwarded-*` headers.
    pub xfwd: bool,
    /// An HTTPS listener is running; required for TLS routes.
    pub https_enabled: bool,
    /// Port written into HTTPS redirects.
    pub redirect_port: Option<u16>,
    /// Port of the local certificate challenge responder.
    pub acme_challenge_port: Option<u16>,
}

impl ProxyOptions {
    pub fn from_config(config: &ProxyConfig) -> Self {
        Self {
            prefer_forwarded_host: config.proxy.prefer_forwarded_host,
            xfwd: config.proxy.xfwd,
            https_enabled: config.https.is_some(),
            redirect_port: config.https.as_ref().and_then(|h| h.advertised_port()),
            acme_challenge_port: config.acme_challenge.as_ref().map(|c| c.port),
        }
    }
}

/// How to forward one request.
#[derive(Debug, Clone)]
pub struct ForwardPlan {
    pub target: Arc<Target>,
    /// Path and query sent upstream.
    pub url: String,
    /// Path and query as received, used for redirects.
    pub original_url: String,
    /// Replacement for the `Host` header.
    pub host_override: Option<String>,
}

pub struct ReverseProxy {
    routing: Arc<RoutingTable>,
    resolvers: ResolverPipeline,
    certificates: Arc<CertificateRegistry>,
    options: ProxyOptions,
    not_found: NotFoundResponder,
    on_error: ErrorResponder,
}

impl ReverseProxy {
    pub fn new(options: ProxyOptions) -> Self {
        Self::with_certificates(options, CertificateRegistry::new())
    }

    /// Build a proxy around an existing certificate registry (one with an
    /// issuer, for instance).
    pub fn with_certificates(options: ProxyOptions, certificates: CertificateRegistry) -> Self {
        let certificates = match options.acme_challenge_port {
            Some(port) => certificates.with_challenge_host(format!("127.0.0.1:{}", port)),
            None => certificates,
        };

        let proxy = Self {
            routing: Arc::new(RoutingTable::new()),
            resolvers: ResolverPipeline::new(),
            certificates: Arc::new(certificates),
            options,
            not_found: Arc::new(default_not_found),
            on_error: Arc::new(default_error_response),
        };
        proxy.install_builtin_resolvers();
        proxy
    }

    /// Build the proxy described by `config`: rate limiting, then routes.
    pub async fn from_config(config: &ProxyConfig) -> Result<Self> {
        let proxy = Self::new(ProxyOptions::from_config(config));

        if config.rate_limit.enabled {
            let provider: Arc<dyn RateLimitProvider> = match &config.rate_limit.store {
                StoreConfig::Local => Arc::new(LocalProvider::new()),
                StoreConfig::Redis { url } => Arc::new(DistributedProvider::connect(url).await?),
            };
            let limiter = RateLimiter::new(provider, config.rate_limit.tiers.clone());
            proxy.enable_rate_limiting(Arc::new(limiter), config.rate_limit.priority)?;
        }

        for route in &config.routes {
            proxy.register_route(&proxy.routing, route)?;
        }
        Ok(proxy)
    }

    fn install_builtin_resolvers(&self) {
        let table = self.routing.clone();
        let lookup = Resolver::from_fn(move |host, url| {
            let descriptor = table.lookup(host?, path_of(url))?;
            Some(RouteInput::Descriptor(descriptor))
        })
        .priority(DEFAULT_RESOLVER_PRIORITY)
        .named("routing-table");
        // has a handler, so this cannot fail
        let _ = self.resolvers.add_resolver(lookup);

        if let Some(port) = self.options.acme_challenge_port {
            let responder = format!("http://127.0.0.1:{}", port);
            let challenge = Resolver::from_fn(move |host, url| {
                let host = host?;
                url.starts_with(CHALLENGE_PREFIX)
                    .then(|| RouteInput::Url(format!("{}/{}", responder, host)))
            })
            .priority(CHALLENGE_RESOLVER_PRIORITY)
            .named("acme-challenge");
            let _ = self.resolvers.add_resolver(challenge);
        }
    }

    /// Install a resolver running the rate limiter for every request.
    pub fn enable_rate_limiting(&self, limiter: Arc<RateLimiter>, priority: i32) -> Result<ResolverId> {
        tracing::info!(tiers = ?limiter.tiers(), priority, "Rate limiting enabled");
        let gate = Resolver::for_all_requests()
            .priority(priority)
            .named("rate-limit")
            .middleware(RateLimitMiddleware::new(limiter));
        self.resolvers.add_resolver(gate)
    }

    pub fn with_not_found<F>(mut self, responder: F) -> Self
    where
        F: Fn(&Parts) -> Response + Send + Sync + 'static,
    {
        self.not_found = Arc::new(responder);
        self
    }

    pub fn with_error_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&ProxyError, &Parts) -> Response + Send + Sync + 'static,
    {
        self.on_error = Arc::new(responder);
        self
    }

    pub fn options(&self) -> &ProxyOptions {
        &self.options
    }

    pub fn routing(&self) -> &RoutingTable {
        &self.routing
    }

    pub fn certificates(&self) -> &Arc<CertificateRegistry> {
        &self.certificates
    }

    pub fn resolvers(&self) -> &ResolverPipeline {
        &self.resolvers
    }

    /// Register `target` for `source` (`host[/path]`).
    pub fn register(&self, source: &str, target: &str, options: &RouteOptions) -> Result<()> {
        let source = Source::parse(source)?;
        let target = Target::parse(target, options)?;
        self.register_target(&self.routing, &source, target, options)
    }

    fn register_target(
        &self,
        table: &RoutingTable,
        source: &Source,
        target: Target,
        options: &RouteOptions,
    ) -> Result<()> {
        if let Some(ssl) = &options.ssl {
            if !self.options.https_enabled {
                return Err(ProxyError::config(format!(
                    "cannot register {} with ssl options without an https listener",
                    source
                )));
            }
            self.certificates.ensure(&source.hostname, ssl)?;
        }

        tracing::info!(from = %source, to = %target, "Registered a route");
        table.register(source, target);
        Ok(())
    }

    fn register_route(&self, table: &RoutingTable, route: &RouteConfig) -> Result<()> {
        let options = RouteOptions {
            ssl: route.ssl.clone(),
            use_target_host_header: route.use_target_host_header,
        };
        let source = Source::parse(&route.source)?;
        for target in &route.targets {
            let target = Target::parse(target, &options)?;
            self.register_target(table, &source, target, &options)?;
        }
        Ok(())
    }

    /// Remove `target` from `source`, or the whole route when `target` is `None`.
    pub fn unregister(&self, source: &str, target: Option<&str>) -> Result<Unregistered> {
        let source = Source::parse(source)?;
        let href = target.map(prepare_url).transpose()?;
        let outcome = self
            .routing
            .unregister(&source, href.as_ref().map(|url| url.as_str()));

        if outcome.removed > 0 {
            tracing::info!(from = %source, to = ?target, "Unregistered a route");
        }
        if outcome.host_emptied {
            self.certificates.evict(&source.hostname);
        }
        Ok(outcome)
    }

    /// Replace all statically registered routes.
    pub fn reload_routes(&self, routes: &[RouteConfig]) -> Result<()> {
        let next = RoutingTable::new();
        for route in routes {
            self.register_route(&next, route)?;
        }

        let kept: HashSet<String> = next.hosts().into_iter().collect();
        let dropped: Vec<String> = self
            .routing
            .hosts()
            .into_iter()
            .filter(|host| !kept.contains(host))
            .collect();

        self.routing.replace_with(&next);
        for host in &dropped {
            self.certificates.evict(host);
        }
        tracing::info!(routes = routes.len(), dropped_hosts = dropped.len(), "Routes reloaded");
        Ok(())
    }

    pub fn add_resolver(&self, resolver: impl Into<Arc<Resolver>>) -> Result<ResolverId> {
        self.resolvers.add_resolver(resolver)
    }

    pub fn remove_resolver(&self, id: ResolverId) -> bool {
        self.resolvers.remove_resolver(id)
    }

    /// Resolve the request and work out where to forward it.
    ///
    /// `Ok(None)` when a middleware already answered or no route exists;
    /// check `res.is_finished()` to tell the two apart.
    pub async fn get_target(
        &self,
        ctx: &mut RequestContext,
        req: &Parts,
        res: &ResponseWriter,
    ) -> Result<Option<ForwardPlan>> {
        let route = self.resolvers.resolve(ctx, req, res).await?;

        if res.is_finished() {
            tracing::info!(request_id = ?ctx.request_id, "Request completed without proxying");
            return Ok(None);
        }

        let original_url = request_url(req).to_string();
        let Some(route) = route else {
            tracing::warn!(
                request_id = ?ctx.request_id,
                src = ?ctx.src,
                url = %original_url,
                "No valid route found for given source"
            );
            return Ok(None);
        };

        let Some(target) = route.select_target() else {
            tracing::warn!(path = %route.path(), "Route has no targets");
            return Ok(None);
        };

        let mut url = strip_prefix(&original_url, route.path());
        if let Some(base) = target.path() {
            url = join_path(base, &url);
        }

        let host_override = target.use_target_host_header.then(|| target.host());

        tracing::info!(
            request_id = ?ctx.request_id,
            from = %format!("{}{}", ctx.src.as_deref().unwrap_or_default(), original_url),
            to = %format!("{}{}", target.host(), url),
            "Proxying request"
        );

        Ok(Some(ForwardPlan {
            target,
            url,
            original_url,
            host_override,
        }))
    }

    /// Whether a plain HTTP request for `src` resolved to `target` must
    /// be redirected to HTTPS.
    pub fn should_redirect(&self, src: Option<&str>, target: &Target) -> bool {
        src.is_some_and(|src| self.certificates.should_force_https_redirect(src, target))
    }

    pub fn not_found_response(&self, req: &Parts) -> Response {
        (self.not_found)(req)
    }

    pub fn error_response(&self, error: &ProxyError, req: &Parts) -> Response {
        (self.on_error)(error, req)
    }
}

impl fmt::Debug for ReverseProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReverseProxy")
            .field("options", &self.options)
            .field("hosts", &self.routing.hosts().len())
            .field("resolvers", &self.resolvers.len())
            .finish()
    }
}

fn default_not_found(_req: &Parts) -> Response {
    response::not_found()
}

fn default_error_response(error: &ProxyError, _req: &Parts) -> Response {
    let status = error.status();
    if status.is_server_error() {
        tracing::error!(error = %error, "Error processing request");
    }
    (status, status.canonical_reason().unwrap_or("Error")).into_response()
}

fn path_of(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

/// Remove a mount path from the front of the request URL.
fn strip_prefix(url: &str, mount: &str) -> String {
    if mount.len() <= 1 {
        return url.to_string();
    }
    match url.get(mount.len()..) {
        None | Some("") => "/".to_string(),
        Some(rest) if rest.starts_with('?') => format!("/{}", rest),
        Some(rest) => rest.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::tls::SslOptions;
    use crate::resolver::{middleware_fn, Outcome};
    use axum::http::{Request, StatusCode};

    fn parts(uri: &str) -> Parts {
        Request::builder().uri(uri).body(()).unwrap().into_parts().0
    }

    fn ctx(src: &str) -> RequestContext {
        RequestContext::new(Some(src.to_string()))
    }

    async fn plan(proxy: &ReverseProxy, src: &str, uri: &str) -> Option<ForwardPlan> {
        proxy
            .get_target(&mut ctx(src), &parts(uri), &ResponseWriter::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_prefix_strip_and_target_path() {
        let proxy = ReverseProxy::new(ProxyOptions::default());
        proxy
            .register("example.com/api", "http://127.0.0.1:3000/v1", &RouteOptions::default())
            .unwrap();

        let plan = plan(&proxy, "example.com", "/api/users?id=7").await.unwrap();
        assert_eq!(plan.url, "/v1/users?id=7");
        assert_eq!(plan.original_url, "/api/users?id=7");

        let root = self::plan(&proxy, "example.com", "/api").await.unwrap();
        assert_eq!(root.url, "/v1/");

        let query = self::plan(&proxy, "example.com", "/api?x=1").await.unwrap();
        assert_eq!(query.url, "/v1/?x=1");
    }

    #[tokio::test]
    async fn test_root_route_keeps_url() {
        let proxy = ReverseProxy::new(ProxyOptions::default());
        proxy.register("example.com", "127.0.0.1:3000", &RouteOptions::default()).unwrap();

        let plan = plan(&proxy, "example.com", "/a/b").await.unwrap();
        assert_eq!(plan.url, "/a/b");
        assert!(plan.host_override.is_none());
        assert!(self::plan(&proxy, "other.com", "/a/b").await.is_none());
    }

    #[tokio::test]
    async fn test_round_robin_across_requests() {
        let proxy = ReverseProxy::new(ProxyOptions::default());
        for port in [3001, 3002, 3003] {
            proxy
                .register("example.com", &format!("127.0.0.1:{}", port), &RouteOptions::default())
                .unwrap();
        }

        let mut ports = Vec::new();
        for _ in 0..6 {
            ports.push(plan(&proxy, "example.com", "/").await.unwrap().target.port().unwrap());
        }
        assert_eq!(ports, vec![3001, 3002, 3003, 3001, 3002, 3003]);
    }

    #[tokio::test]
    async fn test_target_host_header() {
        let proxy = ReverseProxy::new(ProxyOptions::default());
        let options = RouteOptions {
            use_target_host_header: true,
            ..Default::default()
        };
        proxy.register("example.com", "http://backend.internal:9000", &options).unwrap();

        let plan = plan(&proxy, "example.com", "/").await.unwrap();
        assert_eq!(plan.host_override.as_deref(), Some("backend.internal:9000"));
    }

    #[tokio::test]
    async fn test_user_resolver_outranks_table() {
        let proxy = ReverseProxy::new(ProxyOptions::default());
        proxy.register("example.com", "127.0.0.1:3000", &RouteOptions::default()).unwrap();
        proxy
            .add_resolver(
                Resolver::from_fn(|_, url| url.starts_with("/beta").then(|| "127.0.0.1:4000".into()))
                    .priority(10),
            )
            .unwrap();

        assert_eq!(plan(&proxy, "example.com", "/beta/x").await.unwrap().target.port(), Some(4000));
        assert_eq!(plan(&proxy, "example.com", "/x").await.unwrap().target.port(), Some(3000));
    }

    #[tokio::test]
    async fn test_finished_response_yields_no_plan() {
        let proxy = ReverseProxy::new(ProxyOptions::default());
        proxy.register("example.com", "127.0.0.1:3000", &RouteOptions::default()).unwrap();
        proxy
            .add_resolver(Resolver::for_all_requests().priority(5).use_handler(middleware_fn(
                |_, _, res| {
                    res.end(StatusCode::UNAUTHORIZED);
                    Outcome::Continue
                },
            )))
            .unwrap();

        let res = ResponseWriter::new();
        let plan = proxy.get_target(&mut ctx("example.com"), &parts("/"), &res).await.unwrap();
        assert!(plan.is_none());
        assert!(res.is_finished());
    }

    #[tokio::test]
    async fn test_challenge_resolver() {
        let proxy = ReverseProxy::new(ProxyOptions {
            acme_challenge_port: Some(3100),
            https_enabled: true,
            ..Default::default()
        });
        let options = RouteOptions {
            ssl: Some(SslOptions {
                redirect: true,
                ..Default::default()
            }),
            ..Default::default()
        };
        proxy.register("secure.com", "127.0.0.1:3000", &options).unwrap();

        let plan = plan(&proxy, "secure.com", "/.well-known/acme-challenge/token").await.unwrap();
        assert_eq!(plan.target.host(), "127.0.0.1:3100");
        assert_eq!(plan.url, "/secure.com/.well-known/acme-challenge/token");
        assert!(!proxy.should_redirect(Some("secure.com"), &plan.target));

        let normal = self::plan(&proxy, "secure.com", "/").await.unwrap();
        assert!(proxy.should_redirect(Some("secure.com"), &normal.target));
    }

    #[test]
    fn test_ssl_requires_https_listener() {
        let proxy = ReverseProxy::new(ProxyOptions::default());
        let options = RouteOptions {
            ssl: Some(SslOptions::default()),
            ..Default::default()
        };
        assert!(matches!(
            proxy.register("secure.com", "127.0.0.1:3000", &options),
            Err(ProxyError::Configuration(_))
        ));
        assert!(proxy.routing().hosts().is_empty());
    }

    #[test]
    fn test_unregister_evicts_certificate_with_host() {
        let proxy = ReverseProxy::new(ProxyOptions {
            https_enabled: true,
            ..Default::default()
        });
        let options = RouteOptions {
            ssl: Some(SslOptions::default()),
            ..Default::default()
        };
        proxy.register("secure.com", "127.0.0.1:3000", &options).unwrap();
        proxy.register("secure.com/api", "127.0.0.1:3001", &options).unwrap();

        proxy.unregister("secure.com/api", Some("127.0.0.1:3001")).unwrap();
        assert!(proxy.certificates().lookup_certificate("secure.com").is_some());

        let outcome = proxy.unregister("secure.com", None).unwrap();
        assert!(outcome.host_emptied);
        assert!(proxy.certificates().lookup_certificate("secure.com").is_none());
    }

    #[test]
    fn test_malformed_registration() {
        let proxy = ReverseProxy::new(ProxyOptions::default());
        assert!(proxy.register("", "127.0.0.1:3000", &RouteOptions::default()).is_err());
        assert!(proxy.register("example.com", "http://bad host", &RouteOptions::default()).is_err());
    }

    #[test]
    fn test_reload_routes() {
        let proxy = ReverseProxy::new(ProxyOptions::default());
        proxy.register("old.com", "127.0.0.1:3000", &RouteOptions::default()).unwrap();

        proxy
            .reload_routes(&[RouteConfig {
                source: "new.com".into(),
                targets: vec!["127.0.0.1:4000".into()],
                use_target_host_header: false,
                ssl: None,
            }])
            .unwrap();
        assert_eq!(proxy.routing().hosts(), vec!["new.com".to_string()]);
    }

    #[test]
    fn test_strip_prefix() {
        assert_eq!(strip_prefix("/api/x", "/api"), "/x");
        assert_eq!(strip_prefix("/api", "/api"), "/");
        assert_eq!(strip_prefix("/x", "/"), "/x");
        assert_eq!(strip_prefix("/api?q", "/api"), "/?q");
    }
}
