//! Middleware steps run by a resolver.
//!
//! A step returns an [`Outcome`] instead of calling a continuation:
//! `Continue` moves to the next step, `Divert` switches into the error
//! chain (or replaces the pending error when already there), `Complete`
//! stops the resolver without an error.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::request::Parts;

use crate::error::ProxyError;
use crate::http::response::ResponseWriter;
use crate::resolver::context::RequestContext;
use crate::routing::matcher::request_url;
use crate::routing::RouteInput;

#[derive(Debug)]
pub enum Outcome {
    Continue,
    Divert(ProxyError),
    Complete,
}

/// A step of a resolver's normal chain.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(
        &self,
        ctx: &mut RequestContext,
        req: &Parts,
        res: &ResponseWriter,
    ) -> Outcome;
}

/// A step of a resolver's error chain.
///
/// `Continue` hands the same error to the next handler, `Complete`
/// recovers from it.
#[async_trait]
pub trait ErrorMiddleware: Send + Sync {
    async fn handle(
        &self,
        error: &ProxyError,
        ctx: &mut RequestContext,
        req: &Parts,
        res: &ResponseWriter,
    ) -> Outcome;
}

/// Which chain a handler belongs to, chosen when it is attached.
#[derive(Clone)]
pub enum Handler {
    Normal(Arc<dyn Middleware>),
    Error(Arc<dyn ErrorMiddleware>),
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Normal(_) => f.write_str("Handler::Normal"),
            Handler::Error(_) => f.write_str("Handler::Error"),
        }
    }
}

struct FnMiddleware<F>(F);

#[async_trait]
impl<F> Middleware for FnMiddleware<F>
where
    F: Fn(&mut RequestContext, &Parts, &ResponseWriter) -> Outcome + Send + Sync,
{
    async fn handle(
        &self,
        ctx: &mut RequestContext,
        req: &Parts,
        res: &ResponseWriter,
    ) -> Outcome {
        (self.0)(ctx, req, res)
    }
}

struct FnErrorMiddleware<F>(F);

#[async_trait]
impl<F> ErrorMiddleware for FnErrorMiddleware<F>
where
    F: Fn(&ProxyError, &mut RequestContext, &Parts, &ResponseWriter) -> Outcome + Send + Sync,
{
    async fn handle(
        &self,
        error: &ProxyError,
        ctx: &mut RequestContext,
        req: &Parts,
        res: &ResponseWriter,
    ) -> Outcome {
        (self.0)(error, ctx, req, res)
    }
}

/// Wrap a synchronous closure as a normal-chain handler.
pub fn middleware_fn<F>(f: F) -> Handler
where
    F: Fn(&mut RequestContext, &Parts, &ResponseWriter) -> Outcome + Send + Sync + 'static,
{
    Handler::Normal(Arc::new(FnMiddleware(f)))
}

/// Wrap a synchronous closure as an error-chain handler.
pub fn error_fn<F>(f: F) -> Handler
where
    F: Fn(&ProxyError, &mut RequestContext, &Parts, &ResponseWriter) -> Outcome
        + Send
        + Sync
        + 'static,
{
    Handler::Error(Arc::new(FnErrorMiddleware(f)))
}

/// Maps `(source host, url)` to a route and stores it in the context.
pub(crate) struct RouteFn<F>(pub(crate) F);

#[async_trait]
impl<F> Middleware for RouteFn<F>
where
    F: Fn(Option<&str>, &str) -> Option<RouteInput> + Send + Sync,
{
    async fn handle(
        &self,
        ctx: &mut RequestContext,
        req: &Parts,
        _res: &ResponseWriter,
    ) -> Outcome {
        if let Some(route) = (self.0)(ctx.src.as_deref(), request_url(req)) {
            ctx.route = Some(route);
        }
        Outcome::Continue
    }
}
