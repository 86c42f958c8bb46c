//! A single resolver: optional matcher, priority, and two handler chains.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::http::request::Parts;
use futures_util::FutureExt;

use crate::error::{ProxyError, Result};
use crate::http::response::ResponseWriter;
use crate::resolver::context::RequestContext;
use crate::resolver::middleware::{ErrorMiddleware, Handler, Middleware, Outcome, RouteFn};
use crate::routing::{Matcher, RouteInput};

static NEXT_RESOLVER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity assigned to a resolver when it is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResolverId(u64);

impl fmt::Display for ResolverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "resolver-{}", self.0)
    }
}

/// Result of running one handler step.
enum Step {
    Done(Outcome),
    Panicked(String),
    /// The response was finished while the step was still running.
    Finished,
}

pub struct Resolver {
    id: ResolverId,
    name: Option<String>,
    matcher: Option<Box<dyn Matcher>>,
    priority: i32,
    middleware: Vec<Arc<dyn Middleware>>,
    error_middleware: Vec<Arc<dyn ErrorMiddleware>>,
}

impl Resolver {
    fn empty(matcher: Option<Box<dyn Matcher>>) -> Self {
        Self {
            id: ResolverId(NEXT_RESOLVER_ID.fetch_add(1, Ordering::Relaxed)),
            name: None,
            matcher,
            priority: 0,
            middleware: Vec::new(),
            error_middleware: Vec::new(),
        }
    }

    /// Resolver that only runs for requests accepted by `matcher`.
    pub fn matching(matcher: impl Matcher + 'static) -> Self {
        Self::empty(Some(Box::new(matcher)))
    }

    /// Resolver that runs for every request.
    pub fn for_all_requests() -> Self {
        Self::empty(None)
    }

    /// Resolver from a plain mapping function of `(source host, url)`.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(Option<&str>, &str) -> Option<RouteInput> + Send + Sync + 'static,
    {
        Self::empty(None).middleware(RouteFn(f))
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Append a handler to the chain its variant names.
    pub fn use_handler(mut self, handler: Handler) -> Self {
        match handler {
            Handler::Normal(m) => self.middleware.push(m),
            Handler::Error(m) => self.error_middleware.push(m),
        }
        self
    }

    pub fn middleware(self, middleware: impl Middleware + 'static) -> Self {
        self.use_handler(Handler::Normal(Arc::new(middleware)))
    }

    pub fn error_middleware(self, middleware: impl ErrorMiddleware + 'static) -> Self {
        self.use_handler(Handler::Error(Arc::new(middleware)))
    }

    pub fn id(&self) -> ResolverId {
        self.id
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("anonymous")
    }

    pub fn get_priority(&self) -> i32 {
        self.priority
    }

    pub(crate) fn has_handlers(&self) -> bool {
        !self.middleware.is_empty() || !self.error_middleware.is_empty()
    }

    /// Run this resolver against one request.
    ///
    /// Returns `Ok` when the chain ran out, a step completed, the response
    /// was finished, or the error chain recovered. Returns the pending error
    /// when the error chain is exhausted.
    pub async fn execute(
        &self,
        ctx: &mut RequestContext,
        req: &Parts,
        res: &ResponseWriter,
    ) -> Result<()> {
        if let Some(matcher) = &self.matcher {
            if !matcher.matches(req) {
                return Ok(());
            }
        }

        let mut pending = None;
        for middleware in &self.middleware {
            if res.is_finished() {
                return Ok(());
            }
            match run_guarded(res, middleware.handle(ctx, req, res)).await {
                Step::Done(Outcome::Continue) => {}
                Step::Done(Outcome::Complete) | Step::Finished => return Ok(()),
                Step::Done(Outcome::Divert(error)) => {
                    pending = Some(error);
                    break;
                }
                Step::Panicked(message) => {
                    pending = Some(ProxyError::Middleware(message));
                    break;
                }
            }
        }

        let Some(mut error) = pending else {
            return Ok(());
        };

        for handler in &self.error_middleware {
            if res.is_finished() {
                break;
            }
            match run_guarded(res, handler.handle(&error, ctx, req, res)).await {
                Step::Done(Outcome::Continue) => {}
                Step::Done(Outcome::Divert(replacement)) => error = replacement,
                Step::Done(Outcome::Complete) | Step::Finished => return Ok(()),
                Step::Panicked(message) => return Err(ProxyError::Middleware(message)),
            }
        }

        if res.is_finished() {
            tracing::warn!(
                resolver = %self.name(),
                error = %error,
                "Middleware failed after the response was sent"
            );
            return Ok(());
        }

        Err(error)
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("priority", &self.priority)
            .field("matcher", &self.matcher)
            .field("middleware", &self.middleware.len())
            .field("error_middleware", &self.error_middleware.len())
            .finish()
    }
}

/// Run a step, turning panics into errors and stopping early when the
/// response finishes underneath it.
async fn run_guarded<F>(res: &ResponseWriter, step: F) -> Step
where
    F: Future<Output = Outcome>,
{
    let guarded = AssertUnwindSafe(step).catch_unwind();
    tokio::select! {
        biased;
        outcome = guarded => match outcome {
            Ok(outcome) => Step::Done(outcome),
            Err(panic) => Step::Panicked(panic_message(panic)),
        },
        _ = res.finished() => Step::Finished,
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "middleware panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::middleware::{error_fn, middleware_fn};
    use crate::routing::UrlPattern;
    use async_trait::async_trait;
    use axum::http::{Request, StatusCode};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn parts(uri: &str) -> Parts {
        Request::builder()
            .uri(uri)
            .header("Host", "example.com")
            .body(())
            .unwrap()
            .into_parts()
            .0
    }

    fn counter() -> (Arc<AtomicUsize>, Handler) {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let handler = middleware_fn(move |_, _, _| {
            seen.fetch_add(1, Ordering::SeqCst);
            Outcome::Continue
        });
        (calls, handler)
    }

    #[tokio::test]
    async fn test_matcher_skips_resolver() {
        let (calls, handler) = counter();
        let resolver = Resolver::matching(UrlPattern::new("^/api").unwrap()).use_handler(handler);

        let mut ctx = RequestContext::default();
        let res = ResponseWriter::new();
        resolver.execute(&mut ctx, &parts("/other"), &res).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        resolver.execute(&mut ctx, &parts("/api/v1"), &res).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_divert_runs_error_chain_from_start() {
        let (after, after_handler) = counter();
        let resolver = Resolver::for_all_requests()
            .use_handler(middleware_fn(|_, _, _| {
                Outcome::Divert(ProxyError::middleware("denied"))
            }))
            .use_handler(after_handler)
            .use_handler(error_fn(|error, ctx, _, _| {
                assert!(error.to_string().contains("denied"));
                ctx.route = Some("http://127.0.0.1:9000".into());
                Outcome::Complete
            }));

        let mut ctx = RequestContext::default();
        resolver
            .execute(&mut ctx, &parts("/"), &ResponseWriter::new())
            .await
            .unwrap();
        assert_eq!(after.load(Ordering::SeqCst), 0);
        assert!(ctx.route.is_some());
    }

    #[tokio::test]
    async fn test_unhandled_error_rejects() {
        let resolver = Resolver::for_all_requests()
            .use_handler(middleware_fn(|_, _, _| {
                Outcome::Divert(ProxyError::middleware("first"))
            }))
            .use_handler(error_fn(|_, _, _, _| Outcome::Continue))
            .use_handler(error_fn(|_, _, _, _| {
                Outcome::Divert(ProxyError::middleware("second"))
            }));

        let err = resolver
            .execute(&mut RequestContext::default(), &parts("/"), &ResponseWriter::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("second"));
    }

    #[tokio::test]
    async fn test_panic_is_caught() {
        let resolver = Resolver::for_all_requests()
            .use_handler(middleware_fn(|_, _, _| panic!("boom")))
            .use_handler(error_fn(|error, _, _, res| {
                assert!(matches!(error, ProxyError::Middleware(m) if m == "boom"));
                res.end(StatusCode::SERVICE_UNAVAILABLE);
                Outcome::Complete
            }));

        let res = ResponseWriter::new();
        resolver
            .execute(&mut RequestContext::default(), &parts("/"), &res)
            .await
            .unwrap();
        assert_eq!(res.take().unwrap().status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_panic_in_error_chain_rejects() {
        let resolver = Resolver::for_all_requests()
            .use_handler(middleware_fn(|_, _, _| {
                Outcome::Divert(ProxyError::middleware("first"))
            }))
            .use_handler(error_fn(|_, _, _, _| panic!("handler broke")));

        let err = resolver
            .execute(&mut RequestContext::default(), &parts("/"), &ResponseWriter::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Middleware(m) if m == "handler broke"));
    }

    #[tokio::test]
    async fn test_finished_response_short_circuits() {
        let (after, after_handler) = counter();
        let resolver = Resolver::for_all_requests()
            .use_handler(middleware_fn(|_, _, res| {
                res.end(StatusCode::UNAUTHORIZED);
                Outcome::Continue
            }))
            .use_handler(after_handler);

        let res = ResponseWriter::new();
        resolver
            .execute(&mut RequestContext::default(), &parts("/"), &res)
            .await
            .unwrap();
        assert_eq!(after.load(Ordering::SeqCst), 0);
        assert!(res.is_finished());
    }

    struct EndsLater;

    #[async_trait]
    impl Middleware for EndsLater {
        async fn handle(
            &self,
            _ctx: &mut RequestContext,
            _req: &Parts,
            res: &ResponseWriter,
        ) -> Outcome {
            let remote = res.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                remote.end(StatusCode::ACCEPTED);
            });
            // never resumes on its own
            std::future::pending::<()>().await;
            Outcome::Continue
        }
    }

    #[tokio::test]
    async fn test_completion_signal_ends_pending_step() {
        let resolver = Resolver::for_all_requests().middleware(EndsLater);
        let res = ResponseWriter::new();

        tokio::time::timeout(
            Duration::from_secs(1),
            resolver.execute(&mut RequestContext::default(), &parts("/"), &res),
        )
        .await
        .expect("resolver did not observe the finished response")
        .unwrap();
        assert_eq!(res.take().unwrap().status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_error_after_finish_is_swallowed() {
        let resolver = Resolver::for_all_requests().use_handler(middleware_fn(|_, _, res| {
            res.end(StatusCode::OK);
            Outcome::Divert(ProxyError::middleware("late"))
        }));

        let res = ResponseWriter::new();
        assert!(resolver
            .execute(&mut RequestContext::default(), &parts("/"), &res)
            .await
            .is_ok());
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Resolver::for_all_requests();
        let b = Resolver::for_all_requests();
        assert_ne!(a.id(), b.id());
    }
}
