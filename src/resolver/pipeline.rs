//! Ordered set of resolvers consulted for every request.

use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use axum::http::request::Parts;

use crate::error::{ProxyError, Result};
use crate::http::response::ResponseWriter;
use crate::resolver::chain::{Resolver, ResolverId};
use crate::resolver::context::RequestContext;
use crate::routing::{RouteCache, RouteDescriptor};

/// Resolvers sorted by descending priority, ties in insertion order.
///
/// Readers take a snapshot per request; writers publish a new list.
pub struct ResolverPipeline {
    resolvers: ArcSwap<Vec<Arc<Resolver>>>,
    write_lock: Mutex<()>,
    routes: RouteCache,
}

impl ResolverPipeline {
    pub fn new() -> Self {
        Self {
            resolvers: ArcSwap::from_pointee(Vec::new()),
            write_lock: Mutex::new(()),
            routes: RouteCache::default(),
        }
    }

    /// Add a resolver. Adding the same resolver twice is a no-op.
    pub fn add_resolver(&self, resolver: impl Into<Arc<Resolver>>) -> Result<ResolverId> {
        let resolver = resolver.into();
        if !resolver.has_handlers() {
            return Err(ProxyError::config(format!(
                "resolver {} has no middleware",
                resolver.name()
            )));
        }

        let _guard = self.write_lock.lock().expect("resolver lock poisoned");
        let current = self.resolvers.load();
        let id = resolver.id();
        if current.iter().any(|r| r.id() == id) {
            return Ok(id);
        }

        let mut next: Vec<Arc<Resolver>> = current.as_ref().clone();
        next.push(resolver.clone());
        next.sort_by_key(|r| std::cmp::Reverse(r.get_priority()));
        self.resolvers.store(Arc::new(next));

        tracing::debug!(
            resolver = %resolver.name(),
            id = %id,
            priority = resolver.get_priority(),
            "Resolver added"
        );
        Ok(id)
    }

    /// Remove a resolver, returning whether it was present.
    pub fn remove_resolver(&self, id: ResolverId) -> bool {
        let _guard = self.write_lock.lock().expect("resolver lock poisoned");
        let current = self.resolvers.load();
        if !current.iter().any(|r| r.id() == id) {
            return false;
        }

        let next: Vec<Arc<Resolver>> = current.iter().filter(|r| r.id() != id).cloned().collect();
        self.resolvers.store(Arc::new(next));
        tracing::debug!(id = %id, "Resolver removed");
        true
    }

    pub fn len(&self) -> usize {
        self.resolvers.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Priorities in consultation order.
    pub fn priorities(&self) -> Vec<i32> {
        self.resolvers.load().iter().map(|r| r.get_priority()).collect()
    }

    /// Consult resolvers in priority order until one produces a usable route.
    ///
    /// `Ok(None)` means no resolver decided, or the response was finished
    /// by a middleware. An error means a resolver's error chain gave up.
    pub async fn resolve(
        &self,
        ctx: &mut RequestContext,
        req: &Parts,
        res: &ResponseWriter,
    ) -> Result<Option<Arc<RouteDescriptor>>> {
        let resolvers = self.resolvers.load_full();

        for resolver in resolvers.iter() {
            resolver.execute(ctx, req, res).await?;

            if res.is_finished() {
                return Ok(None);
            }

            let Some(route) = &ctx.route else {
                continue;
            };

            match self.routes.normalize(route) {
                Some(descriptor) => {
                    tracing::trace!(
                        resolver = %resolver.name(),
                        path = %descriptor.path(),
                        "Route resolved"
                    );
                    return Ok(Some(descriptor));
                }
                None => {
                    tracing::warn!(
                        resolver = %resolver.name(),
                        route = ?route,
                        "Resolver produced an unusable route, trying lower priorities"
                    );
                    ctx.route = None;
                }
            }
        }

        Ok(None)
    }
}

impl Default for ResolverPipeline {
    fn default() -> Self {
        Self::new()
    }
}
