//! Routes produced by resolvers and their normalization into descriptors.

use std::sync::{Arc, Mutex};

use cached::{Cached, SizedCache};
use serde::{Deserialize, Serialize};

use crate::routing::table::RouteDescriptor;
use crate::routing::target::{RouteOptions, Target};

/// Number of dynamically built routes kept around.
pub const ROUTE_CACHE_SIZE: usize = 5000;

/// What a resolver may put into `RequestContext::route`.
#[derive(Debug, Clone)]
pub enum RouteInput {
    /// A single target URL, mounted at `/`.
    Url(String),
    /// One or more target URLs with an optional mount path.
    Spec(RouteSpec),
    /// An entry of the routing table.
    Descriptor(Arc<RouteDescriptor>),
}

/// Dynamic route description.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct RouteSpec {
    pub urls: Vec<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub options: RouteOptions,
}

impl From<&str> for RouteInput {
    fn from(url: &str) -> Self {
        RouteInput::Url(url.to_string())
    }
}

impl From<String> for RouteInput {
    fn from(url: String) -> Self {
        RouteInput::Url(url)
    }
}

impl From<RouteSpec> for RouteInput {
    fn from(spec: RouteSpec) -> Self {
        RouteInput::Spec(spec)
    }
}

impl From<Arc<RouteDescriptor>> for RouteInput {
    fn from(descriptor: Arc<RouteDescriptor>) -> Self {
        RouteInput::Descriptor(descriptor)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum RouteKey {
    Url(String),
    Spec(RouteSpec),
}

/// Bounded cache of descriptors built from dynamic routes, so the same
/// dynamic route keeps its round-robin position across requests.
pub struct RouteCache {
    built: Mutex<SizedCache<RouteKey, Arc<RouteDescriptor>>>,
}

impl RouteCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            built: Mutex::new(SizedCache::with_size(capacity)),
        }
    }

    /// Turn a resolver's route into a descriptor, `None` when it is unusable.
    pub fn normalize(&self, input: &RouteInput) -> Option<Arc<RouteDescriptor>> {
        let key = match input {
            RouteInput::Descriptor(descriptor) => return Some(descriptor.clone()),
            RouteInput::Url(url) => RouteKey::Url(url.clone()),
            RouteInput::Spec(spec) => RouteKey::Spec(spec.clone()),
        };

        let mut built = self.built.lock().expect("route cache lock poisoned");
        if let Some(descriptor) = built.cache_get(&key) {
            return Some(descriptor.clone());
        }

        let descriptor = Arc::new(build_descriptor(&key)?);
        built.cache_set(key, descriptor.clone());
        Some(descriptor)
    }
}

impl Default for RouteCache {
    fn default() -> Self {
        Self::new(ROUTE_CACHE_SIZE)
    }
}

fn build_descriptor(key: &RouteKey) -> Option<RouteDescriptor> {
    match key {
        RouteKey::Url(url) => {
            let target = Target::parse(url, &RouteOptions::default())
                .map_err(|e| tracing::debug!(url = %url, error = %e, "Unusable route"))
                .ok()?;
            Some(RouteDescriptor::new("/", vec![Arc::new(target)]))
        }
        RouteKey::Spec(spec) => {
            if spec.urls.is_empty() {
                return None;
            }
            let targets = spec
                .urls
                .iter()
                .map(|url| Target::parse(url, &spec.options).map(Arc::new))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| tracing::debug!(error = %e, "Unusable route spec"))
                .ok()?;
            let path = spec.path.clone().unwrap_or_else(|| "/".to_string());
            Some(RouteDescriptor::new(path, targets))
        }
    }
}
