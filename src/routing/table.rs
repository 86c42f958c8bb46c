//! Host → route table with longest-prefix lookup.
//!
//! # Responsibilities
//! - Hold one [`RouteDescriptor`] per registered `(host, path)`
//! - Keep each host's descriptors sorted by descending path length
//! - Answer lookups without touching round-robin state
//!
//! # Design Decisions
//! - Copy-on-write: writers build a new snapshot and swap it in, readers
//!   keep whatever snapshot they loaded
//! - Writers are serialized by a mutex; registration is administrative
//! - Descriptors are immutable apart from their round-robin cursor

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use serde::Serialize;

use crate::load_balancer::RoundRobin;
use crate::routing::target::{Source, Target};

/// Routing table entry for one `(host, path)` pair.
#[derive(Debug)]
pub struct RouteDescriptor {
    path: String,
    targets: Vec<Arc<Target>>,
    cursor: RoundRobin,
}

impl RouteDescriptor {
    pub fn new(path: impl Into<String>, targets: Vec<Arc<Target>>) -> Self {
        Self {
            path: path.into(),
            targets,
            cursor: RoundRobin::new(),
        }
    }

    fn with_targets(&self, targets: Vec<Arc<Target>>) -> Self {
        Self {
            path: self.path.clone(),
            targets,
            cursor: RoundRobin::starting_at(self.cursor.current()),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn targets(&self) -> &[Arc<Target>] {
        &self.targets
    }

    /// Index of the target the next selection returns.
    pub fn round_robin_index(&self) -> usize {
        match self.targets.len() {
            0 => 0,
            len => self.cursor.current() % len,
        }
    }

    /// Pick the next target round-robin. Call once per forwarded request.
    pub fn select_target(&self) -> Option<Arc<Target>> {
        let index = self.cursor.next_index(self.targets.len())?;
        self.targets.get(index).cloned()
    }

    /// Whether `path` falls under this route: `"/"` matches everything,
    /// otherwise a prefix that ends at a segment boundary.
    pub fn matches(&self, path: &str) -> bool {
        if self.path == "/" {
            return true;
        }
        match path.strip_prefix(self.path.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }
}

type Snapshot = HashMap<String, Vec<Arc<RouteDescriptor>>>;

/// Outcome of [`RoutingTable::unregister`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Unregistered {
    /// Number of targets removed.
    pub removed: usize,
    /// The descriptor ran out of targets and was dropped.
    pub route_removed: bool,
    /// The host has no routes left.
    pub host_emptied: bool,
}

/// Serializable view of one route, for listings.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RouteSummary {
    pub host: String,
    pub path: String,
    pub targets: Vec<String>,
    pub round_robin_index: usize,
}

/// The routing table.
#[derive(Debug, Default)]
pub struct RoutingTable {
    routes: ArcSwap<Snapshot>,
    write_lock: Mutex<()>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `target` to the route registered under `source`.
    pub fn register(&self, source: &Source, target: Target) {
        let _guard = self.write_lock.lock().expect("routing table lock poisoned");
        let mut next: Snapshot = (**self.routes.load()).clone();
        let routes = next.entry(source.hostname.clone()).or_default();
        let target = Arc::new(target);

        match routes.iter().position(|r| r.path == source.path) {
            Some(i) => {
                let mut targets = routes[i].targets.clone();
                targets.push(target);
                routes[i] = Arc::new(routes[i].with_targets(targets));
            }
            None => {
                routes.push(Arc::new(RouteDescriptor::new(source.path.clone(), vec![target])));
                // stable: equal lengths keep insertion order
                routes.sort_by(|a, b| b.path.len().cmp(&a.path.len()));
            }
        }

        self.routes.store(Arc::new(next));
    }

    /// Remove the target with canonical URL `href` (all targets when `None`).
    pub fn unregister(&self, source: &Source, href: Option<&str>) -> Unregistered {
        let _guard = self.write_lock.lock().expect("routing table lock poisoned");
        let current = self.routes.load();

        let Some(position) = current
            .get(&source.hostname)
            .and_then(|routes| routes.iter().position(|r| r.path == source.path))
        else {
            return Unregistered::default();
        };

        let mut next: Snapshot = (**current).clone();
        let routes = next.entry(source.hostname.clone()).or_default();
        let route = routes[position].clone();

        let remaining: Vec<Arc<Target>> = match href {
            Some(href) => route.targets.iter().filter(|t| t.href() != href).cloned().collect(),
            None => Vec::new(),
        };

        let mut outcome = Unregistered {
            removed: route.targets.len() - remaining.len(),
            ..Default::default()
        };

        if remaining.is_empty() {
            routes.remove(position);
            outcome.route_removed = true;
        } else if outcome.removed > 0 {
            routes[position] = Arc::new(route.with_targets(remaining));
        }

        if routes.is_empty() {
            next.remove(&source.hostname);
            outcome.host_emptied = true;
        }

        self.routes.store(Arc::new(next));
        outcome
    }

    /// Longest registered prefix of `path` for `host`.
    pub fn lookup(&self, host: &str, path: &str) -> Option<Arc<RouteDescriptor>> {
        let routes = self.routes.load();
        routes
            .get(host)?
            .iter()
            .find(|route| route.matches(path))
            .cloned()
    }

    /// Replace the whole table with the contents of `other`.
    pub fn replace_with(&self, other: &RoutingTable) {
        let _guard = self.write_lock.lock().expect("routing table lock poisoned");
        self.routes.store(other.routes.load_full());
    }

    pub fn hosts(&self) -> Vec<String> {
        self.routes.load().keys().cloned().collect()
    }

    pub fn summaries(&self) -> Vec<RouteSummary> {
        let routes = self.routes.load();
        let mut summaries: Vec<RouteSummary> = routes
            .iter()
            .flat_map(|(host, descriptors)| {
                descriptors.iter().map(move |d| RouteSummary {
                    host: host.clone(),
                    path: d.path.clone(),
                    targets: d.targets.iter().map(|t| t.href().to_string()).collect(),
                    round_robin_index: d.round_robin_index(),
                })
            })
            .collect();
        summaries.sort_by(|a, b| a.host.cmp(&b.host));
        summaries
    }
}
