//! Route lookup and dispatch.
//!
//! # Responsibilities
//! - Store a domain's HTTP routes in registration order
//! - Look up the first route matching method + path
//! - Remove routes at runtime (`disable`)
//!
//! # Design Decisions
//! - Route list is an `ArcSwap` snapshot: lookups never block registration
//! - In-flight requests keep the snapshot they started with
//! - First match wins; uniqueness is not enforced
//! - O(n) scan (acceptable for typical route counts)

use std::future::Future;
use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::http::Method;
use futures_util::future::BoxFuture;

use crate::http::context::{HandlerResult, RequestContext};
use crate::routing::matcher::{match_path, Params};

/// A route handler.
///
/// Implemented for any `Fn(RequestContext) -> impl Future<Output = HandlerResult>`.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, ctx: RequestContext) -> BoxFuture<'static, HandlerResult>;
}

impl<F, Fut> Handler for F
where
    F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, ctx: RequestContext) -> BoxFuture<'static, HandlerResult> {
        Box::pin((self)(ctx))
    }
}

/// A registered HTTP route.
pub struct Route {
    pub method: Method,
    pub pattern: String,
    pub handler: Arc<dyn Handler>,
    /// GET output of this route may be served from the response cache.
    pub cacheable: bool,
}

impl Route {
    pub fn new(method: Method, pattern: impl Into<String>, handler: impl Handler) -> Self {
        Self {
            method,
            pattern: pattern.into(),
            handler: Arc::new(handler),
            cacheable: false,
        }
    }

    pub fn cacheable(mut self) -> Self {
        self.cacheable = true;
        self
    }

    fn accepts(&self, method: &Method) -> bool {
        self.method.as_str().eq_ignore_ascii_case(method.as_str())
    }

    /// Match this route against a request, returning extracted params.
    pub fn matches(&self, method: &Method, path: &str) -> Option<Params> {
        if !self.accepts(method) {
            return None;
        }
        match match_path(path, &self.pattern) {
            Some(params) => Some(params),
            None if path == self.pattern => Some(Params::new()),
            None => None,
        }
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("pattern", &self.pattern)
            .field("cacheable", &self.cacheable)
            .finish()
    }
}

/// Ordered, lock-free route table.
pub struct RouteTable {
    routes: ArcSwap<Vec<Arc<Route>>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self {
            routes: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Append a route.
    pub fn push(&self, route: Route) {
        let route = Arc::new(route);
        self.routes.rcu(|current| {
            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend(current.iter().cloned());
            next.push(route.clone());
            next
        });
    }

    /// Remove the first route with this exact pattern and method.
    pub fn disable(&self, pattern: &str, method: &Method) -> bool {
        let mut removed = false;
        self.routes.rcu(|current| {
            let mut next: Vec<Arc<Route>> = current.iter().cloned().collect();
            removed = match next
                .iter()
                .position(|r| r.pattern == pattern && r.accepts(method))
            {
                Some(index) => {
                    next.remove(index);
                    true
                }
                None => false,
            };
            next
        });
        removed
    }

    /// Current snapshot of the table.
    pub fn snapshot(&self) -> Arc<Vec<Arc<Route>>> {
        self.routes.load_full()
    }

    /// Find the first route accepting this request.
    pub fn find(&self, method: &Method, path: &str) -> Option<(Arc<Route>, Params)> {
        self.snapshot()
            .iter()
            .find_map(|route| route.matches(method, path).map(|p| (route.clone(), p)))
    }

    pub fn len(&self) -> usize {
        self.routes.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}
