use http::Method;
use smallvec::SmallVec;
use std::sync::Arc;
use tracing::debug;

use super::path::split_path;
use super::radix::{Endpoint, PatternSegment, RadixNode};

/// Path parameters; eight inline slots cover every pattern in the table.
pub type ParamVec = SmallVec<[(Arc<str>, String); 8]>;

/// A resolved route: the handler plus the parameters extracted from the path.
#[derive(Debug, Clone)]
pub struct RouteMatch<H> {
    pub handler: H,
    /// Registered pattern, e.g. `/v1/jobs/{id}`
    pub pattern: Arc<str>,
    pub path_params: ParamVec,
}

impl<H> RouteMatch<H> {
    pub fn get_path_param(&self, name: &str) -> Option<&str> {
        self.path_params
            .iter()
            .find(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Result of resolving `(method, path)`.
#[derive(Debug, Clone)]
pub enum RouteOutcome<H> {
    Matched(RouteMatch<H>),
    /// Shape matched, method did not (405)
    MethodNotAllowed { allowed: Vec<Method> },
    /// Shape matched except for an action word outside its set (400)
    UnknownAction { kind: Arc<str> },
    NotFound,
}

/// Method-scoped routing table.
///
/// ```rust
/// use http::Method;
/// use masterchef::router::{RouteOutcome, Router};
///
/// let mut router = Router::new();
/// router.insert(Method::POST, "/v1/jobs/{id}/{job:cancel|retry}", "job_action");
///
/// match router.route(&Method::POST, "/v1/jobs/j1/cancel") {
///     RouteOutcome::Matched(m) => assert_eq!(m.get_path_param("action"), Some("cancel")),
///     _ => unreachable!(),
/// }
/// ```
#[derive(Clone)]
pub struct Router<H> {
    root: RadixNode<H>,
    table: Vec<(Method, Arc<str>)>,
}

impl<H: Clone> Default for Router<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: Clone> Router<H> {
    pub fn new() -> Self {
        Self {
            root: RadixNode::root(),
            table: Vec::new(),
        }
    }

    pub fn insert(&mut self, method: Method, pattern: &str, handler: H) {
        let segments: Vec<PatternSegment> = split_path(pattern)
            .iter()
            .map(|s| PatternSegment::parse(s))
            .collect();
        let pattern: Arc<str> = Arc::from(pattern);
        self.table.push((method.clone(), Arc::clone(&pattern)));
        self.root.insert(
            &segments,
            Endpoint {
                method,
                pattern,
                handler,
            },
        );
    }

    pub fn route(&self, method: &Method, path: &str) -> RouteOutcome<H> {
        let segments = split_path(path);
        let mut params = ParamVec::new();

        if let Some(endpoint) = self.root.search(&segments, method, &mut params) {
            debug!(method = %method, path = %path, pattern = %endpoint.pattern, "Route matched");
            return RouteOutcome::Matched(RouteMatch {
                handler: endpoint.handler.clone(),
                pattern: Arc::clone(&endpoint.pattern),
                path_params: params,
            });
        }

        if let Some(allowed) = self.root.allowed_methods(&segments) {
            debug!(method = %method, path = %path, "Method not allowed");
            return RouteOutcome::MethodNotAllowed { allowed };
        }

        if let Some(kind) = self.root.unknown_action(&segments) {
            debug!(method = %method, path = %path, kind = %kind, "Unknown action");
            return RouteOutcome::UnknownAction { kind };
        }

        debug!(method = %method, path = %path, "No route matched");
        RouteOutcome::NotFound
    }

    /// Registered `(method, pattern)` pairs in insertion order.
    pub fn routes(&self) -> &[(Method, Arc<str>)] {
        &self.table
    }
}
