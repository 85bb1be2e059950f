//! Radix tree over path segments.
//!
//! A pattern segment is one of:
//!
//! - a literal (`jobs`), matched exactly
//! - a parameter (`{id}`), matching any one segment
//! - an action set (`{csr:approve|reject}`), matching one of the listed words and
//!   captured under the `action` parameter; `csr` is the kind reported when a
//!   request names an action outside the set
//!
//! Lookup tries literals before action sets before parameters, and backtracks, so
//! `/v1/runbooks/catalog` wins over `/v1/runbooks/{id}`.

use http::Method;
use smallvec::SmallVec;
use std::borrow::Cow;
use std::sync::Arc;

use super::core::ParamVec;

/// Path parameter name that carries the matched action word.
pub const ACTION_PARAM: &str = "action";

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum PatternSegment {
    Literal(String),
    Param(String),
    Action { kind: String, actions: Vec<String> },
}

impl PatternSegment {
    pub(crate) fn parse(raw: &str) -> Self {
        let Some(inner) = raw.strip_prefix('{').and_then(|s| s.strip_suffix('}')) else {
            return PatternSegment::Literal(raw.to_string());
        };
        match inner.split_once(':') {
            Some((kind, actions)) => PatternSegment::Action {
                kind: kind.to_string(),
                actions: actions.split('|').map(str::to_string).collect(),
            },
            None => PatternSegment::Param(inner.to_string()),
        }
    }
}

/// Handler registered for one method at a terminal node.
#[derive(Clone)]
pub(crate) struct Endpoint<H> {
    pub method: Method,
    pub pattern: Arc<str>,
    pub handler: H,
}

#[derive(Clone)]
pub(crate) struct RadixNode<H> {
    segment: Cow<'static, str>,
    param_name: Option<Arc<str>>,
    action_kind: Option<Arc<str>>,
    actions: Vec<String>,
    endpoints: SmallVec<[Endpoint<H>; 2]>,
    children: Vec<RadixNode<H>>,
    action_children: Vec<RadixNode<H>>,
    param_children: Vec<RadixNode<H>>,
}

impl<H: Clone> RadixNode<H> {
    pub(crate) fn root() -> Self {
        Self::new(Cow::Borrowed(""))
    }

    fn new(segment: Cow<'static, str>) -> Self {
        Self {
            segment,
            param_name: None,
            action_kind: None,
            actions: Vec::new(),
            endpoints: SmallVec::new(),
            children: Vec::new(),
            action_children: Vec::new(),
            param_children: Vec::new(),
        }
    }

    pub(crate) fn insert(&mut self, segments: &[PatternSegment], endpoint: Endpoint<H>) {
        let Some((segment, remaining)) = segments.split_first() else {
            // Re-registering a method replaces the earlier handler
            self.endpoints.retain(|e| e.method != endpoint.method);
            self.endpoints.push(endpoint);
            return;
        };

        match segment {
            PatternSegment::Literal(lit) => {
                if let Some(child) = self.children.iter_mut().find(|c| c.segment == lit.as_str()) {
                    child.insert(remaining, endpoint);
                    return;
                }
                let mut child = RadixNode::new(Cow::Owned(lit.clone()));
                child.insert(remaining, endpoint);
                self.children.push(child);
            }
            PatternSegment::Param(name) => {
                if let Some(child) = self
                    .param_children
                    .iter_mut()
                    .find(|c| c.param_name.as_deref() == Some(name.as_str()))
                {
                    child.insert(remaining, endpoint);
                    return;
                }
                let mut child = RadixNode::new(Cow::Borrowed(""));
                child.param_name = Some(Arc::from(name.as_str()));
                child.insert(remaining, endpoint);
                self.param_children.push(child);
            }
            PatternSegment::Action { kind, actions } => {
                if let Some(child) = self.action_children.iter_mut().find(|c| {
                    c.action_kind.as_deref() == Some(kind.as_str()) && &c.actions == actions
                }) {
                    child.insert(remaining, endpoint);
                    return;
                }
                let mut child = RadixNode::new(Cow::Borrowed(""));
                child.action_kind = Some(Arc::from(kind.as_str()));
                child.actions = actions.clone();
                child.insert(remaining, endpoint);
                self.action_children.push(child);
            }
        }
    }

    /// Terminal endpoint for `method`, backtracking across alternatives.
    pub(crate) fn search(
        &self,
        segments: &[&str],
        method: &Method,
        params: &mut ParamVec,
    ) -> Option<&Endpoint<H>> {
        let Some((&segment, remaining)) = segments.split_first() else {
            return self.endpoints.iter().find(|e| e.method == *method);
        };

        for child in &self.children {
            if child.segment == segment {
                if let Some(found) = child.search(remaining, method, params) {
                    return Some(found);
                }
            }
        }

        for child in &self.action_children {
            if child.actions.iter().any(|a| a == segment) {
                params.push((Arc::from(ACTION_PARAM), segment.to_string()));
                if let Some(found) = child.search(remaining, method, params) {
                    return Some(found);
                }
                params.pop();
            }
        }

        for child in &self.param_children {
            if let Some(name) = &child.param_name {
                params.push((Arc::clone(name), decode_segment(segment)));
                if let Some(found) = child.search(remaining, method, params) {
                    return Some(found);
                }
                params.pop();
            }
        }

        None
    }

    /// Methods registered at the first terminal node matching `segments`, ignoring method.
    pub(crate) fn allowed_methods(&self, segments: &[&str]) -> Option<Vec<Method>> {
        let Some((&segment, remaining)) = segments.split_first() else {
            if self.endpoints.is_empty() {
                return None;
            }
            return Some(self.endpoints.iter().map(|e| e.method.clone()).collect());
        };

        self.children
            .iter()
            .filter(|c| c.segment == segment)
            .chain(
                self.action_children
                    .iter()
                    .filter(|c| c.actions.iter().any(|a| a == segment)),
            )
            .chain(self.param_children.iter())
            .find_map(|c| c.allowed_methods(remaining))
    }

    /// Kind of the first action set that rejects its segment while the rest of the
    /// path still fits the route's shape.
    pub(crate) fn unknown_action(&self, segments: &[&str]) -> Option<Arc<str>> {
        let (&segment, remaining) = segments.split_first()?;

        for child in &self.children {
            if child.segment == segment {
                if let Some(kind) = child.unknown_action(remaining) {
                    return Some(kind);
                }
            }
        }

        for child in &self.action_children {
            if child.actions.iter().any(|a| a == segment) {
                if let Some(kind) = child.unknown_action(remaining) {
                    return Some(kind);
                }
            } else if child.fits_shape(remaining) {
                return child.action_kind.clone();
            }
        }

        self.param_children
            .iter()
            .find_map(|c| c.unknown_action(remaining))
    }

    /// Whether `segments` reach a terminal node when every action set is a wildcard.
    fn fits_shape(&self, segments: &[&str]) -> bool {
        let Some((&segment, remaining)) = segments.split_first() else {
            return !self.endpoints.is_empty();
        };
        self.children
            .iter()
            .filter(|c| c.segment == segment)
            .chain(self.action_children.iter())
            .chain(self.param_children.iter())
            .any(|c| c.fits_shape(remaining))
    }
}

fn decode_segment(segment: &str) -> String {
    urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert(root: &mut RadixNode<&'static str>, method: Method, pattern: &str, handler: &'static str) {
        let segments: Vec<PatternSegment> = crate::router::split_path(pattern)
            .iter()
            .map(|s| PatternSegment::parse(s))
            .collect();
        root.insert(
            &segments,
            Endpoint {
                method,
                pattern: Arc::from(pattern),
                handler,
            },
        );
    }

    #[test]
    fn test_pattern_segment_parse() {
        assert_eq!(PatternSegment::parse("jobs"), PatternSegment::Literal("jobs".into()));
        assert_eq!(PatternSegment::parse("{id}"), PatternSegment::Param("id".into()));
        assert_eq!(
            PatternSegment::parse("{csr:approve|reject}"),
            PatternSegment::Action {
                kind: "csr".into(),
                actions: vec!["approve".into(), "reject".into()]
            }
        );
    }

    #[test]
    fn test_literal_beats_param() {
        let mut root = RadixNode::root();
        insert(&mut root, Method::GET, "/v1/runbooks/{id}", "get_runbook");
        insert(&mut root, Method::GET, "/v1/runbooks/catalog", "runbook_catalog");

        let mut params = ParamVec::new();
        let found = root
            .search(&["v1", "runbooks", "catalog"], &Method::GET, &mut params)
            .unwrap();
        assert_eq!(found.handler, "runbook_catalog");
        assert!(params.is_empty());

        let found = root
            .search(&["v1", "runbooks", "rb-1"], &Method::GET, &mut params)
            .unwrap();
        assert_eq!(found.handler, "get_runbook");
        assert_eq!(params[0].1, "rb-1");
    }

    #[test]
    fn test_action_capture_and_unknown_kind() {
        let mut root = RadixNode::root();
        insert(&mut root, Method::POST, "/v1/jobs/{id}/{job:cancel|retry}", "job_action");

        let mut params = ParamVec::new();
        let found = root
            .search(&["v1", "jobs", "j1", "retry"], &Method::POST, &mut params)
            .unwrap();
        assert_eq!(found.handler, "job_action");
        assert_eq!(params.len(), 2);
        assert_eq!(params[1].0.as_ref(), ACTION_PARAM);
        assert_eq!(params[1].1, "retry");

        assert_eq!(
            root.unknown_action(&["v1", "jobs", "j1", "explode"]).as_deref(),
            Some("job")
        );
        assert!(root.unknown_action(&["v1", "jobs", "j1", "explode", "x"]).is_none());
        assert!(root.unknown_action(&["v1", "nodes", "j1", "explode"]).is_none());
    }

    #[test]
    fn test_allowed_methods_for_shape() {
        let mut root = RadixNode::root();
        insert(&mut root, Method::GET, "/v1/access/abac/policies/{id}", "get");
        insert(&mut root, Method::DELETE, "/v1/access/abac/policies/{id}", "delete");

        let allowed = root
            .allowed_methods(&["v1", "access", "abac", "policies", "p1"])
            .unwrap();
        assert_eq!(allowed.len(), 2);
        assert!(root.allowed_methods(&["v1", "access", "abac"]).is_none());
    }

    #[test]
    fn test_param_values_are_percent_decoded() {
        let mut root = RadixNode::root();
        insert(&mut root, Method::GET, "/v1/inventory/nodes/{id}", "node");
        let mut params = ParamVec::new();
        root.search(&["v1", "inventory", "nodes", "web%2001"], &Method::GET, &mut params)
            .unwrap();
        assert_eq!(params[0].1, "web 01");
    }
}
