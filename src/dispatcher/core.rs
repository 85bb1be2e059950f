//! Dispatcher core: request/response types and the dispatch entry point.

use crate::api::Deps;
use crate::codec;
use crate::error::{ApiError, ApiResult};
use crate::ids::RequestId;
use crate::middleware::Middleware;
use crate::router::{ParamVec, RouteOutcome, Router, ACTION_PARAM};
use crate::server::ParsedRequest;
use http::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use smallvec::SmallVec;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use super::context::RequestContext;

/// Maximum inline headers before heap allocation
pub const MAX_INLINE_HEADERS: usize = 16;

/// Header storage; names are `Arc<str>` so repeated names clone cheaply.
pub type HeaderVec = SmallVec<[(Arc<str>, String); MAX_INLINE_HEADERS]>;

/// Adapter signature: every endpoint is a plain function over the shared `Deps`.
pub type HandlerFn = fn(&Deps, &HandlerRequest) -> ApiResult<HandlerResponse>;

/// Routing-table entry.
#[derive(Clone, Copy)]
pub struct Adapter {
    pub name: &'static str,
    pub call: HandlerFn,
}

impl std::fmt::Debug for Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapter").field("name", &self.name).finish()
    }
}

/// A routed request as seen by an adapter.
///
/// The body stays raw; adapters pick a decode policy with [`HandlerRequest::json`]
/// or [`HandlerRequest::json_or_default`].
#[derive(Debug, Clone)]
pub struct HandlerRequest {
    pub request_id: RequestId,
    pub method: Method,
    pub path: String,
    /// Pattern of the matched route
    pub pattern: Arc<str>,
    pub handler_name: &'static str,
    pub path_params: ParamVec,
    pub query_params: ParamVec,
    pub headers: HeaderVec,
    pub body: Vec<u8>,
    pub context: RequestContext,
}

impl HandlerRequest {
    /// Path parameter by name; last occurrence wins.
    #[inline]
    #[must_use]
    pub fn get_path_param(&self, name: &str) -> Option<&str> {
        self.path_params
            .iter()
            .rfind(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }

    /// Query parameter by name; last occurrence wins (`?limit=1&limit=2` → `2`).
    #[inline]
    #[must_use]
    pub fn get_query_param(&self, name: &str) -> Option<&str> {
        self.query_params
            .iter()
            .rfind(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }

    /// Header by name (case-insensitive per RFC 7230)
    #[inline]
    #[must_use]
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Trimmed, non-empty path parameter.
    pub fn path_id(&self, name: &str) -> ApiResult<String> {
        codec::required(name, self.get_path_param(name).unwrap_or_default())
    }

    /// Matched action word for `{kind:a|b}` routes.
    pub fn action(&self) -> &str {
        self.get_path_param(ACTION_PARAM).unwrap_or_default()
    }

    /// Strict decode: empty or malformed body → 400.
    pub fn json<T: DeserializeOwned>(&self) -> ApiResult<T> {
        codec::decode_json(&self.body)
    }

    /// Empty body → zero record; malformed body → 400.
    pub fn json_or_default<T: DeserializeOwned + Default>(&self) -> ApiResult<T> {
        codec::decode_json_or_default(&self.body)
    }

    pub fn limit(&self) -> usize {
        codec::parse_limit(self.get_query_param("limit"))
    }

    /// Trimmed query filter; empty → `None`.
    pub fn filter(&self, name: &str) -> Option<String> {
        codec::filter(self.get_query_param(name))
    }

    /// Trimmed, lowercased query filter; empty → `None`.
    pub fn filter_lower(&self, name: &str) -> Option<String> {
        codec::filter_lower(self.get_query_param(name))
    }

    /// `X-Force-Apply: true` (case-insensitive value).
    pub fn force_apply(&self) -> bool {
        self.get_header("x-force-apply")
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
    }
}

/// Response payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    /// No body (405, 204)
    Empty,
    Json(Value),
    /// Opaque bytes with a producer-supplied content type
    Blob { content_type: String, bytes: Vec<u8> },
}

/// Response produced by an adapter, middleware or the dispatcher itself.
#[derive(Debug, Clone)]
pub struct HandlerResponse {
    pub status: u16,
    pub headers: HeaderVec,
    pub body: ResponseBody,
}

impl HandlerResponse {
    #[must_use]
    pub fn new(status: u16, headers: HeaderVec, body: ResponseBody) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    #[must_use]
    pub fn json(status: u16, body: Value) -> Self {
        Self::new(status, HeaderVec::new(), ResponseBody::Json(body))
    }

    /// `{"error": message}`
    #[must_use]
    pub fn error(status: u16, message: &str) -> Self {
        Self::json(status, json!({ "error": message }))
    }

    #[must_use]
    pub fn empty(status: u16) -> Self {
        Self::new(status, HeaderVec::new(), ResponseBody::Empty)
    }

    #[must_use]
    pub fn blob(status: u16, content_type: &str, bytes: Vec<u8>) -> Self {
        Self::new(
            status,
            HeaderVec::new(),
            ResponseBody::Blob {
                content_type: content_type.to_string(),
                bytes,
            },
        )
    }

    /// Serialize `value` under `status`; a serialization failure is a 500.
    pub fn with_status<T: Serialize + ?Sized>(status: u16, value: &T) -> ApiResult<Self> {
        Ok(Self::json(status, serde_json::to_value(value)?))
    }

    /// 200 read / update
    pub fn ok<T: Serialize + ?Sized>(value: &T) -> ApiResult<Self> {
        Self::with_status(200, value)
    }

    /// 201 new entity
    pub fn created<T: Serialize + ?Sized>(value: &T) -> ApiResult<Self> {
        Self::with_status(201, value)
    }

    /// 202 accepted async work
    pub fn accepted<T: Serialize + ?Sized>(value: &T) -> ApiResult<Self> {
        Self::with_status(202, value)
    }

    /// 204
    pub fn no_content() -> ApiResult<Self> {
        Ok(Self::empty(204))
    }

    /// `{count, items}` list wrapper.
    pub fn list<T: Serialize>(items: &[T]) -> ApiResult<Self> {
        Self::ok(&json!({ "count": items.len(), "items": items }))
    }

    #[inline]
    #[must_use]
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Add or replace a header (case-insensitive name).
    pub fn set_header(&mut self, name: &str, value: String) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((Arc::from(name), value));
    }

    pub fn body_json(&self) -> Option<&Value> {
        match &self.body {
            ResponseBody::Json(v) => Some(v),
            _ => None,
        }
    }
}

/// Routes parsed requests to adapters, wrapping each call in middleware and
/// panic recovery.
pub struct Dispatcher {
    router: Router<Adapter>,
    deps: Arc<Deps>,
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl Dispatcher {
    pub fn new(router: Router<Adapter>, deps: Arc<Deps>) -> Self {
        Self {
            router,
            deps,
            middlewares: Vec::new(),
        }
    }

    /// Middleware runs in insertion order for `before`, and in the same order for `after`.
    pub fn add_middleware(&mut self, mw: Arc<dyn Middleware>) {
        self.middlewares.push(mw);
    }

    pub fn router(&self) -> &Router<Adapter> {
        &self.router
    }

    pub fn deps(&self) -> &Arc<Deps> {
        &self.deps
    }

    pub fn dispatch(&self, req: ParsedRequest, request_id: RequestId) -> HandlerResponse {
        let Ok(method) = Method::from_bytes(req.method.as_bytes()) else {
            return HandlerResponse::error(400, "invalid method");
        };

        let route = match self.router.route(&method, &req.path) {
            RouteOutcome::Matched(m) => m,
            RouteOutcome::MethodNotAllowed { allowed } => {
                debug!(request_id = %request_id, method = %method, path = %req.path, allowed = ?allowed, "Method not allowed");
                return ApiError::MethodNotAllowed.into_response();
            }
            RouteOutcome::UnknownAction { kind } => {
                return HandlerResponse::error(400, &format!("unknown {kind} action"));
            }
            RouteOutcome::NotFound => {
                return HandlerResponse::error(404, "not found");
            }
        };

        let handler_req = HandlerRequest {
            request_id,
            method,
            path: req.path,
            pattern: route.pattern,
            handler_name: route.handler.name,
            path_params: route.path_params,
            query_params: req.query_params,
            headers: req.headers,
            body: req.body,
            context: req.context,
        };

        self.invoke(route.handler, &handler_req)
    }

    fn invoke(&self, adapter: Adapter, req: &HandlerRequest) -> HandlerResponse {
        for mw in &self.middlewares {
            if let Some(early) = mw.before(req) {
                return early;
            }
        }

        info!(
            request_id = %req.request_id,
            handler_name = %adapter.name,
            path_params = ?req.path_params,
            query_params = ?req.query_params,
            "Handler execution start"
        );
        let start = Instant::now();

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            (adapter.call)(&self.deps, req)
        }));

        let mut response = match outcome {
            Ok(Ok(resp)) => resp,
            Ok(Err(err)) => {
                if err.status() >= 500 {
                    warn!(request_id = %req.request_id, handler_name = %adapter.name, error = %err, "Handler failed");
                } else {
                    debug!(request_id = %req.request_id, handler_name = %adapter.name, status = err.status(), error = %err, "Handler rejected request");
                }
                err.into_response()
            }
            Err(panic) => {
                let panic_message = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(
                    request_id = %req.request_id,
                    handler_name = %adapter.name,
                    panic_message = %panic_message,
                    "Handler panicked - CRITICAL"
                );
                HandlerResponse::error(500, "internal server error")
            }
        };

        let latency = start.elapsed();
        info!(
            request_id = %req.request_id,
            handler_name = %adapter.name,
            status = response.status,
            execution_time_ms = latency.as_millis() as u64,
            "Handler execution complete"
        );

        for mw in &self.middlewares {
            mw.after(req, &mut response, latency);
        }
        response
    }
}
