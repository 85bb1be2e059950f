use crate::dispatcher::{Dispatcher, HandlerResponse};
use crate::ids::RequestId;
use crate::middleware::MetricsMiddleware;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use super::request::ParsedRequest;

pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// Transport-independent request entry point.
///
/// Assigns the request id, answers `GET /healthz`, forwards everything else to
/// the [`Dispatcher`], stamps `X-Request-ID` and counts the response.
#[derive(Clone)]
pub struct AppService {
    dispatcher: Arc<Dispatcher>,
    metrics: Arc<MetricsMiddleware>,
}

impl AppService {
    pub fn new(dispatcher: Arc<Dispatcher>, metrics: Arc<MetricsMiddleware>) -> Self {
        Self {
            dispatcher,
            metrics,
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn metrics(&self) -> &Arc<MetricsMiddleware> {
        &self.metrics
    }

    pub fn handle(&self, req: ParsedRequest) -> HandlerResponse {
        let request_id = RequestId::from_header_or_new(req.get_header(REQUEST_ID_HEADER));
        let start = Instant::now();
        let method = req.method.clone();
        let path = req.path.clone();

        let mut response = if path == "/healthz" {
            health_endpoint(&req)
        } else {
            self.dispatcher.dispatch(req, request_id)
        };

        response.set_header(REQUEST_ID_HEADER, request_id.to_string());
        self.metrics.record_response(response.status);

        let latency_ms = start.elapsed().as_millis() as u64;
        if response.status >= 500 {
            info!(request_id = %request_id, method = %method, path = %path, status = response.status, latency_ms, "Request served with server error");
        } else {
            debug!(request_id = %request_id, method = %method, path = %path, status = response.status, latency_ms, "Request served");
        }
        response
    }
}

/// `GET /healthz` → `{"status":"ok"}`; other methods → 405.
pub fn health_endpoint(req: &ParsedRequest) -> HandlerResponse {
    if req.method != "GET" {
        return HandlerResponse::empty(405);
    }
    HandlerResponse::json(200, json!({ "status": "ok" }))
}
