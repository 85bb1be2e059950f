use std::time::Duration;

use tracing::{debug, info, info_span, warn};

use super::Middleware;
use crate::dispatcher::{HandlerRequest, HandlerResponse};

/// Emits one structured line per handled request inside a `request` span.
pub struct TracingMiddleware;

impl Middleware for TracingMiddleware {
    fn before(&self, req: &HandlerRequest) -> Option<HandlerResponse> {
        debug!(
            request_id = %req.request_id,
            method = %req.method,
            path = %req.path,
            handler = %req.handler_name,
            "Request received"
        );
        None
    }

    fn after(&self, req: &HandlerRequest, res: &mut HandlerResponse, latency: Duration) {
        let span = info_span!(
            "request",
            request_id = %req.request_id,
            method = %req.method,
            pattern = %req.pattern,
            handler = %req.handler_name
        );
        let _entered = span.enter();
        let latency_ms = latency.as_millis() as u64;
        if res.status >= 500 {
            warn!(status = res.status, latency_ms, "Request failed");
        } else {
            info!(status = res.status, latency_ms, "Request completed");
        }
    }
}
