use dashmap::DashMap;
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::Middleware;
use crate::dispatcher::{HandlerRequest, HandlerResponse};

/// Per-route counters, keyed by `"<METHOD> <pattern>"`.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct RouteStats {
    pub requests: u64,
    pub errors: u64,
    pub total_latency_ns: u64,
}

/// Request metrics collected with atomics and concurrent maps.
///
/// The dispatcher feeds matched requests through the [`Middleware`] hooks; the
/// service layer additionally calls [`MetricsMiddleware::record_response`] for every
/// response it writes, including 404/405 answers that never reach an adapter.
pub struct MetricsMiddleware {
    request_count: AtomicUsize,
    total_latency_ns: AtomicU64,
    stack_size: AtomicUsize,
    responses: AtomicU64,
    by_status: DashMap<u16, u64>,
    by_route: DashMap<Arc<str>, RouteStats>,
}

impl Default for MetricsMiddleware {
    fn default() -> Self {
        Self {
            request_count: AtomicUsize::new(0),
            total_latency_ns: AtomicU64::new(0),
            stack_size: AtomicUsize::new(0),
            responses: AtomicU64::new(0),
            by_status: DashMap::new(),
            by_route: DashMap::new(),
        }
    }
}

impl MetricsMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests that reached an adapter
    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::Relaxed)
    }

    /// Mean adapter latency; zero before the first request.
    pub fn average_latency(&self) -> Duration {
        let count = self.request_count.load(Ordering::Relaxed) as u64;
        if count == 0 {
            Duration::from_nanos(0)
        } else {
            Duration::from_nanos(self.total_latency_ns.load(Ordering::Relaxed) / count)
        }
    }

    /// Count a written response by status.
    pub fn record_response(&self, status: u16) {
        self.responses.fetch_add(1, Ordering::Relaxed);
        *self.by_status.entry(status).or_insert(0) += 1;
    }

    pub fn response_count(&self) -> u64 {
        self.responses.load(Ordering::Relaxed)
    }

    pub fn status_count(&self, status: u16) -> u64 {
        self.by_status.get(&status).map(|v| *v).unwrap_or(0)
    }

    pub fn route_stats(&self, key: &str) -> Option<RouteStats> {
        self.by_route.get(key).map(|v| *v)
    }

    /// Structured snapshot served by `GET /v1/metrics`.
    pub fn snapshot(&self) -> Value {
        let mut statuses: Vec<(u16, u64)> =
            self.by_status.iter().map(|e| (*e.key(), *e.value())).collect();
        statuses.sort_unstable();
        let mut routes: Vec<(String, RouteStats)> = self
            .by_route
            .iter()
            .map(|e| (e.key().to_string(), *e.value()))
            .collect();
        routes.sort_by(|a, b| a.0.cmp(&b.0));

        json!({
            "requests_total": self.response_count(),
            "handled_total": self.request_count(),
            "average_latency_ms": self.average_latency().as_secs_f64() * 1000.0,
            "stack_size_bytes": self.stack_size.load(Ordering::Relaxed),
            "responses_by_status": statuses
                .iter()
                .map(|(s, c)| (s.to_string(), json!(c)))
                .collect::<serde_json::Map<String, Value>>(),
            "routes": routes
                .iter()
                .map(|(k, v)| json!({"route": k, "requests": v.requests, "errors": v.errors}))
                .collect::<Vec<_>>(),
        })
    }

    /// Prometheus text exposition of the same counters.
    pub fn render_prometheus(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# HELP masterchef_requests_total Responses written");
        let _ = writeln!(out, "# TYPE masterchef_requests_total counter");
        let _ = writeln!(out, "masterchef_requests_total {}", self.response_count());

        let _ = writeln!(out, "# HELP masterchef_responses_total Responses by status code");
        let _ = writeln!(out, "# TYPE masterchef_responses_total counter");
        let mut statuses: Vec<(u16, u64)> =
            self.by_status.iter().map(|e| (*e.key(), *e.value())).collect();
        statuses.sort_unstable();
        for (status, count) in statuses {
            let _ = writeln!(out, "masterchef_responses_total{{status=\"{status}\"}} {count}");
        }

        let _ = writeln!(out, "# HELP masterchef_request_latency_seconds Mean adapter latency");
        let _ = writeln!(out, "# TYPE masterchef_request_latency_seconds gauge");
        let _ = writeln!(
            out,
            "masterchef_request_latency_seconds {}",
            self.average_latency().as_secs_f64()
        );

        let _ = writeln!(out, "# HELP masterchef_route_requests_total Requests per route");
        let _ = writeln!(out, "# TYPE masterchef_route_requests_total counter");
        let mut routes: Vec<(String, RouteStats)> = self
            .by_route
            .iter()
            .map(|e| (e.key().to_string(), *e.value()))
            .collect();
        routes.sort_by(|a, b| a.0.cmp(&b.0));
        for (route, stats) in routes {
            let _ = writeln!(
                out,
                "masterchef_route_requests_total{{route=\"{route}\"}} {}",
                stats.requests
            );
        }
        out
    }
}

impl Middleware for MetricsMiddleware {
    fn before(&self, _req: &HandlerRequest) -> Option<HandlerResponse> {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        None
    }

    fn after(&self, req: &HandlerRequest, res: &mut HandlerResponse, latency: Duration) {
        let nanos = latency.as_nanos() as u64;
        self.total_latency_ns.fetch_add(nanos, Ordering::Relaxed);

        let key: Arc<str> = Arc::from(format!("{} {}", req.method, req.pattern));
        let mut stats = self.by_route.entry(key).or_default();
        stats.requests += 1;
        stats.total_latency_ns += nanos;
        if res.status >= 400 {
            stats.errors += 1;
        }
        drop(stats);

        if may::coroutine::is_coroutine() {
            let size = may::coroutine::current().stack_size();
            self.stack_size.store(size, Ordering::Relaxed);
        } else {
            self.stack_size
                .store(may::config().get_stack_size(), Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_response_by_status() {
        let metrics = MetricsMiddleware::new();
        metrics.record_response(200);
        metrics.record_response(200);
        metrics.record_response(405);
        assert_eq!(metrics.response_count(), 3);
        assert_eq!(metrics.status_count(200), 2);
        assert_eq!(metrics.status_count(405), 1);
        assert_eq!(metrics.status_count(500), 0);
    }

    #[test]
    fn test_prometheus_output_contains_counters() {
        let metrics = MetricsMiddleware::new();
        metrics.record_response(404);
        let text = metrics.render_prometheus();
        assert!(text.contains("masterchef_requests_total 1"));
        assert!(text.contains("masterchef_responses_total{status=\"404\"} 1"));
    }

    #[test]
    fn test_average_latency_zero_without_requests() {
        assert_eq!(MetricsMiddleware::new().average_latency(), Duration::ZERO);
    }
}
