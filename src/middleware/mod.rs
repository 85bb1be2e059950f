//! # Middleware Module
//!
//! Hooks around adapter execution. `before` may short-circuit with a response;
//! `after` observes (and may decorate) the response together with the handler latency.
//!
//! - [`MetricsMiddleware`]: request counts, latency, per-route and per-status counters
//! - [`TracingMiddleware`]: one structured log line per handled request

mod core;
mod metrics;
mod tracing;

pub use core::Middleware;
pub use metrics::{MetricsMiddleware, RouteStats};
pub use tracing::TracingMiddleware;
