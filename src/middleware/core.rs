use std::time::Duration;

use crate::dispatcher::{HandlerRequest, HandlerResponse};

/// Hook pair run by the dispatcher around every matched adapter.
pub trait Middleware: Send + Sync {
    /// Return `Some` to answer without calling the adapter.
    fn before(&self, _req: &HandlerRequest) -> Option<HandlerResponse> {
        None
    }

    fn after(&self, _req: &HandlerRequest, _res: &mut HandlerResponse, _latency: Duration) {}
}
