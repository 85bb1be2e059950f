//! # Dispatcher Module
//!
//! Turns a parsed request into a response:
//!
//! 1. resolve the route (404 / 405 with empty body / 400 `unknown <kind> action`)
//! 2. run middleware `before` hooks; any of them may short-circuit
//! 3. call the adapter inside `catch_unwind`; a panic becomes a 500
//! 4. run middleware `after` hooks
//!
//! Adapters are plain functions `fn(&Deps, &HandlerRequest) -> ApiResult<HandlerResponse>`;
//! they never write to the transport themselves.

mod context;
mod core;

pub use context::RequestContext;
pub use core::{
    Adapter, Dispatcher, HandlerFn, HandlerRequest, HandlerResponse, HeaderVec, ResponseBody,
    MAX_INLINE_HEADERS,
};
