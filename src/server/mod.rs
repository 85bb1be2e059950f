//! # Server Module
//!
//! HTTP plumbing around the dispatcher:
//!
//! - [`request`]: tiny_http request → [`ParsedRequest`] (raw body, decoded query)
//! - [`service`]: [`AppService`] assigns `X-Request-ID`, serves `/healthz`, dispatches
//! - [`response`]: single-write encoding of a [`HandlerResponse`](crate::dispatcher::HandlerResponse)
//! - [`http_server`]: listener, accept loop and worker pool lifecycle

pub mod http_server;
pub mod request;
pub mod response;
pub mod service;

pub use http_server::{HttpServer, ServerHandle};
pub use request::{parse_query_params, parse_request, split_target, ParsedRequest};
pub use response::{encode, write_response, EncodedResponse, JSON_CONTENT_TYPE};
pub use service::{health_endpoint, AppService, REQUEST_ID_HEADER};
