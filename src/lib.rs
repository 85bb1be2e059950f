//! # masterchef
//!
//! **masterchef** is the HTTP control plane of a configuration-management orchestrator. It
//! exposes a JSON API over a coroutine worker pool (`may`) and turns every request into exactly
//! one call on an in-process domain manager: enqueue a run, promote a policy bundle, approve a
//! certificate, resolve a secret, evaluate a release gate.
//!
//! ## Overview
//!
//! Each endpoint is a small *adapter* that decodes and normalizes the request, calls one named
//! manager operation, maps the outcome onto the canonical status table, and publishes an audit
//! event on mutating success. Adapters are plain functions registered in one routing table, so
//! the whole surface is visible in [`api::route_table`] and printable with `masterchef routes`.
//!
//! ## Architecture
//!
//! - **[`router`]** - Path tokenizer and radix routing table with literal, `{param}` and
//!   `{kind:a|b}` action segments
//! - **[`dispatcher`]** - `HandlerRequest` / `HandlerResponse`, middleware chain, panic recovery
//! - **[`server`]** - Request parsing, single-write responses, `/healthz`, `HttpServer` over [`worker_pool`]
//! - **[`middleware`]** - Metrics (counters by status) and tracing middleware
//! - **[`api`]** - Endpoint adapters, one module per group, plus the shared `Deps` record
//! - **[`managers`]** - Domain services (queue, control, access, agents, inventory, execution,
//!   gitops, policy, secrets, release, packages, compliance, tenancy, catalog, commands, notify)
//! - **[`events`]** - Bounded, lossy-on-saturation audit event bus with alert and delivery sinks
//! - **[`error`]** - `ApiError` and the status mapping; [`codec`] for body and query decoding
//! - **[`paths`]**, **[`store`]**, **[`planner`]**, **[`crypto`]** - Filesystem state, plan
//!   building, signatures and secret envelopes
//! - **[`runtime_config`]**, **[`logging`]**, **[`ids`]**, **[`cli`]** - Ambient plumbing
//!
//! ### Request Flow
//!
//! ```mermaid
//! sequenceDiagram
//!     participant Client
//!     participant Server as HttpServer<br/>(tiny_http + worker pool)
//!     participant Service as AppService
//!     participant Dispatcher
//!     participant Router
//!     participant Adapter as api::* adapter
//!     participant Manager as managers::*
//!     participant Bus as EventBus
//!
//!     Client->>Server: POST /v1/jobs
//!     Server->>Service: ParsedRequest
//!     Service->>Service: X-Request-ID, /healthz
//!     Service->>Dispatcher: dispatch(req, request_id)
//!     Dispatcher->>Router: route(method, path)
//!     Router-->>Dispatcher: adapter + path params (or 404 / 405 / 400)
//!     Dispatcher->>Adapter: call(deps, HandlerRequest)
//!     Adapter->>Manager: one named operation
//!     Manager-->>Adapter: Ok(entity) / ManagerError
//!     Adapter->>Bus: emit(Event) on mutating success
//!     Adapter-->>Dispatcher: HandlerResponse
//!     Dispatcher-->>Service: response (middleware after)
//!     Service-->>Server: single write
//!     Server-->>Client: status + JSON + X-Request-ID
//! ```
//!
//! ## Embedding
//!
//! ```no_run
//! use masterchef::runtime_config::ServerConfig;
//! use masterchef::server::HttpServer;
//! use masterchef::worker_pool::WorkerPoolConfig;
//!
//! let config = ServerConfig::load(None).expect("config");
//! let service = masterchef::api::build_service(config).expect("service");
//! let handle = HttpServer(service)
//!     .start("127.0.0.1:8080", WorkerPoolConfig::default())
//!     .expect("bind");
//! handle.wait_ready().expect("ready");
//! handle.stop();
//! ```

pub mod api;
pub mod cli;
pub mod codec;
pub mod crypto;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod ids;
pub mod logging;
pub mod managers;
pub mod middleware;
pub mod paths;
pub mod planner;
pub mod router;
pub mod runtime_config;
pub mod server;
pub mod store;
pub mod worker_pool;

pub use api::{build_service, Deps};
pub use error::{ApiError, ApiResult};
pub use runtime_config::ServerConfig;
