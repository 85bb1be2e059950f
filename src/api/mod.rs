//! # API Module
//!
//! Endpoint adapters, one file per endpoint group, plus the routing table and the
//! [`Deps`] record every adapter receives.
//!
//! An adapter is a plain function `fn(&Deps, &HandlerRequest) -> ApiResult<HandlerResponse>`:
//!
//! 1. decode the body (strict or empty-tolerant, chosen per endpoint)
//! 2. normalize input and resolve config paths against the base directory
//! 3. call one manager operation; `?` maps [`crate::managers::ManagerError`] onto the
//!    status table in [`crate::error`]
//! 4. on mutating success, emit exactly one audit [`Event`]
//! 5. return the response with the success status of the endpoint
//!
//! The method gate, 404 and `unknown <kind> action` are handled by the router before an
//! adapter ever runs.

mod access;
mod agents;
mod catalog;
mod commands;
mod compliance;
mod control;
mod events;
mod execution;
mod gitops;
mod inventory;
mod packages;
mod platform;
mod policy;
mod queue;
mod release;
mod secrets;

use crate::crypto::{SecretCipher, Signer};
use crate::dispatcher::{Adapter, Dispatcher, HandlerFn};
use crate::error::ApiResult;
use crate::events::{Event, EventBus};
use crate::managers::access::AccessManager;
use crate::managers::adhoc::AdhocExecutor;
use crate::managers::agents::AgentsManager;
use crate::managers::catalog::CatalogManager;
use crate::managers::commands::CommandsManager;
use crate::managers::compliance::ComplianceManager;
use crate::managers::control::ControlManager;
use crate::managers::execution::ExecutionManager;
use crate::managers::gitops::GitopsManager;
use crate::managers::inventory::InventoryManager;
use crate::managers::notify::{Deliverer, HttpDeliverer, NotifyManager};
use crate::managers::operations::OperationsManager;
use crate::managers::packages::PackagesManager;
use crate::managers::policy::PolicyManager;
use crate::managers::queue::QueueManager;
use crate::managers::release::ReleaseManager;
use crate::managers::secrets::SecretsManager;
use crate::managers::tenancy::TenancyManager;
use crate::middleware::{MetricsMiddleware, TracingMiddleware};
use crate::paths::resolve_config_path;
use crate::router::Router;
use crate::runtime_config::ServerConfig;
use crate::server::AppService;
use crate::store::{FsObjectStore, ObjectStore};
use anyhow::Context;
use http::Method;
use once_cell::sync::Lazy;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Everything an adapter may touch. Built once per process and shared behind an `Arc`.
pub struct Deps {
    pub config: ServerConfig,
    pub base_dir: PathBuf,
    pub events: Arc<EventBus>,
    pub metrics: Arc<MetricsMiddleware>,
    pub signer: Signer,
    pub objects: Arc<dyn ObjectStore>,
    pub queue: QueueManager,
    pub control: ControlManager,
    pub operations: OperationsManager,
    pub tenancy: TenancyManager,
    pub access: AccessManager,
    pub adhoc: AdhocExecutor,
    pub inventory: InventoryManager,
    pub agents: AgentsManager,
    pub execution: ExecutionManager,
    pub packages: PackagesManager,
    pub gitops: GitopsManager,
    pub policy: PolicyManager,
    pub secrets: SecretsManager,
    pub release: ReleaseManager,
    pub compliance: ComplianceManager,
    pub catalog: CatalogManager,
    pub commands: CommandsManager,
    pub notify: Arc<NotifyManager>,
}

impl Deps {
    /// Managers with outbound notifications over HTTP.
    pub fn new(config: ServerConfig) -> anyhow::Result<Self> {
        let deliverer = HttpDeliverer::new(Duration::from_millis(config.webhook_timeout_ms))
            .context("failed to build webhook client")?;
        Self::with_deliverer(config, Arc::new(deliverer))
    }

    /// Same as [`Deps::new`] with a caller-supplied delivery transport.
    pub fn with_deliverer(config: ServerConfig, deliverer: Arc<dyn Deliverer>) -> anyhow::Result<Self> {
        let base_dir = config.base_dir.clone();
        let cipher = SecretCipher::new(config.secret_store_key.as_deref())
            .context("invalid secret store key")?;
        let events = Arc::new(EventBus::new(config.event_bus_capacity));
        let notify = Arc::new(
            NotifyManager::new(deliverer).context("failed to start notification outbox")?,
        );
        events.add_sink(Arc::clone(&notify) as _);

        info!(
            base_dir = %base_dir.display(),
            event_bus_capacity = config.event_bus_capacity,
            secret_key_id = %cipher.key_id(),
            "control plane initialised"
        );

        Ok(Self {
            signer: Signer::new(config.signing_key.as_deref()),
            objects: Arc::new(FsObjectStore::new(&base_dir)),
            adhoc: AdhocExecutor::new(&config.adhoc_shell),
            metrics: Arc::new(MetricsMiddleware::new()),
            queue: QueueManager::new(),
            control: ControlManager::new(),
            operations: OperationsManager::new(),
            tenancy: TenancyManager::new(),
            access: AccessManager::new(),
            inventory: InventoryManager::new(),
            agents: AgentsManager::new(),
            execution: ExecutionManager::new(),
            packages: PackagesManager::new(),
            gitops: GitopsManager::new(),
            policy: PolicyManager::new(),
            secrets: SecretsManager::new(cipher),
            release: ReleaseManager::new(),
            compliance: ComplianceManager::new(),
            catalog: CatalogManager::new(),
            commands: CommandsManager::new(),
            notify,
            events,
            base_dir,
            config,
        })
    }

    /// Publish an audit event. A saturated bus is logged and never fails the request.
    pub fn emit(&self, event: Event) {
        let kind = event.kind.clone();
        if self.events.publish(event) {
            debug!(event_type = %kind, "audit event emitted");
        } else {
            warn!(event_type = %kind, "audit event not retained");
        }
    }

    /// Resolve a request-supplied config path against the base directory.
    pub fn resolve_path(&self, raw: &str) -> ApiResult<PathBuf> {
        Ok(resolve_config_path(&self.base_dir, raw)?)
    }
}

/// One row of the routing table.
#[derive(Debug, Clone)]
pub struct Route {
    pub method: Method,
    pub pattern: &'static str,
    pub adapter: Adapter,
}

/// Collects routes while the group modules register.
#[derive(Default)]
pub(crate) struct Table(Vec<Route>);

impl Table {
    pub(crate) fn add(&mut self, method: Method, pattern: &'static str, name: &'static str, call: HandlerFn) {
        self.0.push(Route {
            method,
            pattern,
            adapter: Adapter { name, call },
        });
    }

    pub(crate) fn get(&mut self, pattern: &'static str, name: &'static str, call: HandlerFn) {
        self.add(Method::GET, pattern, name, call);
    }

    pub(crate) fn post(&mut self, pattern: &'static str, name: &'static str, call: HandlerFn) {
        self.add(Method::POST, pattern, name, call);
    }

    pub(crate) fn delete(&mut self, pattern: &'static str, name: &'static str, call: HandlerFn) {
        self.add(Method::DELETE, pattern, name, call);
    }
}

static ROUTES: Lazy<Vec<Route>> = Lazy::new(|| {
    let mut table = Table::default();
    platform::register(&mut table);
    queue::register(&mut table);
    commands::register(&mut table);
    control::register(&mut table);
    catalog::register(&mut table);
    events::register(&mut table);
    access::register(&mut table);
    agents::register(&mut table);
    inventory::register(&mut table);
    execution::register(&mut table);
    gitops::register(&mut table);
    policy::register(&mut table);
    secrets::register(&mut table);
    release::register(&mut table);
    packages::register(&mut table);
    compliance::register(&mut table);
    table.0
});

/// Every registered `(method, pattern, adapter)` in registration order.
pub fn route_table() -> &'static [Route] {
    &ROUTES
}

/// Build the radix router over [`route_table`].
pub fn routes() -> Router<Adapter> {
    let mut router = Router::new();
    for route in route_table() {
        router.insert(route.method.clone(), route.pattern, route.adapter);
    }
    router
}

/// Wire `deps` into a dispatcher with the metrics and tracing middleware.
pub fn service(deps: Arc<Deps>) -> AppService {
    let metrics = Arc::clone(&deps.metrics);
    let mut dispatcher = Dispatcher::new(routes(), deps);
    dispatcher.add_middleware(Arc::clone(&metrics) as _);
    dispatcher.add_middleware(Arc::new(TracingMiddleware));
    AppService::new(Arc::new(dispatcher), metrics)
}

/// Build the complete request service from configuration.
pub fn build_service(config: ServerConfig) -> anyhow::Result<AppService> {
    let deps = Arc::new(Deps::new(config)?);
    info!(routes = route_table().len(), "routing table built");
    Ok(service(deps))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_route_table_has_no_duplicates() {
        let mut seen = HashSet::new();
        for route in route_table() {
            assert!(
                seen.insert((route.method.clone(), route.pattern)),
                "duplicate route {} {}",
                route.method,
                route.pattern
            );
        }
    }

    #[test]
    fn test_patterns_are_versioned() {
        for route in route_table() {
            assert!(route.pattern.starts_with("/v1/"), "{}", route.pattern);
        }
    }

    #[test]
    fn test_adapter_names_are_unique_per_route() {
        let names: HashSet<_> = route_table()
            .iter()
            .map(|r| (r.adapter.name, r.method.clone()))
            .collect();
        assert_eq!(names.len(), route_table().len());
    }
}
