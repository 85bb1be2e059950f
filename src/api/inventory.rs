//! Node inventory: enrolment and lifecycle, discovery, classification, ENC providers,
//! drift analysis and CMDB / bundle import-export.

use super::{Deps, Table};
use crate::dispatcher::{HandlerRequest, HandlerResponse};
use crate::error::ApiResult;
use crate::events::Event;
use crate::managers::inventory::{
    ClassificationRuleInput, CmdbImport, DiscoveryInput, DriftInput, EncProviderInput, InventoryBundle,
    NodeFilter, NodeInput,
};
use serde::Deserialize;
use serde_json::json;

pub(super) fn register(t: &mut Table) {
    t.get("/v1/inventory/nodes", "list_nodes", list_nodes);
    t.post("/v1/inventory/nodes", "enroll_node", enroll_node);
    t.get("/v1/inventory/nodes/{id}", "get_node", get_node);
    t.post(
        "/v1/inventory/nodes/{id}/{node:heartbeat|activate|quarantine|decommission|bootstrap}",
        "node_action",
        node_action,
    );
    t.get("/v1/inventory/discovery", "list_discoveries", list_discoveries);
    t.post("/v1/inventory/discovery", "run_discovery", run_discovery);
    t.get("/v1/inventory/classification/rules", "list_classification_rules", list_rules);
    t.post("/v1/inventory/classification/rules", "create_classification_rule", create_rule);
    t.post("/v1/inventory/classify", "classify_node", classify_node);
    t.get("/v1/inventory/enc/providers", "list_enc_providers", list_providers);
    t.post("/v1/inventory/enc/providers", "create_enc_provider", create_provider);
    t.post(
        "/v1/inventory/enc/providers/{id}/{provider:enable|disable}",
        "enc_provider_action",
        provider_action,
    );
    t.post("/v1/inventory/enc/classify", "enc_classify", enc_classify);
    t.post("/v1/inventory/drift/analyze", "analyze_drift", analyze_drift);
    t.get("/v1/inventory/drift/reports", "list_drift_reports", list_drift_reports);
    t.post("/v1/inventory/cmdb/import", "cmdb_import", cmdb_import);
    t.get("/v1/inventory/export", "export_inventory", export_inventory);
    t.post("/v1/inventory/import", "import_inventory", import_inventory);
}

fn list_nodes(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let filter = NodeFilter {
        status: req.filter_lower("status"),
        role: req.filter("role"),
        environment: req.filter("environment"),
    };
    HandlerResponse::list(&deps.inventory.list(&filter, req.limit()))
}

fn enroll_node(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: NodeInput = req.json()?;
    let node = deps.inventory.enroll(input)?;
    deps.emit(
        Event::new("inventory.node.enrolled", "node enrolled")
            .field("node_id", &node.id)
            .field("role", &node.role)
            .field("environment", &node.environment),
    );
    HandlerResponse::created(&node)
}

fn get_node(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::ok(&deps.inventory.get(&req.path_id("id")?)?)
}

fn node_action(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let id = req.path_id("id")?;
    let node = deps.inventory.transition(&id, req.action())?;
    deps.emit(
        Event::new(&format!("inventory.node.{}", req.action()), "node lifecycle transition")
            .field("node_id", &node.id)
            .field("status", node.status.as_str()),
    );
    HandlerResponse::ok(&node)
}

fn list_discoveries(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&deps.inventory.list_discoveries(req.limit()))
}

fn run_discovery(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: DiscoveryInput = req.json()?;
    let run = deps.inventory.discover(input)?;
    deps.emit(
        Event::new("inventory.discovery.completed", "discovery run completed")
            .field("discovery_id", &run.id)
            .field("source", &run.source)
            .field("discovered", run.discovered.len())
            .field("enrolled", run.enrolled),
    );
    HandlerResponse::created(&run)
}

fn list_rules(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&deps.inventory.list_rules(req.limit()))
}

fn create_rule(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: ClassificationRuleInput = req.json()?;
    let rule = deps.inventory.create_rule(input)?;
    deps.emit(
        Event::new("inventory.classification.rule.created", "classification rule created")
            .field("rule_id", &rule.id)
            .field("name", &rule.name)
            .field("classes", &rule.classes),
    );
    HandlerResponse::created(&rule)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ClassifyInput {
    node_id: String,
    action: String,
}

fn classify_node(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: ClassifyInput = req.json()?;
    let result = deps.inventory.classify(&input.node_id)?;
    deps.emit(
        Event::new("inventory.node.classified", "node classified")
            .field("node_id", &result["node_id"])
            .field("classes", &result["classes"]),
    );
    HandlerResponse::ok(&result)
}

fn list_providers(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&deps.inventory.list_providers(req.limit()))
}

fn create_provider(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: EncProviderInput = req.json()?;
    let provider = deps.inventory.create_provider(input)?;
    deps.emit(
        Event::new("inventory.enc.provider.created", "enc provider created")
            .field("provider_id", &provider.id)
            .field("name", &provider.name),
    );
    HandlerResponse::created(&provider)
}

fn provider_action(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let id = req.path_id("id")?;
    let provider = deps.inventory.set_provider_enabled(&id, req.action())?;
    deps.emit(
        Event::new(&format!("inventory.enc.provider.{}d", req.action()), "enc provider updated")
            .field("provider_id", &provider.id)
            .field("enabled", provider.enabled),
    );
    HandlerResponse::ok(&provider)
}

/// `action` is `classify` (default) or `preview`; previews emit nothing.
fn enc_classify(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: ClassifyInput = req.json()?;
    let action = match input.action.trim().to_lowercase() {
        a if a.is_empty() => "classify".to_string(),
        a => a,
    };
    let result = deps.inventory.enc_classify(&input.node_id, &action)?;
    if action == "classify" {
        deps.emit(
            Event::new("inventory.enc.classified", "enc classification applied")
                .field("node_id", &result["node_id"])
                .field("classes", &result["classes"]),
        );
    }
    HandlerResponse::ok(&result)
}

/// A breached SLO surfaces as 409 carrying the recorded report.
fn analyze_drift(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: DriftInput = req.json()?;
    let report = deps.inventory.analyze_drift(input)?;
    deps.emit(
        Event::new("inventory.drift.analyzed", "drift analyzed")
            .field("report_id", &report.id)
            .field("scope", &report.scope)
            .field("drift_percent", report.drift_percent),
    );
    HandlerResponse::ok(&report)
}

fn list_drift_reports(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&deps.inventory.list_drift_reports(req.limit()))
}

fn cmdb_import(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: CmdbImport = req.json()?;
    let result = deps.inventory.cmdb_import(input)?;
    deps.emit(
        Event::new("inventory.cmdb.imported", "cmdb records imported")
            .field("mode", &result.mode)
            .field("created", result.created)
            .field("updated", result.updated)
            .field("removed", result.removed),
    );
    HandlerResponse::ok(&result)
}

fn export_inventory(deps: &Deps, _req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::ok(&deps.inventory.export()?)
}

fn import_inventory(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let bundle: InventoryBundle = req.json()?;
    let imported = deps.inventory.import(bundle)?;
    deps.emit(Event::new("inventory.imported", "inventory bundle imported").field("nodes", imported));
    HandlerResponse::ok(&json!({ "imported": imported }))
}
