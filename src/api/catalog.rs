//! Named catalog resources (schedules, templates, workflows, ...). One set of adapters
//! serves every kind; the kind is read from the matched route pattern.

use super::{Deps, Table};
use crate::dispatcher::{HandlerRequest, HandlerResponse};
use crate::error::{ApiError, ApiResult};
use crate::events::Event;
use crate::managers::catalog::{runbook_catalog, CatalogKind};
use crate::router::split_path;
use serde::Deserialize;
use serde_json::Value;

pub(super) fn register(t: &mut Table) {
    t.get("/v1/schedules", "list_schedules", list_items);
    t.post("/v1/schedules", "create_schedule", create_item);
    t.get("/v1/schedules/{id}", "get_schedule", get_item);
    t.get("/v1/templates", "list_templates", list_items);
    t.post("/v1/templates", "create_template", create_item);
    t.get("/v1/templates/{id}", "get_template", get_item);
    t.get("/v1/workflows", "list_workflows", list_items);
    t.post("/v1/workflows", "create_workflow", create_item);
    t.get("/v1/workflows/{id}", "get_workflow", get_item);
    t.get("/v1/associations", "list_associations", list_items);
    t.post("/v1/associations", "create_association", create_item);
    t.get("/v1/associations/{id}", "get_association", get_item);
    t.get("/v1/canaries", "list_canaries", list_items);
    t.post("/v1/canaries", "create_canary", create_item);
    t.get("/v1/canaries/{id}", "get_canary", get_item);
    t.post("/v1/canaries/{id}/results", "record_canary_result", record_canary_result);
    t.get("/v1/change-records", "list_change_records", list_items);
    t.post("/v1/change-records", "create_change_record", create_item);
    t.get("/v1/change-records/{id}", "get_change_record", get_item);
    t.post(
        "/v1/change-records/{id}/{change_record:approve|reject|complete}",
        "change_record_action",
        change_record_action,
    );
    t.get("/v1/views", "list_views", list_items);
    t.post("/v1/views", "create_view", create_item);
    t.get("/v1/views/{id}", "get_view", get_item);
    t.get("/v1/runbooks", "list_runbooks", list_items);
    t.post("/v1/runbooks", "create_runbook", create_item);
    t.get("/v1/runbooks/catalog", "runbook_catalog", list_runbook_catalog);
    t.get("/v1/runbooks/{id}", "get_runbook", get_item);
    t.get("/v1/solution-packs", "list_solution_packs", list_items);
    t.post("/v1/solution-packs", "create_solution_pack", create_item);
    t.get("/v1/solution-packs/{id}", "get_solution_pack", get_item);
    t.get("/v1/workspace-templates", "list_workspace_templates", list_items);
    t.post("/v1/workspace-templates", "create_workspace_template", create_item);
    t.get("/v1/workspace-templates/{id}", "get_workspace_template", get_item);
}

/// Kind named by the second segment of the matched pattern (`/v1/<kind>/...`).
fn kind_of(req: &HandlerRequest) -> ApiResult<CatalogKind> {
    split_path(&req.pattern)
        .get(1)
        .and_then(|segment| CatalogKind::from_segment(segment))
        .ok_or_else(|| ApiError::not_found("not found"))
}

fn list_items(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let kind = kind_of(req)?;
    HandlerResponse::list(&deps.catalog.list(kind, req.limit()))
}

fn create_item(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let kind = kind_of(req)?;
    let body: Value = req.json()?;
    let item = deps.catalog.create(kind, body)?;
    deps.emit(
        Event::new(&format!("{}.created", kind.event_prefix()), "catalog item created")
            .field("id", &item.id)
            .field("name", &item.name)
            .field("kind", kind.segment()),
    );
    HandlerResponse::created(&item)
}

fn get_item(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let kind = kind_of(req)?;
    HandlerResponse::ok(&deps.catalog.get(kind, &req.path_id("id")?)?)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CanaryResultInput {
    success: bool,
}

fn record_canary_result(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let id = req.path_id("id")?;
    let input: CanaryResultInput = req.json()?;
    let canary = deps.catalog.record_canary_result(&id, input.success)?;
    let health = canary.canary.as_ref().map(|s| s.health).unwrap_or_default();
    deps.emit(
        Event::new("canaries.result.recorded", "canary result recorded")
            .field("canary_id", &canary.id)
            .field("success", input.success)
            .field("health", health),
    );
    HandlerResponse::ok(&canary)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ActorInput {
    actor: String,
}

fn change_record_action(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let id = req.path_id("id")?;
    let input: ActorInput = req.json_or_default()?;
    let record = deps
        .catalog
        .change_record_action(&id, req.action(), &input.actor)?;
    let kind = match req.action() {
        "approve" => "change_records.approved",
        "reject" => "change_records.rejected",
        _ => "change_records.completed",
    };
    deps.emit(
        Event::new(kind, "change record updated")
            .field("change_record_id", &record.id)
            .field("status", &record.status)
            .field("actor", input.actor.trim()),
    );
    HandlerResponse::ok(&record)
}

fn list_runbook_catalog(_deps: &Deps, _req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&runbook_catalog())
}
