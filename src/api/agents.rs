//! Agent plane: check-ins, PKI (CSRs and certificates), job dispatch to nodes and
//! per-node catalog compilation.

use super::{Deps, Table};
use crate::dispatcher::{HandlerRequest, HandlerResponse};
use crate::error::{ApiError, ApiResult};
use crate::events::Event;
use crate::managers::agents::{CheckinInput, CsrInput, DispatchInput};
use crate::managers::queue::normalize_priority;
use crate::planner::ConfigDocument;
use serde::Deserialize;
use serde_json::{json, Value};

pub(super) fn register(t: &mut Table) {
    t.get("/v1/agents/checkins", "list_checkins", list_checkins);
    t.post("/v1/agents/checkins", "record_checkin", record_checkin);
    t.get("/v1/agents/pki/csrs", "list_csrs", list_csrs);
    t.post("/v1/agents/pki/csrs", "submit_csr", submit_csr);
    t.post("/v1/agents/pki/csrs/{id}/{csr:approve|reject}", "csr_action", csr_action);
    t.get("/v1/agents/pki/certificates", "list_certificates", list_certificates);
    t.post(
        "/v1/agents/pki/certificates/{id}/{certificate:rotate|revoke}",
        "certificate_action",
        certificate_action,
    );
    t.get("/v1/agents/dispatch", "list_dispatches", list_dispatches);
    t.post("/v1/agents/dispatch", "dispatch_job", dispatch_job);
    t.get("/v1/agents/catalogs", "list_catalogs", list_catalogs);
    t.post("/v1/agents/catalogs", "compile_catalog", compile_catalog);
}

fn list_checkins(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&deps.agents.list_checkins(req.limit()))
}

fn record_checkin(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: CheckinInput = req.json()?;
    let checkin = deps.agents.checkin(input)?;
    deps.emit(
        Event::new("agents.checkin.recorded", "agent checked in")
            .field("node_id", &checkin.id)
            .field("agent_version", &checkin.agent_version)
            .field("status", &checkin.status)
            .field("checkins", checkin.checkins),
    );
    HandlerResponse::ok(&checkin)
}

fn list_csrs(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let status = req.filter_lower("status");
    HandlerResponse::list(&deps.agents.list_csrs(status.as_deref(), req.limit()))
}

fn submit_csr(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: CsrInput = req.json()?;
    let csr = deps.agents.submit_csr(input)?;
    deps.emit(
        Event::new("agents.pki.csr.submitted", "certificate signing request submitted")
            .field("csr_id", &csr.id)
            .field("node_id", &csr.node_id)
            .field("common_name", &csr.common_name),
    );
    HandlerResponse::created(&csr)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ActorInput {
    actor: String,
}

fn csr_action(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let id = req.path_id("id")?;
    let input: ActorInput = req.json_or_default()?;
    let (csr, certificate) = deps.agents.decide_csr(&id, req.action(), &input.actor)?;
    let kind = match req.action() {
        "approve" => "agents.pki.csr.approved",
        _ => "agents.pki.csr.rejected",
    };
    deps.emit(
        Event::new(kind, "certificate signing request decided")
            .field("csr_id", &csr.id)
            .field("node_id", &csr.node_id)
            .field("certificate_id", &csr.certificate_id),
    );
    HandlerResponse::ok(&json!({ "csr": csr, "certificate": certificate }))
}

fn list_certificates(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let status = req.filter_lower("status");
    HandlerResponse::list(&deps.agents.list_certificates(status.as_deref(), req.limit()))
}

/// `rotate` answers with the replacement certificate, `revoke` with the revoked one.
fn certificate_action(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let id = req.path_id("id")?;
    let cert = deps.agents.certificate_action(&id, req.action())?;
    let kind = match req.action() {
        "rotate" => "agents.pki.certificate.rotated",
        _ => "agents.pki.certificate.revoked",
    };
    deps.emit(
        Event::new(kind, "certificate updated")
            .field("certificate_id", &cert.id)
            .field("node_id", &cert.node_id)
            .field("replaces", &cert.replaces)
            .field("status", cert.status),
    );
    HandlerResponse::ok(&cert)
}

fn list_dispatches(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&deps.agents.list_dispatches(req.limit()))
}

fn dispatch_job(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: DispatchInput = req.json()?;
    let config_path = deps.resolve_path(&input.config_path)?;
    let priority = normalize_priority(&input.priority)?;
    let forced = req.force_apply();
    deps.control.check_enqueue(forced)?;

    let (dispatch, job) = deps.agents.dispatch(
        &deps.inventory,
        &deps.queue,
        DispatchInput {
            node_id: input.node_id,
            config_path: config_path.display().to_string(),
            priority,
        },
        forced,
    )?;
    deps.emit(
        Event::new("agents.dispatch.created", "job dispatched to node")
            .field("dispatch_id", &dispatch.id)
            .field("node_id", &dispatch.node_id)
            .field("job_id", &job.id)
            .field("config_path", &job.config_path),
    );
    HandlerResponse::accepted(&json!({ "dispatch": dispatch, "job": job }))
}

fn list_catalogs(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&deps.agents.list_catalogs(req.limit()))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CatalogInput {
    node_id: String,
    config_path: String,
    document: Option<Value>,
}

/// Compile from an inline `document`, or from `config_path` under the base directory.
fn compile_catalog(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: CatalogInput = req.json()?;
    let doc = match input.document {
        Some(document) => ConfigDocument::from_value(document)?,
        None if !input.config_path.trim().is_empty() => {
            ConfigDocument::load(&deps.resolve_path(&input.config_path)?)?
        }
        None => return Err(ApiError::bad_request("document or config_path is required")),
    };
    let catalog = deps.agents.compile_catalog(&input.node_id, &doc)?;
    deps.emit(
        Event::new("agents.catalog.compiled", "node catalog compiled")
            .field("catalog_id", &catalog.id)
            .field("node_id", &catalog.node_id)
            .field("resources", catalog.resource_count)
            .field("digest", &catalog.digest),
    );
    HandlerResponse::created(&catalog)
}
