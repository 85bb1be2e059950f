//! Compliance profiles, scans and evidence export; host security profiles, mTLS
//! policy, FIPS validation and secret leak detection.

use super::{Deps, Table};
use crate::dispatcher::{HandlerRequest, HandlerResponse};
use crate::error::ApiResult;
use crate::events::Event;
use crate::managers::compliance::{
    FipsInput, HostProfileInput, LeakScanInput, MtlsCheckInput, MtlsPolicy, ProfileInput, ScanInput,
};

pub(super) fn register(t: &mut Table) {
    t.get("/v1/compliance/profiles", "list_compliance_profiles", list_profiles);
    t.post("/v1/compliance/profiles", "create_compliance_profile", create_profile);
    t.get("/v1/compliance/scans", "list_compliance_scans", list_scans);
    t.post("/v1/compliance/scans", "run_compliance_scan", run_scan);
    t.get("/v1/compliance/evidence/{id}/export", "export_compliance_evidence", export_evidence);
    t.get("/v1/security/host-profiles", "list_host_profiles", list_host_profiles);
    t.post("/v1/security/host-profiles", "create_host_profile", create_host_profile);
    t.get("/v1/security/mtls/policy", "get_mtls_policy", get_mtls_policy);
    t.post("/v1/security/mtls/policy", "set_mtls_policy", set_mtls_policy);
    t.post("/v1/security/mtls/check", "mtls_check", mtls_check);
    t.post("/v1/security/fips/validate", "fips_validate", fips_validate);
    t.post("/v1/security/leak-detection/scan", "leak_scan", leak_scan);
}

fn list_profiles(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&deps.compliance.list_profiles(req.limit()))
}

fn create_profile(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: ProfileInput = req.json()?;
    let profile = deps.compliance.create_profile(input)?;
    deps.emit(
        Event::new("compliance.profile.created", "compliance profile created")
            .field("profile_id", &profile.id)
            .field("framework", &profile.framework)
            .field("controls", profile.controls.len()),
    );
    HandlerResponse::created(&profile)
}

fn list_scans(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&deps.compliance.list_scans(req.limit()))
}

/// Facts come from the request; when none are given they are read from the
/// inventory node named by `node_id`.
fn run_scan(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: ScanInput = req.json()?;
    let node_id = input.node_id.trim();
    let (target, facts) = if input.facts.is_empty() && !node_id.is_empty() {
        let node = deps.inventory.get(node_id)?;
        (node.id, node.facts)
    } else if node_id.is_empty() {
        ("inline".to_string(), input.facts)
    } else {
        (node_id.to_lowercase(), input.facts)
    };
    let scan = deps.compliance.scan(&input.profile_id, &target, &facts)?;
    deps.emit(
        Event::new("compliance.scan.completed", "compliance scan completed")
            .field("scan_id", &scan.id)
            .field("profile_id", &scan.profile_id)
            .field("target", &scan.target)
            .field("score", scan.score)
            .field("failed", scan.failed),
    );
    HandlerResponse::created(&scan)
}

fn export_evidence(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let (content_type, bytes) = deps.compliance.export_evidence(&req.path_id("id")?)?;
    Ok(HandlerResponse::blob(200, content_type, bytes))
}

fn list_host_profiles(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&deps.compliance.list_host_profiles(req.limit()))
}

fn create_host_profile(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: HostProfileInput = req.json()?;
    let profile = deps.compliance.create_host_profile(input)?;
    deps.emit(
        Event::new("security.host_profile.created", "host security profile created")
            .field("profile_id", &profile.id)
            .field("os", &profile.os)
            .field("role", &profile.role),
    );
    HandlerResponse::created(&profile)
}

fn get_mtls_policy(deps: &Deps, _req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::ok(&deps.compliance.mtls_policy())
}

fn set_mtls_policy(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let policy: MtlsPolicy = req.json()?;
    let policy = deps.compliance.set_mtls_policy(policy)?;
    deps.emit(
        Event::new("security.mtls_policy.updated", "mtls policy updated")
            .field("require_client_cert", policy.require_client_cert)
            .field("min_tls_version", &policy.min_tls_version),
    );
    HandlerResponse::ok(&policy)
}

fn mtls_check(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: MtlsCheckInput = req.json()?;
    HandlerResponse::ok(&deps.compliance.mtls_check(&input)?)
}

fn fips_validate(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: FipsInput = req.json()?;
    HandlerResponse::ok(&deps.compliance.fips_validate(&input)?)
}

/// Findings name the rule and location only; matched text is never echoed.
fn leak_scan(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: LeakScanInput = req.json()?;
    HandlerResponse::ok(&deps.compliance.leak_scan(&input)?)
}
