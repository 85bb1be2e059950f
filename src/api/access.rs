//! Access control: ABAC policies, RBAC roles and bindings, JIT grants, break-glass
//! requests, delegated administration and approval policies.
//!
//! `check` endpoints answer 200 on allow and 403 with the decision object on deny.

use super::{Deps, Table};
use crate::dispatcher::{HandlerRequest, HandlerResponse};
use crate::error::{ApiError, ApiResult};
use crate::events::Event;
use crate::managers::access::{
    AbacCheck, AbacPolicyInput, ApprovalEvaluation, ApprovalPolicyInput, DelegationInput,
    JitGrantInput, Permission,
};
use serde::Deserialize;
use serde_json::json;

pub(super) fn register(t: &mut Table) {
    t.get("/v1/access/abac/policies", "list_abac_policies", list_abac_policies);
    t.post("/v1/access/abac/policies", "create_abac_policy", create_abac_policy);
    t.get("/v1/access/abac/policies/{id}", "get_abac_policy", get_abac_policy);
    t.delete("/v1/access/abac/policies/{id}", "delete_abac_policy", delete_abac_policy);
    t.post("/v1/access/abac/check", "abac_check", abac_check);
    t.get("/v1/access/rbac/roles", "list_roles", list_roles);
    t.post("/v1/access/rbac/roles", "create_role", create_role);
    t.get("/v1/access/rbac/bindings", "list_bindings", list_bindings);
    t.post("/v1/access/rbac/bindings", "create_binding", create_binding);
    t.post("/v1/access/rbac/check", "rbac_check", rbac_check);
    t.get("/v1/access/jit-grants", "list_jit_grants", list_jit_grants);
    t.post("/v1/access/jit-grants", "issue_jit_grant", issue_jit_grant);
    t.post("/v1/access/jit-grants/validate", "validate_jit_grant", validate_jit_grant);
    t.post("/v1/access/jit-grants/revoke", "revoke_jit_grant", revoke_jit_grant);
    t.get("/v1/access/break-glass/requests", "list_break_glass", list_break_glass);
    t.post("/v1/access/break-glass/requests", "request_break_glass", request_break_glass);
    t.post(
        "/v1/access/break-glass/requests/{id}/{break_glass:approve|reject|revoke}",
        "break_glass_action",
        break_glass_action,
    );
    t.get("/v1/access/delegations", "list_delegations", list_delegations);
    t.post("/v1/access/delegations", "create_delegation", create_delegation);
    t.get("/v1/access/approval-policies", "list_approval_policies", list_approval_policies);
    t.post("/v1/access/approval-policies", "create_approval_policy", create_approval_policy);
    t.post("/v1/access/approval-policies/evaluate", "evaluate_approval_policy", evaluate_approval_policy);
}

fn list_abac_policies(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&deps.access.list_abac_policies(req.limit()))
}

fn create_abac_policy(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: AbacPolicyInput = req.json()?;
    let policy = deps.access.create_abac_policy(input)?;
    deps.emit(
        Event::new("access.abac.policy.created", "abac policy created")
            .field("policy_id", &policy.id)
            .field("name", &policy.name)
            .field("effect", policy.effect)
            .field("subject", &policy.subject)
            .field("priority", policy.priority),
    );
    HandlerResponse::created(&policy)
}

fn get_abac_policy(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::ok(&deps.access.get_abac_policy(&req.path_id("id")?)?)
}

fn delete_abac_policy(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let policy = deps.access.delete_abac_policy(&req.path_id("id")?)?;
    deps.emit(
        Event::new("access.abac.policy.deleted", "abac policy deleted")
            .field("policy_id", &policy.id)
            .field("name", &policy.name),
    );
    HandlerResponse::no_content()
}

fn abac_check(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: AbacCheck = req.json()?;
    let (decision, allowed) = deps.access.check_abac(&input);
    if allowed {
        HandlerResponse::ok(&decision)
    } else {
        Err(ApiError::forbidden("access denied", decision))
    }
}

fn list_roles(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&deps.access.list_roles(req.limit()))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RoleInput {
    name: String,
    permissions: Vec<Permission>,
}

fn create_role(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: RoleInput = req.json()?;
    let role = deps.access.create_role(&input.name, input.permissions)?;
    deps.emit(
        Event::new("access.rbac.role.created", "rbac role created")
            .field("role_id", &role.id)
            .field("name", &role.name)
            .field("permissions", role.permissions.len()),
    );
    HandlerResponse::created(&role)
}

fn list_bindings(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&deps.access.list_bindings(req.limit()))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BindingInput {
    role: String,
    subject: String,
}

fn create_binding(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: BindingInput = req.json()?;
    let binding = deps.access.create_binding(&input.role, &input.subject)?;
    deps.emit(
        Event::new("access.rbac.binding.created", "rbac binding created")
            .field("binding_id", &binding.id)
            .field("role", &binding.role)
            .field("subject", &binding.subject),
    );
    HandlerResponse::created(&binding)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RbacCheckInput {
    subject: String,
    resource: String,
    action: String,
}

fn rbac_check(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: RbacCheckInput = req.json()?;
    let subject = crate::codec::required("subject", &input.subject)?;
    let (decision, allowed) = deps.access.check_rbac(&subject, &input.resource, &input.action);
    if allowed {
        HandlerResponse::ok(&decision)
    } else {
        Err(ApiError::forbidden("access denied", decision))
    }
}

fn list_jit_grants(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&deps.access.list_grants(req.limit()))
}

/// The token appears once, in this response; never in the event or in list views.
fn issue_jit_grant(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: JitGrantInput = req.json()?;
    let grant = deps.access.issue_grant(input)?;
    deps.emit(
        Event::new("access.jit.grant.issued", "jit grant issued")
            .field("grant_id", &grant.id)
            .field("subject", &grant.subject)
            .field("resource", &grant.resource)
            .field("action", &grant.action)
            .field("expires_at", grant.expires_at),
    );
    HandlerResponse::created(&grant)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GrantValidation {
    token: String,
    resource: String,
    action: String,
}

fn validate_jit_grant(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: GrantValidation = req.json()?;
    let grant = deps
        .access
        .validate_grant(&input.token, &input.resource, &input.action)?;
    HandlerResponse::ok(&json!({ "valid": true, "grant": grant }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct IdInput {
    id: String,
}

fn revoke_jit_grant(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: IdInput = req.json()?;
    let grant = deps.access.revoke_grant(&input.id)?;
    deps.emit(
        Event::new("access.jit.grant.revoked", "jit grant revoked")
            .field("grant_id", &grant.id)
            .field("subject", &grant.subject),
    );
    HandlerResponse::ok(&grant)
}

fn list_break_glass(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&deps.access.list_break_glass(req.limit()))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BreakGlassInput {
    requester: String,
    reason: String,
    scope: String,
}

fn request_break_glass(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: BreakGlassInput = req.json()?;
    let request = deps
        .access
        .request_break_glass(&input.requester, &input.reason, &input.scope)?;
    deps.emit(
        Event::new("access.break_glass.requested", "break-glass access requested")
            .field("request_id", &request.id)
            .field("requester", &request.requester)
            .field("scope", &request.scope),
    );
    HandlerResponse::created(&request)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DecisionInput {
    actor: String,
    ttl_minutes: i64,
}

fn break_glass_action(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let id = req.path_id("id")?;
    let input: DecisionInput = req.json_or_default()?;
    let request = deps
        .access
        .decide_break_glass(&id, req.action(), &input.actor, input.ttl_minutes)?;
    let kind = match req.action() {
        "approve" => "access.break_glass.approved",
        "reject" => "access.break_glass.rejected",
        _ => "access.break_glass.revoked",
    };
    deps.emit(
        Event::new(kind, "break-glass request decided")
            .field("request_id", &request.id)
            .field("status", request.status)
            .field("decided_by", &request.decided_by),
    );
    HandlerResponse::ok(&request)
}

fn list_delegations(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&deps.access.list_delegations(req.limit()))
}

fn create_delegation(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: DelegationInput = req.json()?;
    let delegation = deps.access.create_delegation(input)?;
    deps.emit(
        Event::new("access.delegation.created", "admin delegation created")
            .field("delegation_id", &delegation.id)
            .field("delegate", &delegation.delegate)
            .field("scope", &delegation.scope),
    );
    HandlerResponse::created(&delegation)
}

fn list_approval_policies(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&deps.access.list_approval_policies(req.limit()))
}

fn create_approval_policy(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: ApprovalPolicyInput = req.json()?;
    let policy = deps.access.create_approval_policy(input)?;
    deps.emit(
        Event::new("access.approval_policy.created", "approval policy created")
            .field("policy_id", &policy.id)
            .field("environment", &policy.environment)
            .field("min_approvals", policy.min_approvals),
    );
    HandlerResponse::created(&policy)
}

fn evaluate_approval_policy(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: ApprovalEvaluation = req.json()?;
    HandlerResponse::ok(&deps.access.evaluate_approvals(&input)?)
}
