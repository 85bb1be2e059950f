//! GitOps: environments bound to repository branches, materialization, deployments
//! (manual, webhook, reconcile), preview environments, signed plan artifacts,
//! approval gates and PR plan comments.

use super::{Deps, Table};
use crate::dispatcher::{HandlerRequest, HandlerResponse};
use crate::error::ApiResult;
use crate::events::Event;
use crate::managers::gitops::{
    ApprovalGateInput, DeploymentTrigger, GateEvaluation, GitopsEnvironmentInput, PlanArtifactInput,
    PreviewInput, PushWebhook,
};
use crate::planner::{build_plan, ConfigDocument};
use serde::Deserialize;
use serde_json::json;

pub(super) fn register(t: &mut Table) {
    t.get("/v1/gitops/environments", "list_gitops_environments", list_environments);
    t.post("/v1/gitops/environments", "create_gitops_environment", create_environment);
    t.post("/v1/gitops/environments/materialize", "materialize_environment", materialize);
    t.get("/v1/gitops/deployments", "list_deployments", list_deployments);
    t.post("/v1/gitops/deployments/trigger", "trigger_deployment", trigger_deployment);
    t.post("/v1/gitops/deployments/webhook", "deployment_webhook", deployment_webhook);
    t.post("/v1/gitops/reconcile", "reconcile_environment", reconcile);
    t.get("/v1/gitops/previews", "list_previews", list_previews);
    t.post("/v1/gitops/previews", "create_preview", create_preview);
    t.post("/v1/gitops/previews/{id}/{preview:extend|close}", "preview_action", preview_action);
    t.post("/v1/gitops/plan-artifacts/sign", "sign_plan_artifact", sign_plan);
    t.post("/v1/gitops/plan-artifacts/verify", "verify_plan_artifact", verify_plan);
    t.get("/v1/gitops/approval-gates", "list_approval_gates", list_gates);
    t.post("/v1/gitops/approval-gates", "create_approval_gate", create_gate);
    t.post("/v1/gitops/approval-gates/evaluate", "evaluate_approval_gate", evaluate_gate);
    t.post("/v1/gitops/pr-comments", "render_pr_comment", render_pr_comment);
}

fn list_environments(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&deps.gitops.list_environments(req.limit()))
}

fn create_environment(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: GitopsEnvironmentInput = req.json()?;
    let env = deps.gitops.create_environment(input)?;
    deps.emit(
        Event::new("gitops.environment.created", "gitops environment created")
            .field("environment", &env.name)
            .field("repository", &env.repository)
            .field("branch", &env.branch),
    );
    HandlerResponse::created(&env)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MaterializeInput {
    environment: String,
    config_path: String,
}

/// Without an explicit `config_path` the environment's registered one is used.
fn materialize(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: MaterializeInput = req.json()?;
    let raw = match input.config_path.trim() {
        "" => deps
            .gitops
            .list_environments(usize::MAX)
            .into_iter()
            .find(|e| e.name.eq_ignore_ascii_case(input.environment.trim()))
            .map(|e| e.config_path)
            .unwrap_or_default(),
        p => p.to_string(),
    };
    let path = deps.resolve_path(&raw)?;
    let materialized = deps.gitops.materialize(&deps.base_dir, &input.environment, &path)?;
    deps.emit(
        Event::new("gitops.environment.materialized", "environment materialized")
            .field("environment", &materialized.environment)
            .field("path", &materialized.path)
            .field("digest", &materialized.digest),
    );
    HandlerResponse::created(&materialized)
}

fn list_deployments(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let environment = req.filter_lower("environment");
    HandlerResponse::list(&deps.gitops.list_deployments(environment.as_deref(), req.limit()))
}

fn trigger_deployment(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: DeploymentTrigger = req.json()?;
    let forced = req.force_apply();
    deps.control.check_enqueue(forced)?;
    let deployment = deps
        .gitops
        .trigger(&deps.base_dir, &deps.queue, &input, forced)?;
    deps.emit(
        Event::new("gitops.deployment.triggered", "gitops deployment triggered")
            .field("deployment_id", &deployment.id)
            .field("environment", &deployment.environment)
            .field("commit", &deployment.commit)
            .field("job_id", &deployment.job_id),
    );
    HandlerResponse::accepted(&deployment)
}

/// No matching environment is a plain 200 with `matched: 0` and no gate check.
fn deployment_webhook(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let hook: PushWebhook = req.json()?;
    if deps.gitops.webhook_targets(&hook)?.is_empty() {
        return HandlerResponse::ok(&json!({ "matched": 0, "deployments": [] }));
    }
    let forced = req.force_apply();
    deps.control.check_enqueue(forced)?;
    let deployments = deps
        .gitops
        .webhook(&deps.base_dir, &deps.queue, &hook, forced)?;
    for deployment in &deployments {
        deps.emit(
            Event::new("gitops.deployment.webhook", "gitops deployment from push")
                .field("deployment_id", &deployment.id)
                .field("environment", &deployment.environment)
                .field("commit", &deployment.commit)
                .field("job_id", &deployment.job_id),
        );
    }
    HandlerResponse::accepted(&json!({ "matched": deployments.len(), "deployments": deployments }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReconcileInput {
    environment: String,
}

fn reconcile(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: ReconcileInput = req.json()?;
    let forced = req.force_apply();
    deps.control.check_enqueue(forced)?;
    let job = deps
        .gitops
        .reconcile(&deps.base_dir, &deps.queue, &input.environment, forced)?;
    deps.emit(
        Event::new("gitops.reconcile.enqueued", "gitops reconcile enqueued")
            .field("environment", input.environment.trim().to_lowercase())
            .field("job_id", &job.id),
    );
    HandlerResponse::accepted(&job)
}

fn list_previews(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&deps.gitops.list_previews(req.limit()))
}

fn create_preview(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: PreviewInput = req.json()?;
    let preview = deps.gitops.create_preview(input)?;
    deps.emit(
        Event::new("gitops.preview.created", "preview environment created")
            .field("preview_id", &preview.id)
            .field("branch", &preview.branch)
            .field("expires_at", preview.expires_at),
    );
    HandlerResponse::created(&preview)
}

fn preview_action(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let id = req.path_id("id")?;
    let preview = deps.gitops.preview_action(&id, req.action())?;
    let kind = match req.action() {
        "extend" => "gitops.preview.extended",
        _ => "gitops.preview.closed",
    };
    deps.emit(
        Event::new(kind, "preview environment updated")
            .field("preview_id", &preview.id)
            .field("status", &preview.status),
    );
    HandlerResponse::ok(&preview)
}

fn sign_plan(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: PlanArtifactInput = req.json()?;
    let artifact = deps.gitops.sign_plan(&deps.signer, &input)?;
    deps.emit(
        Event::new("gitops.plan.signed", "plan artifact signed")
            .field("artifact_id", &artifact.id)
            .field("environment", &artifact.environment)
            .field("digest", &artifact.digest)
            .field("key_id", &artifact.key_id),
    );
    HandlerResponse::created(&artifact)
}

fn verify_plan(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: PlanArtifactInput = req.json()?;
    HandlerResponse::ok(&deps.gitops.verify_plan(&deps.signer, &input)?)
}

fn list_gates(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&deps.gitops.list_gates(req.limit()))
}

fn create_gate(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: ApprovalGateInput = req.json()?;
    let gate = deps.gitops.create_gate(input)?;
    deps.emit(
        Event::new("gitops.approval_gate.created", "approval gate created")
            .field("gate_id", &gate.id)
            .field("environment", &gate.environment)
            .field("min_approvals", gate.min_approvals),
    );
    HandlerResponse::created(&gate)
}

fn evaluate_gate(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: GateEvaluation = req.json()?;
    HandlerResponse::ok(&deps.gitops.evaluate_gate(&input)?)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PrCommentInput {
    pull_request: String,
    environment: String,
    config_path: String,
}

fn render_pr_comment(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: PrCommentInput = req.json()?;
    let doc = ConfigDocument::load(&deps.resolve_path(&input.config_path)?)?;
    let plan = build_plan(&doc)?;
    let comment = deps
        .gitops
        .render_pr_comment(&input.pull_request, &input.environment, &plan)?;
    deps.emit(
        Event::new("gitops.pr_comment.rendered", "pr plan comment rendered")
            .field("comment_id", &comment.id)
            .field("pull_request", &comment.pull_request)
            .field("environment", &comment.environment),
    );
    HandlerResponse::created(&comment)
}
