//! Execution plane: environments, scoped credentials, resource locks, admission,
//! checkpoints, snapshots, rollout plans, image bakes, artifact deployments, relays
//! and the ad-hoc command runner.

use super::{Deps, Table};
use crate::dispatcher::{HandlerRequest, HandlerResponse};
use crate::error::ApiResult;
use crate::events::Event;
use crate::managers::adhoc::AdhocRequest;
use crate::managers::execution::{
    AdmissionInput, ArtifactDeploymentInput, CheckpointInput, CredentialIssueInput,
    CredentialValidateInput, ExecEnvironmentInput, ImageBakeInput, LockInput, RelayInput,
    RolloutPlanInput, SnapshotInput,
};
use crate::planner::{build_plan, ConfigDocument};
use serde::Deserialize;
use serde_json::{json, Value};

pub(super) fn register(t: &mut Table) {
    t.get("/v1/execution/environments", "list_exec_environments", list_environments);
    t.post("/v1/execution/environments", "create_exec_environment", create_environment);
    t.get("/v1/execution/credentials", "list_credentials", list_credentials);
    t.post("/v1/execution/credentials", "issue_credential", issue_credential);
    t.post("/v1/execution/credentials/validate", "validate_credential", validate_credential);
    t.post("/v1/execution/credentials/revoke", "revoke_credential", revoke_credential);
    t.get("/v1/execution/locks", "list_locks", list_locks);
    t.post("/v1/execution/locks", "acquire_lock", acquire_lock);
    t.post("/v1/execution/admission-check", "admission_check", admission_check);
    t.post("/v1/execution/plan-preview", "plan_preview", plan_preview);
    t.get("/v1/execution/checkpoints", "list_checkpoints", list_checkpoints);
    t.post("/v1/execution/checkpoints", "create_checkpoint", create_checkpoint);
    t.post("/v1/execution/checkpoints/{id}/resume", "resume_checkpoint", resume_checkpoint);
    t.get("/v1/execution/snapshots", "list_snapshots", list_snapshots);
    t.post("/v1/execution/snapshots", "create_snapshot", create_snapshot);
    t.get("/v1/execution/patch-plans", "list_patch_plans", list_patch_plans);
    t.post("/v1/execution/patch-plans", "create_patch_plan", create_patch_plan);
    t.get("/v1/execution/reboot-plans", "list_reboot_plans", list_reboot_plans);
    t.post("/v1/execution/reboot-plans", "create_reboot_plan", create_reboot_plan);
    t.get("/v1/execution/image-bakes", "list_image_bakes", list_image_bakes);
    t.post("/v1/execution/image-bakes", "bake_image", bake_image);
    t.get("/v1/execution/artifact-deployments", "list_artifact_deployments", list_artifact_deployments);
    t.post("/v1/execution/artifact-deployments", "deploy_artifact", deploy_artifact);
    t.get("/v1/execution/relays", "list_relays", list_relays);
    t.post("/v1/execution/relays", "create_relay", create_relay);
    t.get("/v1/execution/adhoc", "list_adhoc_runs", list_adhoc_runs);
    t.post("/v1/execution/adhoc", "run_adhoc", run_adhoc);
}

fn list_environments(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&deps.execution.list_environments(req.limit()))
}

fn create_environment(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: ExecEnvironmentInput = req.json()?;
    let env = deps.execution.create_environment(input)?;
    deps.emit(
        Event::new("execution.environment.created", "execution environment created")
            .field("environment_id", &env.id)
            .field("name", &env.name)
            .field("max_parallel", env.max_parallel),
    );
    HandlerResponse::created(&env)
}

fn list_credentials(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&deps.execution.list_credentials(req.limit()))
}

/// The signed token rides along in this response only.
fn issue_credential(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: CredentialIssueInput = req.json()?;
    let (cred, token) = deps.execution.issue_credential(&deps.signer, input)?;
    deps.emit(
        Event::new("execution.credential.issued", "execution credential issued")
            .field("credential_id", &cred.id)
            .field("subject", &cred.subject)
            .field("scopes", &cred.scopes)
            .field("expires_at", cred.expires_at),
    );
    let mut body = serde_json::to_value(&cred)?;
    if let Value::Object(map) = &mut body {
        map.insert("token".to_string(), Value::String(token));
    }
    HandlerResponse::created(&body)
}

fn validate_credential(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: CredentialValidateInput = req.json()?;
    let cred = deps.execution.validate_credential(&deps.signer, &input)?;
    HandlerResponse::ok(&json!({ "valid": true, "credential": cred }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct IdInput {
    id: String,
}

fn revoke_credential(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: IdInput = req.json()?;
    let cred = deps.execution.revoke_credential(&input.id)?;
    deps.emit(
        Event::new("execution.credential.revoked", "execution credential revoked")
            .field("credential_id", &cred.id)
            .field("subject", &cred.subject),
    );
    HandlerResponse::ok(&cred)
}

fn list_locks(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&deps.execution.list_locks(req.limit()))
}

/// 201 when newly taken, 200 when the holder refreshed its own lock.
fn acquire_lock(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: LockInput = req.json()?;
    let (lock, fresh) = deps.execution.acquire_lock(input)?;
    deps.emit(
        Event::new("execution.lock.acquired", "execution lock acquired")
            .field("resource", &lock.resource)
            .field("holder", &lock.holder)
            .field("expires_at", lock.expires_at),
    );
    if fresh {
        HandlerResponse::created(&lock)
    } else {
        HandlerResponse::ok(&lock)
    }
}

fn admission_check(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let mut input: AdmissionInput = req.json()?;
    input.force = input.force || req.force_apply();
    let result = deps
        .execution
        .admission_check(&deps.control, &deps.queue, &input)?;
    HandlerResponse::ok(&result)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PathInput {
    config_path: String,
}

fn plan_preview(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: PathInput = req.json()?;
    let path = deps.resolve_path(&input.config_path)?;
    let doc = ConfigDocument::load(&path)?;
    let plan = build_plan(&doc)?;
    HandlerResponse::ok(&json!({
        "config_path": path.display().to_string(),
        "steps": plan.steps,
        "digest": plan.digest,
    }))
}

fn list_checkpoints(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&deps.execution.list_checkpoints(req.limit()))
}

fn create_checkpoint(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: CheckpointInput = req.json()?;
    let path = deps.resolve_path(&input.config_path)?;
    let cp = deps.execution.create_checkpoint(&path, input)?;
    deps.emit(
        Event::new("execution.checkpoint.created", "execution checkpoint created")
            .field("checkpoint_id", &cp.id)
            .field("config_path", &cp.config_path)
            .field("completed_steps", cp.completed_steps.len()),
    );
    HandlerResponse::created(&cp)
}

fn resume_checkpoint(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let id = req.path_id("id")?;
    let forced = req.force_apply();
    deps.control.check_enqueue(forced)?;
    let resumed = deps
        .execution
        .resume_checkpoint(&deps.base_dir, &deps.queue, &id, forced)?;
    deps.emit(
        Event::new("execution.checkpoint.resumed", "checkpoint resumed")
            .field("checkpoint_id", &resumed.checkpoint.id)
            .field("job_id", &resumed.job.id)
            .field("resume_path", &resumed.resume_path)
            .field("remaining", resumed.remaining),
    );
    HandlerResponse::accepted(&resumed)
}

fn list_snapshots(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&deps.execution.list_snapshots(req.limit()))
}

fn create_snapshot(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: SnapshotInput = req.json()?;
    let snap = deps.execution.create_snapshot(input)?;
    deps.emit(
        Event::new("execution.snapshot.created", "state snapshot created")
            .field("snapshot_id", &snap.id)
            .field("scope", &snap.scope)
            .field("digest", &snap.digest),
    );
    HandlerResponse::created(&snap)
}

fn list_patch_plans(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&deps.execution.list_patch_plans(req.limit()))
}

fn create_patch_plan(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: RolloutPlanInput = req.json()?;
    let plan = deps.execution.create_patch_plan(input)?;
    emit_rollout_plan(deps, "execution.patch_plan.created", &plan.id, plan.batches.len());
    HandlerResponse::created(&plan)
}

fn list_reboot_plans(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&deps.execution.list_reboot_plans(req.limit()))
}

fn create_reboot_plan(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: RolloutPlanInput = req.json()?;
    let plan = deps.execution.create_reboot_plan(input)?;
    emit_rollout_plan(deps, "execution.reboot_plan.created", &plan.id, plan.batches.len());
    HandlerResponse::created(&plan)
}

fn emit_rollout_plan(deps: &Deps, kind: &str, id: &str, batches: usize) {
    deps.emit(
        Event::new(kind, "rollout plan created")
            .field("plan_id", id)
            .field("batches", batches),
    );
}

fn list_image_bakes(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&deps.execution.list_image_bakes(req.limit()))
}

fn bake_image(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: ImageBakeInput = req.json()?;
    let path = deps.resolve_path(&input.config_path)?;
    let forced = req.force_apply();
    deps.control.check_enqueue(forced)?;
    let bake = deps.execution.bake_image(&deps.queue, &path, input, forced)?;
    deps.emit(
        Event::new("execution.image_bake.enqueued", "image bake enqueued")
            .field("bake_id", &bake.id)
            .field("image", &bake.image)
            .field("job_id", &bake.job_id),
    );
    HandlerResponse::accepted(&bake)
}

fn list_artifact_deployments(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&deps.execution.list_artifact_deployments(req.limit()))
}

fn deploy_artifact(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: ArtifactDeploymentInput = req.json()?;
    let path = deps.resolve_path(&input.config_path)?;
    let forced = req.force_apply();
    deps.control.check_enqueue(forced)?;
    let deployment = deps
        .execution
        .deploy_artifact(&deps.packages, &deps.queue, &path, input, forced)?;
    deps.emit(
        Event::new("execution.artifact_deployment.enqueued", "artifact deployment enqueued")
            .field("deployment_id", &deployment.id)
            .field("artifact_id", &deployment.artifact_id)
            .field("environment", &deployment.environment)
            .field("job_id", &deployment.job_id),
    );
    HandlerResponse::accepted(&deployment)
}

fn list_relays(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&deps.execution.list_relays(req.limit()))
}

fn create_relay(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: RelayInput = req.json()?;
    let relay = deps.execution.create_relay(input)?;
    deps.emit(
        Event::new("execution.relay.created", "execution relay registered")
            .field("relay_id", &relay.id)
            .field("region", &relay.region),
    );
    HandlerResponse::created(&relay)
}

fn list_adhoc_runs(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&deps.adhoc.list(req.limit()))
}

/// Runs under the request context, so a dispatcher-side cancel also kills the child.
fn run_adhoc(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: AdhocRequest = req.json()?;
    deps.control.check_emergency_stop()?;
    let result = deps.adhoc.run(&input, &req.context)?;
    deps.emit(
        Event::new("execution.adhoc.completed", "ad-hoc command finished")
            .field("adhoc_id", &result.id)
            .field("status", &result.status)
            .field("exit_code", result.exit_code)
            .field("duration_ms", result.duration_ms),
    );
    HandlerResponse::ok(&result)
}
