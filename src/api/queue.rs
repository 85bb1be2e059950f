//! Jobs, runs and queue control.

use super::{Deps, Table};
use crate::dispatcher::{HandlerRequest, HandlerResponse};
use crate::error::ApiResult;
use crate::events::Event;
use crate::managers::queue::{normalize_priority, stuck_age, JobRequest, RunInput};
use serde::Deserialize;
use serde_json::json;

pub(super) fn register(t: &mut Table) {
    t.get("/v1/jobs", "list_jobs", list_jobs);
    t.post("/v1/jobs", "create_job", create_job);
    t.get("/v1/jobs/{id}", "get_job", get_job);
    t.post("/v1/jobs/{id}/{job:cancel|retry}", "job_action", job_action);
    t.get("/v1/runs", "list_runs", list_runs);
    t.post("/v1/runs", "record_run", record_run);
    t.get("/v1/runs/{id}", "get_run", get_run);
    t.get("/v1/control/queue", "queue_snapshot", queue_snapshot);
    t.post("/v1/control/queue", "queue_control", queue_control);
    t.post("/v1/control/recover-stuck", "recover_stuck", recover_stuck);
}

fn list_jobs(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let status = req.filter_lower("status");
    HandlerResponse::list(&deps.queue.list(status.as_deref(), req.limit()))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct JobInput {
    config_path: String,
    priority: String,
    idempotency_key: String,
    force: bool,
}

/// Emergency stop always wins; a freeze yields only to `X-Force-Apply: true`.
fn create_job(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: JobInput = req.json()?;
    let config_path = deps.resolve_path(&input.config_path)?;
    let priority = normalize_priority(&input.priority)?;
    let forced = req.force_apply();
    deps.control.check_enqueue(forced)?;

    let (job, created) = deps.queue.enqueue(JobRequest {
        config_path: config_path.display().to_string(),
        priority,
        idempotency_key: input.idempotency_key.trim().to_string(),
        force: input.force || forced,
        source: "api".to_string(),
    })?;
    if !created {
        return HandlerResponse::ok(&job);
    }
    deps.emit(
        Event::new("queue.job.enqueued", "job enqueued")
            .field("job_id", &job.id)
            .field("config_path", &job.config_path)
            .field("priority", &job.priority)
            .field("force", job.force),
    );
    HandlerResponse::accepted(&job)
}

fn get_job(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::ok(&deps.queue.get(&req.path_id("id")?)?)
}

fn job_action(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let id = req.path_id("id")?;
    let (job, kind) = match req.action() {
        "cancel" => (deps.queue.cancel(&id)?, "queue.job.canceled"),
        _ => (deps.queue.retry(&id)?, "queue.job.retried"),
    };
    deps.emit(
        Event::new(kind, &format!("job {}", req.action()))
            .field("job_id", &job.id)
            .field("status", job.status.as_str())
            .field("attempts", job.attempts),
    );
    HandlerResponse::ok(&job)
}

fn list_runs(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let status = req.filter_lower("status");
    HandlerResponse::list(&deps.queue.list_runs(status.as_deref(), req.limit()))
}

fn record_run(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: RunInput = req.json()?;
    let run = deps.queue.record_run(input)?;
    deps.emit(
        Event::new("runs.recorded", "run recorded")
            .field("run_id", &run.id)
            .field("job_id", &run.job_id)
            .field("status", &run.status)
            .field("resources_changed", run.resources_changed),
    );
    HandlerResponse::created(&run)
}

fn get_run(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::ok(&deps.queue.get_run(&req.path_id("id")?)?)
}

fn queue_snapshot(deps: &Deps, _req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::ok(&deps.queue.snapshot())
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct QueueAction {
    action: String,
}

fn queue_control(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: QueueAction = req.json()?;
    let action = crate::codec::required_lower("action", &input.action)?;
    let (snapshot, affected) = deps.queue.control(&action)?;
    let kind = match action.as_str() {
        "pause" => "queue.paused",
        "resume" => "queue.resumed",
        _ => "queue.drained",
    };
    deps.emit(
        Event::new(kind, &format!("queue {action}"))
            .field("action", &action)
            .field("affected", affected)
            .field("pending", snapshot.pending),
    );
    HandlerResponse::ok(&json!({ "action": action, "affected": affected, "queue": snapshot }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RecoverInput {
    max_age_seconds: i64,
}

fn recover_stuck(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: RecoverInput = req.json_or_default()?;
    let max_age = stuck_age(input.max_age_seconds);
    let jobs = deps.queue.recover_stuck(max_age);
    deps.emit(
        Event::new("queue.recovered_stuck", "stuck jobs recovered")
            .field("recovered", jobs.len())
            .field("max_age_seconds", max_age),
    );
    HandlerResponse::ok(&json!({ "recovered": jobs.len(), "max_age_seconds": max_age, "jobs": jobs }))
}
