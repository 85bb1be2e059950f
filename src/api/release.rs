//! Release engineering: readiness and contract checks, upgrade plans, performance
//! gates, test infrastructure records, blocker policy and the dependency bot.
//!
//! Gate-style endpoints answer 200 when the gate passes and 409 with the evaluation
//! when it does not.

use super::{Deps, Table};
use crate::dispatcher::{HandlerRequest, HandlerResponse};
use crate::error::ApiResult;
use crate::events::Event;
use crate::managers::release::{
    ApiContractInput, BlockerPolicy, DependencyBotPolicy, DependencyUpdatesInput, EphemeralInput,
    FlakeInput, HarnessRunInput, MigrationTestInput, MutationTestInput, PerformancePolicy,
    PerformanceSample, ReadinessInput, UpgradeInput,
};
use serde_json::json;

pub(super) fn register(t: &mut Table) {
    t.post("/v1/release/readiness", "release_readiness", readiness);
    t.post("/v1/release/api-contract", "api_contract_check", api_contract);
    t.post("/v1/release/upgrade-assistant", "upgrade_assistant", upgrade_assistant);
    t.get("/v1/release/performance-gates/policy", "get_performance_policy", get_performance_policy);
    t.post("/v1/release/performance-gates/policy", "set_performance_policy", set_performance_policy);
    t.post("/v1/release/performance-gates/evaluate", "evaluate_performance_gate", evaluate_performance);
    t.get("/v1/release/performance-gates/evaluations", "list_performance_evaluations", list_evaluations);
    t.get("/v1/release/tests/flake-quarantine", "list_flake_quarantine", list_quarantined);
    t.post("/v1/release/tests/flake-quarantine", "quarantine_flaky_test", quarantine);
    t.get("/v1/release/tests/harness-runs", "list_harness_runs", list_harness_runs);
    t.post("/v1/release/tests/harness-runs", "record_harness_run", record_harness_run);
    t.post("/v1/release/tests/ephemeral-environments", "create_ephemeral_environment", create_ephemeral);
    t.post("/v1/release/tests/migration", "migration_test", migration_test);
    t.post("/v1/release/tests/mutation", "mutation_test", mutation_test);
    t.get("/v1/release/blocker-policy", "get_blocker_policy", get_blocker_policy);
    t.post("/v1/release/blocker-policy", "set_blocker_policy", set_blocker_policy);
    t.get("/v1/release/dependency-bot/policy", "get_dependency_bot_policy", get_bot_policy);
    t.post("/v1/release/dependency-bot/policy", "set_dependency_bot_policy", set_bot_policy);
    t.post("/v1/release/dependency-bot/updates", "propose_dependency_updates", propose_updates);
}

fn readiness(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: ReadinessInput = req.json()?;
    let result = deps.release.readiness(&input)?;
    deps.emit(
        Event::new("release.readiness.passed", "release readiness passed")
            .field("release", input.release.trim()),
    );
    HandlerResponse::ok(&result)
}

fn api_contract(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: ApiContractInput = req.json()?;
    HandlerResponse::ok(&deps.release.api_contract(&input)?)
}

fn upgrade_assistant(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: UpgradeInput = req.json()?;
    HandlerResponse::ok(&deps.release.upgrade_plan(&input)?)
}

fn get_performance_policy(deps: &Deps, _req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::ok(&deps.release.performance_policy())
}

fn set_performance_policy(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let policy: PerformancePolicy = req.json()?;
    let policy = deps.release.set_performance_policy(policy)?;
    deps.emit(
        Event::new("release.performance_policy.updated", "performance gate policy updated")
            .field("policy", &policy),
    );
    HandlerResponse::ok(&policy)
}

fn evaluate_performance(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let sample: PerformanceSample = req.json()?;
    let evaluation = deps.release.evaluate_performance(&sample)?;
    deps.emit(
        Event::new("release.performance_gate.passed", "performance gate passed")
            .field("evaluation_id", &evaluation.id)
            .field("name", &evaluation.name),
    );
    HandlerResponse::ok(&evaluation)
}

fn list_evaluations(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&deps.release.list_evaluations(req.limit()))
}

fn list_quarantined(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&deps.release.list_quarantined(req.limit()))
}

fn quarantine(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: FlakeInput = req.json()?;
    let entry = deps.release.quarantine(input)?;
    deps.emit(
        Event::new("release.test.quarantined", "flaky test quarantined")
            .field("quarantine_id", &entry.id)
            .field("test_name", &entry.test_name)
            .field("expires_at", entry.expires_at),
    );
    HandlerResponse::created(&entry)
}

fn list_harness_runs(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&deps.release.list_harness_runs(req.limit()))
}

fn record_harness_run(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: HarnessRunInput = req.json()?;
    let run = deps.release.record_harness_run(input)?;
    deps.emit(
        Event::new("release.harness_run.recorded", "test harness run recorded")
            .field("run_id", &run.id)
            .field("suite", &run.suite)
            .field("status", run.status)
            .field("pass_rate", run.pass_rate),
    );
    HandlerResponse::created(&run)
}

fn create_ephemeral(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: EphemeralInput = req.json()?;
    let env = deps.release.create_ephemeral(input)?;
    deps.emit(
        Event::new("release.ephemeral_environment.created", "ephemeral test environment created")
            .field("environment_id", &env.id)
            .field("branch", &env.branch)
            .field("expires_at", env.expires_at),
    );
    HandlerResponse::created(&env)
}

fn migration_test(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: MigrationTestInput = req.json()?;
    HandlerResponse::ok(&deps.release.migration_test(&input)?)
}

fn mutation_test(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: MutationTestInput = req.json()?;
    HandlerResponse::ok(&deps.release.mutation_test(&input)?)
}

fn get_blocker_policy(deps: &Deps, _req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::ok(&deps.release.blocker_policy())
}

fn set_blocker_policy(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let policy: BlockerPolicy = req.json()?;
    let policy = deps.release.set_blocker_policy(policy);
    deps.emit(
        Event::new("release.blocker_policy.updated", "release blocker policy updated")
            .field("max_open_blockers", policy.max_open_blockers)
            .field("blocking_labels", &policy.blocking_labels),
    );
    HandlerResponse::ok(&policy)
}

fn get_bot_policy(deps: &Deps, _req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::ok(&deps.release.bot_policy())
}

fn set_bot_policy(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let policy: DependencyBotPolicy = req.json()?;
    let policy = deps.release.set_bot_policy(policy)?;
    deps.emit(
        Event::new("release.dependency_bot.policy.updated", "dependency bot policy updated")
            .field("allowed_update_types", &policy.allowed_update_types)
            .field("max_open_updates", policy.max_open_updates),
    );
    HandlerResponse::ok(&policy)
}

fn propose_updates(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: DependencyUpdatesInput = req.json()?;
    let updates = deps.release.propose_updates(&input)?;
    deps.emit(
        Event::new("release.dependency_bot.updates.proposed", "dependency updates proposed")
            .field("count", updates.len()),
    );
    HandlerResponse::created(&json!({ "count": updates.len(), "items": updates }))
}
