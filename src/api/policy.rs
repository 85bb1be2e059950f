//! Policy bundles with staged promotion, input resolution, simulation and signed
//! pull-mode execution.

use super::{Deps, Table};
use crate::dispatcher::{HandlerRequest, HandlerResponse};
use crate::error::ApiResult;
use crate::events::Event;
use crate::managers::policy::{
    resolve_inputs, PolicyBundleInput, PromoteInput, PullExecuteInput, PullSourceInput, ResolveInput,
    SimulateInput,
};

pub(super) fn register(t: &mut Table) {
    t.get("/v1/policy/bundles", "list_policy_bundles", list_bundles);
    t.post("/v1/policy/bundles", "create_policy_bundle", create_bundle);
    t.get("/v1/policy/bundles/{id}", "get_policy_bundle", get_bundle);
    t.post("/v1/policy/bundles/{id}/promote", "promote_policy_bundle", promote_bundle);
    t.get("/v1/policy/bundles/{id}/promotions", "list_policy_promotions", list_promotions);
    t.post("/v1/policy/inputs/resolve", "resolve_policy_inputs", resolve_policy_inputs);
    t.post("/v1/policy/simulate", "simulate_policy", simulate);
    t.get("/v1/policy/pull/sources", "list_pull_sources", list_sources);
    t.post("/v1/policy/pull/sources", "create_pull_source", create_source);
    t.post("/v1/policy/pull/execute", "execute_pull", execute_pull);
    t.get("/v1/policy/pull/results", "list_pull_results", list_results);
}

fn list_bundles(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let group = req.filter_lower("group");
    HandlerResponse::list(&deps.policy.list_bundles(group.as_deref(), req.limit()))
}

fn create_bundle(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: PolicyBundleInput = req.json()?;
    let bundle = deps.policy.create_bundle(input)?;
    deps.emit(
        Event::new("policy.bundle.created", "policy bundle created")
            .field("bundle_id", &bundle.id)
            .field("group", &bundle.group)
            .field("version", &bundle.version)
            .field("digest", &bundle.digest),
    );
    HandlerResponse::created(&bundle)
}

fn get_bundle(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::ok(&deps.policy.get_bundle(&req.path_id("id")?)?)
}

fn promote_bundle(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let id = req.path_id("id")?;
    let input: PromoteInput = req.json()?;
    let (bundle, promotion) = deps.policy.promote(&id, &input)?;
    deps.emit(
        Event::new("policy.bundle.promoted", "policy bundle promoted")
            .field("bundle_id", &bundle.id)
            .field("from", promotion.from)
            .field("to", promotion.to)
            .field("actor", &promotion.actor),
    );
    HandlerResponse::ok(&bundle)
}

fn list_promotions(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&deps.policy.promotions(&req.path_id("id")?, req.limit())?)
}

fn resolve_policy_inputs(_deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: ResolveInput = req.json()?;
    HandlerResponse::ok(&resolve_inputs(&input)?)
}

fn simulate(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: SimulateInput = req.json()?;
    HandlerResponse::ok(&deps.policy.simulate(&input)?)
}

fn list_sources(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&deps.policy.list_sources(req.limit()))
}

fn create_source(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: PullSourceInput = req.json()?;
    let source = deps.policy.create_source(input)?;
    deps.emit(
        Event::new("policy.pull.source.created", "pull source created")
            .field("source_id", &source.id)
            .field("url", &source.url)
            .field("branch", &source.branch),
    );
    HandlerResponse::created(&source)
}

/// A failed verification is recorded by the manager and surfaces as 409 with no event.
fn execute_pull(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: PullExecuteInput = req.json()?;
    let result = deps.policy.execute_pull(&deps.signer, &input)?;
    deps.emit(
        Event::new("policy.pull.executed", "signed pull executed")
            .field("pull_id", &result.id)
            .field("source_id", &result.source_id)
            .field("digest", &result.digest),
    );
    HandlerResponse::ok(&result)
}

fn list_results(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&deps.policy.list_results(req.limit()))
}
