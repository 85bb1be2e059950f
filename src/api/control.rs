//! Operational levers under `/v1/control`: emergency stop, change freeze, maintenance,
//! capacity, backups, drills, runbook hygiene, tenants and federation.

use super::{Deps, Table};
use crate::dispatcher::{HandlerRequest, HandlerResponse};
use crate::error::ApiResult;
use crate::events::Event;
use crate::managers::operations::{
    topology_advice, DeploymentProfileInput, FailoverDrillInput, HandoffInput, ProfileEvaluation,
    ScaleProfileInput, TopologyInput,
};
use crate::managers::queue::{Job, Run};
use crate::managers::tenancy::{AdmitRequest, TenantPolicyInput};
use crate::managers::ManagerError;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

pub(super) fn register(t: &mut Table) {
    t.get("/v1/control/emergency-stop", "get_emergency_stop", get_emergency_stop);
    t.post("/v1/control/emergency-stop", "set_emergency_stop", set_emergency_stop);
    t.get("/v1/control/freeze", "get_freeze", get_freeze);
    t.post("/v1/control/freeze", "set_freeze", set_freeze);
    t.get("/v1/control/maintenance", "list_maintenance", list_maintenance);
    t.post("/v1/control/maintenance", "set_maintenance", set_maintenance);
    t.get("/v1/control/capacity", "get_capacity", get_capacity);
    t.post("/v1/control/capacity", "set_capacity", set_capacity);
    t.post("/v1/control/preflight", "preflight", preflight);
    t.post("/v1/control/backup", "create_backup", create_backup);
    t.get("/v1/control/backups", "list_backups", list_backups);
    t.post("/v1/control/restore", "restore_backup", restore_backup);
    t.post("/v1/control/drill", "restore_drill", restore_drill);
    t.get("/v1/control/handoff", "list_handoffs", list_handoffs);
    t.post("/v1/control/handoff", "create_handoff", create_handoff);
    t.get("/v1/control/checklists", "list_checklists", list_checklists);
    t.post("/v1/control/checklists", "create_checklist", create_checklist);
    t.post("/v1/control/checklists/{id}/complete", "complete_checklist_item", complete_checklist_item);
    t.post("/v1/control/execution-locks/release", "release_execution_lock", release_execution_lock);
    t.get("/v1/control/deployment-profiles", "list_deployment_profiles", list_deployment_profiles);
    t.post("/v1/control/deployment-profiles", "create_deployment_profile", create_deployment_profile);
    t.post("/v1/control/deployment-profiles/evaluate", "evaluate_deployment_profile", evaluate_deployment_profile);
    t.get("/v1/control/failover-drills", "list_failover_drills", list_failover_drills);
    t.post("/v1/control/failover-drills", "record_failover_drill", record_failover_drill);
    t.get("/v1/control/scale-profiles", "list_scale_profiles", list_scale_profiles);
    t.post("/v1/control/scale-profiles", "create_scale_profile", create_scale_profile);
    t.get("/v1/control/schema-migrations", "list_schema_migrations", list_schema_migrations);
    t.post("/v1/control/schema-migrations", "register_schema_migration", register_schema_migration);
    t.post("/v1/control/schema-migrations/apply", "apply_schema_migration", apply_schema_migration);
    t.get("/v1/control/channels", "list_channels", list_channels);
    t.post("/v1/control/channels", "create_channel", create_channel);
    t.post("/v1/control/topology-advisor", "topology_advisor", topology_advisor);
    t.get("/v1/control/federation/peers", "list_peers", list_peers);
    t.post("/v1/control/federation/peers", "add_peer", add_peer);
    t.get("/v1/control/canary-health", "canary_health", canary_health);
    t.get("/v1/control/tenants/policies", "list_tenant_policies", list_tenant_policies);
    t.post("/v1/control/tenants/policies", "upsert_tenant_policy", upsert_tenant_policy);
    t.post("/v1/control/tenants/admit-check", "tenant_admit_check", tenant_admit_check);
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SwitchInput {
    enabled: bool,
    reason: String,
    until: Option<DateTime<Utc>>,
}

fn get_emergency_stop(deps: &Deps, _req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::ok(&deps.control.emergency_stop())
}

fn set_emergency_stop(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: SwitchInput = req.json()?;
    let stop = deps.control.set_emergency_stop(input.enabled, &input.reason);
    deps.emit(
        Event::new("control.emergency_stop.updated", "emergency stop updated")
            .field("enabled", stop.enabled)
            .field("reason", &stop.reason),
    );
    HandlerResponse::ok(&stop)
}

fn get_freeze(deps: &Deps, _req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let freeze = deps.control.freeze();
    let active = freeze.is_active();
    let mut body = serde_json::to_value(freeze)?;
    body["active"] = Value::Bool(active);
    HandlerResponse::ok(&body)
}

fn set_freeze(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: SwitchInput = req.json()?;
    let freeze = deps.control.set_freeze(input.enabled, &input.reason, input.until)?;
    deps.emit(
        Event::new("control.freeze.updated", "change freeze updated")
            .field("enabled", freeze.enabled)
            .field("reason", &freeze.reason)
            .field("until", freeze.until),
    );
    HandlerResponse::ok(&freeze)
}

fn list_maintenance(deps: &Deps, _req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&deps.control.maintenance())
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MaintenanceInput {
    target: String,
    enabled: bool,
    reason: String,
}

fn set_maintenance(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: MaintenanceInput = req.json()?;
    let entry = deps
        .control
        .set_maintenance(&input.target, input.enabled, &input.reason)?;
    deps.emit(
        Event::new("control.maintenance.updated", "maintenance mode updated")
            .field("target", &entry.target)
            .field("enabled", entry.enabled),
    );
    HandlerResponse::ok(&entry)
}

fn get_capacity(deps: &Deps, _req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::ok(&deps.queue.capacity())
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CapacityInput {
    max_pending: usize,
    max_running: usize,
}

fn set_capacity(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: CapacityInput = req.json()?;
    let capacity = deps.queue.set_capacity(input.max_pending, input.max_running)?;
    deps.emit(
        Event::new("control.capacity.updated", "queue capacity updated")
            .field("max_pending", capacity.max_pending)
            .field("max_running", capacity.max_running),
    );
    HandlerResponse::ok(&capacity)
}

fn preflight(deps: &Deps, _req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::ok(&deps.execution.preflight(&deps.control, &deps.queue)?)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BackupInput {
    label: String,
    backup_id: String,
}

/// Queue state captured by a backup and applied by a restore.
fn queue_state(deps: &Deps) -> Value {
    json!({ "jobs": deps.queue.all_jobs(), "runs": deps.queue.all_runs() })
}

fn create_backup(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: BackupInput = req.json_or_default()?;
    let backup = deps
        .operations
        .create_backup(deps.objects.as_ref(), &input.label, &queue_state(deps))?;
    deps.emit(
        Event::new("control.backup.created", "backup created")
            .field("backup_id", &backup.id)
            .field("size", backup.size)
            .field("sha256", &backup.sha256),
    );
    HandlerResponse::created(&backup)
}

fn list_backups(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&deps.operations.list_backups(req.limit()))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct QueueState {
    jobs: Vec<Job>,
    runs: Vec<Run>,
}

fn restore_backup(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: BackupInput = req.json()?;
    let (backup, state) = deps
        .operations
        .load_backup(deps.objects.as_ref(), &input.backup_id)?;
    let state: QueueState = serde_json::from_value(state).map_err(|e| {
        ManagerError::denied("backup is not a queue snapshot", json!({ "detail": e.to_string() }))
    })?;
    let (jobs, runs) = (state.jobs.len(), state.runs.len());
    deps.queue.restore(state.jobs, state.runs);
    deps.emit(
        Event::new("control.restore.completed", "backup restored")
            .field("backup_id", &backup.id)
            .field("jobs", jobs)
            .field("runs", runs),
    );
    HandlerResponse::ok(&json!({ "backup_id": backup.id, "restored_jobs": jobs, "restored_runs": runs }))
}

fn restore_drill(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: BackupInput = req.json_or_default()?;
    let result = deps
        .operations
        .drill(deps.objects.as_ref(), Some(input.backup_id.as_str()));
    if !result.passed {
        return Err(ManagerError::denied("restore drill failed", serde_json::to_value(&result)?).into());
    }
    deps.emit(
        Event::new("control.drill.completed", "restore drill passed")
            .field("drill_id", &result.id)
            .field("backup_id", &result.backup_id)
            .field("passed", result.passed),
    );
    HandlerResponse::ok(&result)
}

fn list_handoffs(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&deps.operations.list_handoffs(req.limit()))
}

fn create_handoff(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: HandoffInput = req.json()?;
    let handoff = deps.operations.create_handoff(input)?;
    deps.emit(
        Event::new("control.handoff.created", "shift handoff recorded")
            .field("handoff_id", &handoff.id)
            .field("from", &handoff.from)
            .field("to", &handoff.to)
            .field("open_incidents", handoff.open_incidents.len()),
    );
    HandlerResponse::created(&handoff)
}

fn list_checklists(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&deps.operations.list_checklists(req.limit()))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ChecklistInput {
    name: String,
    items: Vec<String>,
}

fn create_checklist(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: ChecklistInput = req.json()?;
    let checklist = deps.operations.create_checklist(&input.name, &input.items)?;
    deps.emit(
        Event::new("control.checklist.created", "checklist created")
            .field("checklist_id", &checklist.id)
            .field("name", &checklist.name)
            .field("items", checklist.items.len()),
    );
    HandlerResponse::created(&checklist)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ChecklistItemInput {
    item: String,
}

fn complete_checklist_item(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let id = req.path_id("id")?;
    let input: ChecklistItemInput = req.json()?;
    let checklist = deps.operations.complete_checklist_item(&id, &input.item)?;
    deps.emit(
        Event::new("control.checklist.item_completed", "checklist item completed")
            .field("checklist_id", &checklist.id)
            .field("item", input.item.trim())
            .field("completed", checklist.completed),
    );
    HandlerResponse::ok(&checklist)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LockReleaseInput {
    resource: String,
    holder: String,
}

fn release_execution_lock(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: LockReleaseInput = req.json()?;
    let lock = deps.execution.release_lock(&input.resource, &input.holder)?;
    deps.emit(
        Event::new("execution.lock.released", "execution lock released")
            .field("resource", &lock.resource)
            .field("holder", &lock.holder),
    );
    HandlerResponse::ok(&json!({ "released": true, "lock": lock }))
}

fn list_deployment_profiles(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&deps.operations.list_deployment_profiles(req.limit()))
}

fn create_deployment_profile(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: DeploymentProfileInput = req.json()?;
    let profile = deps.operations.create_deployment_profile(input)?;
    deps.emit(
        Event::new("control.deployment_profile.created", "deployment profile created")
            .field("profile_id", &profile.id)
            .field("name", &profile.name)
            .field("environment", &profile.environment),
    );
    HandlerResponse::created(&profile)
}

fn evaluate_deployment_profile(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: ProfileEvaluation = req.json()?;
    HandlerResponse::ok(&deps.operations.evaluate_deployment_profile(&input)?)
}

fn list_failover_drills(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&deps.operations.list_failover_drills(req.limit()))
}

fn record_failover_drill(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: FailoverDrillInput = req.json()?;
    let drill = deps.operations.record_failover_drill(input)?;
    deps.emit(
        Event::new("control.failover_drill.recorded", "failover drill recorded")
            .field("drill_id", &drill.id)
            .field("region", &drill.region)
            .field("target_region", &drill.target_region)
            .field("passed", drill.passed),
    );
    HandlerResponse::created(&drill)
}

fn list_scale_profiles(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&deps.operations.list_scale_profiles(req.limit()))
}

fn create_scale_profile(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: ScaleProfileInput = req.json()?;
    let profile = deps.operations.create_scale_profile(input)?;
    deps.emit(
        Event::new("control.scale_profile.created", "scale profile created")
            .field("profile_id", &profile.id)
            .field("name", &profile.name),
    );
    HandlerResponse::created(&profile)
}

fn list_schema_migrations(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&deps.operations.list_migrations(req.limit()))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MigrationInput {
    version: u32,
    description: String,
}

fn register_schema_migration(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: MigrationInput = req.json()?;
    let migration = deps
        .operations
        .register_migration(input.version, &input.description)?;
    deps.emit(
        Event::new("control.schema_migration.registered", "schema migration registered")
            .field("version", migration.version)
            .field("description", &migration.description),
    );
    HandlerResponse::created(&migration)
}

fn apply_schema_migration(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: MigrationInput = req.json()?;
    let migration = deps.operations.apply_migration(input.version)?;
    deps.emit(
        Event::new("control.schema_migration.applied", "schema migration applied")
            .field("version", migration.version),
    );
    HandlerResponse::ok(&migration)
}

fn list_channels(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&deps.operations.list_channels(req.limit()))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ChannelInput {
    name: String,
    description: String,
    min_soak_hours: u32,
}

fn create_channel(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: ChannelInput = req.json()?;
    let channel = deps
        .operations
        .create_channel(&input.name, &input.description, input.min_soak_hours)?;
    deps.emit(
        Event::new("control.channel.created", "release channel created")
            .field("channel_id", &channel.id)
            .field("name", &channel.name),
    );
    HandlerResponse::created(&channel)
}

fn topology_advisor(_deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: TopologyInput = req.json()?;
    HandlerResponse::ok(&topology_advice(&input)?)
}

fn list_peers(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&deps.operations.list_peers(req.limit()))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PeerInput {
    name: String,
    endpoint: String,
    region: String,
}

fn add_peer(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: PeerInput = req.json()?;
    let peer = deps
        .operations
        .add_peer(&input.name, &input.endpoint, &input.region)?;
    deps.emit(
        Event::new("control.federation.peer.added", "federation peer added")
            .field("peer_id", &peer.id)
            .field("name", &peer.name)
            .field("region", &peer.region),
    );
    HandlerResponse::created(&peer)
}

fn canary_health(deps: &Deps, _req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::ok(&deps.catalog.canary_health())
}

fn list_tenant_policies(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&deps.tenancy.list(req.limit()))
}

fn upsert_tenant_policy(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: TenantPolicyInput = req.json()?;
    let (policy, created) = deps.tenancy.upsert(input)?;
    deps.emit(
        Event::new("control.tenant.policy.upserted", "tenant policy upserted")
            .field("tenant", &policy.tenant)
            .field("created", created)
            .field("max_queue_share_percent", policy.max_queue_share_percent),
    );
    if created {
        HandlerResponse::created(&policy)
    } else {
        HandlerResponse::ok(&policy)
    }
}

fn tenant_admit_check(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: AdmitRequest = req.json()?;
    let capacity = deps.queue.capacity().max_pending;
    HandlerResponse::ok(&deps.tenancy.admit(&input, capacity)?)
}
