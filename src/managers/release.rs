//! Release gates: readiness, API contract diffing, upgrade planning, performance gates,
//! test-infrastructure records (flake quarantine, harness runs, ephemeral environments,
//! migration and mutation checks), the blocker policy and the dependency bot.
//!
//! Every evaluation answers with a body describing each check; failing evaluations
//! come back as [`ManagerError::Denied`] carrying the same body.

use super::packages::outcome;
use super::{bounded, clean_list, now, require, require_lower, ManagerError, ManagerResult};
use crate::ids::new_id;
use crate::store::Collection;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use tracing::info;

pub const MIN_TEST_PASS_RATE: f64 = 0.95;
pub const MIN_ERROR_BUDGET: f64 = 0.1;
pub const MIN_CANARY_SUCCESS_RATE: f64 = 0.99;
pub const DEFAULT_MUTATION_THRESHOLD: f64 = 0.8;
/// Longest flake quarantine.
pub const MAX_QUARANTINE_DAYS: i64 = 365;
/// Longest ephemeral test environment (7 days).
pub const MAX_EPHEMERAL_TTL_HOURS: i64 = 7 * 24;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReadinessInput {
    pub release: String,
    pub test_pass_rate: f64,
    pub open_blockers: u32,
    pub error_budget_remaining: f64,
    pub canary_success_rate: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ApiContractInput {
    pub previous: Vec<String>,
    pub current: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UpgradeInput {
    pub from_version: String,
    pub to_version: String,
    pub components: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformancePolicy {
    pub max_p95_latency_ms: f64,
    pub max_error_rate: f64,
    pub min_throughput_rps: f64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for PerformancePolicy {
    fn default() -> Self {
        Self {
            max_p95_latency_ms: 500.0,
            max_error_rate: 0.01,
            min_throughput_rps: 0.0,
            updated_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PerformanceSample {
    pub name: String,
    pub p95_latency_ms: f64,
    pub error_rate: f64,
    pub throughput_rps: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceEvaluation {
    pub id: String,
    pub name: String,
    pub passed: bool,
    pub p95_latency_ms: f64,
    pub error_rate: f64,
    pub throughput_rps: f64,
    pub violations: Vec<String>,
    pub evaluated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FlakeQuarantine {
    pub id: String,
    pub test_name: String,
    pub reason: String,
    pub failure_rate: f64,
    pub quarantined_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FlakeInput {
    pub test_name: String,
    pub reason: String,
    pub failure_rate: f64,
    pub days: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HarnessRun {
    pub id: String,
    pub suite: String,
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub duration_ms: u64,
    pub pass_rate: f64,
    pub status: &'static str,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HarnessRunInput {
    pub suite: String,
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EphemeralEnvironment {
    pub id: String,
    pub name: String,
    pub branch: String,
    pub status: &'static str,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EphemeralInput {
    pub name: String,
    pub branch: String,
    pub ttl_hours: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MigrationTestInput {
    pub from_version: u32,
    pub to_version: u32,
    pub applied_versions: Vec<u32>,
    pub rollback_verified: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MutationTestInput {
    pub suite: String,
    pub killed: u32,
    pub survived: u32,
    pub timed_out: u32,
    pub threshold: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockerPolicy {
    pub max_open_blockers: u32,
    pub blocking_labels: Vec<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DependencyBotPolicy {
    /// Any of `patch`, `minor`, `major`.
    pub allowed_update_types: Vec<String>,
    pub blocked_packages: Vec<String>,
    pub max_open_updates: usize,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for DependencyBotPolicy {
    fn default() -> Self {
        Self {
            allowed_update_types: vec!["patch".into(), "minor".into()],
            blocked_packages: Vec::new(),
            max_open_updates: 10,
            updated_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProposedUpdate {
    pub package: String,
    pub current_version: String,
    pub target_version: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DependencyUpdatesInput {
    pub updates: Vec<ProposedUpdate>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DependencyUpdate {
    pub id: String,
    pub package: String,
    pub current_version: String,
    pub target_version: String,
    pub update_type: &'static str,
    pub status: &'static str,
    pub proposed_at: DateTime<Utc>,
}

identified!(PerformanceEvaluation, FlakeQuarantine, HarnessRun, EphemeralEnvironment, DependencyUpdate);

#[derive(Default)]
pub struct ReleaseManager {
    perf_policy: RwLock<PerformancePolicy>,
    blocker_policy: RwLock<BlockerPolicy>,
    bot_policy: RwLock<DependencyBotPolicy>,
    evaluations: Collection<PerformanceEvaluation>,
    flakes: Collection<FlakeQuarantine>,
    harness_runs: Collection<HarnessRun>,
    ephemeral: Collection<EphemeralEnvironment>,
    updates: Collection<DependencyUpdate>,
}

fn check(name: &str, value: Value, threshold: Value, passed: bool) -> Value {
    json!({ "name": name, "value": value, "threshold": threshold, "passed": passed })
}

impl ReleaseManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open blockers are compared against the blocker policy's allowance (0 by default).
    pub fn readiness(&self, input: &ReadinessInput) -> ManagerResult<Value> {
        let max_blockers = self.blocker_policy.read().max_open_blockers;
        let checks = [
            check(
                "test_pass_rate",
                json!(input.test_pass_rate),
                json!(MIN_TEST_PASS_RATE),
                input.test_pass_rate >= MIN_TEST_PASS_RATE,
            ),
            check(
                "open_blockers",
                json!(input.open_blockers),
                json!(max_blockers),
                input.open_blockers <= max_blockers,
            ),
            check(
                "error_budget_remaining",
                json!(input.error_budget_remaining),
                json!(MIN_ERROR_BUDGET),
                input.error_budget_remaining >= MIN_ERROR_BUDGET,
            ),
            check(
                "canary_success_rate",
                json!(input.canary_success_rate),
                json!(MIN_CANARY_SUCCESS_RATE),
                input.canary_success_rate >= MIN_CANARY_SUCCESS_RATE,
            ),
        ];
        let violations: Vec<String> = checks
            .iter()
            .filter(|c| c["passed"] == false)
            .filter_map(|c| c["name"].as_str().map(str::to_string))
            .collect();
        let body = json!({
            "release": input.release.trim(),
            "ready": violations.is_empty(),
            "checks": checks,
        });
        outcome("release not ready", body, violations)
    }

    pub fn api_contract(&self, input: &ApiContractInput) -> ManagerResult<Value> {
        let previous: BTreeSet<String> = clean_list(&input.previous).into_iter().collect();
        let current: BTreeSet<String> = clean_list(&input.current).into_iter().collect();
        let removed: Vec<&String> = previous.difference(&current).collect();
        let added: Vec<&String> = current.difference(&previous).collect();
        let body = json!({
            "added": added,
            "removed": removed,
            "breaking": !removed.is_empty(),
        });
        let violations = removed.iter().map(|e| format!("removed {e}")).collect();
        outcome("breaking api change", body, violations)
    }

    pub fn upgrade_plan(&self, input: &UpgradeInput) -> ManagerResult<Value> {
        let from_raw = require("from_version", &input.from_version)?;
        let to_raw = require("to_version", &input.to_version)?;
        let from = parse_version(&from_raw)
            .ok_or_else(|| ManagerError::invalid("from_version must be a version"))?;
        let to = parse_version(&to_raw)
            .ok_or_else(|| ManagerError::invalid("to_version must be a version"))?;
        if to <= from {
            return Err(ManagerError::invalid("to_version must be newer than from_version"));
        }
        let mut steps = vec![
            "take a control-plane backup".to_string(),
            "drain the job queue".to_string(),
        ];
        // One hop per intermediate major so each major's migrations run in order.
        for major in (from.0 + 1)..to.0 {
            steps.push(format!("upgrade to {major}.x and apply its schema migrations"));
        }
        let components = clean_list(&input.components);
        if components.is_empty() {
            steps.push(format!("upgrade control plane to {to_raw}"));
        } else {
            steps.extend(components.iter().map(|c| format!("upgrade {c} to {to_raw}")));
        }
        if to.0 > from.0 {
            steps.push("apply pending schema migrations".to_string());
        }
        steps.push("resume the job queue".to_string());
        steps.push("verify health and canary success".to_string());
        let steps: Vec<Value> = steps
            .into_iter()
            .enumerate()
            .map(|(i, s)| json!({ "order": i + 1, "step": s }))
            .collect();
        Ok(json!({
            "from_version": from_raw,
            "to_version": to_raw,
            "major_upgrade": to.0 > from.0,
            "steps": steps,
        }))
    }

    pub fn performance_policy(&self) -> PerformancePolicy {
        self.perf_policy.read().clone()
    }

    pub fn set_performance_policy(&self, mut policy: PerformancePolicy) -> ManagerResult<PerformancePolicy> {
        if policy.max_p95_latency_ms <= 0.0 {
            return Err(ManagerError::invalid("max_p95_latency_ms must be positive"));
        }
        if !(0.0..=1.0).contains(&policy.max_error_rate) {
            return Err(ManagerError::invalid("max_error_rate must be between 0 and 1"));
        }
        policy.updated_at = Some(now());
        *self.perf_policy.write() = policy.clone();
        Ok(policy)
    }

    /// Recorded whether or not it passes.
    pub fn evaluate_performance(&self, sample: &PerformanceSample) -> ManagerResult<PerformanceEvaluation> {
        let policy = self.performance_policy();
        let mut violations = Vec::new();
        if sample.p95_latency_ms > policy.max_p95_latency_ms {
            violations.push(format!(
                "p95 latency {}ms exceeds {}ms",
                sample.p95_latency_ms, policy.max_p95_latency_ms
            ));
        }
        if sample.error_rate > policy.max_error_rate {
            violations.push(format!(
                "error rate {} exceeds {}",
                sample.error_rate, policy.max_error_rate
            ));
        }
        if sample.throughput_rps < policy.min_throughput_rps {
            violations.push(format!(
                "throughput {}rps below {}rps",
                sample.throughput_rps, policy.min_throughput_rps
            ));
        }
        let evaluation = self.evaluations.insert(PerformanceEvaluation {
            id: new_id("perf-eval"),
            name: sample.name.trim().to_string(),
            passed: violations.is_empty(),
            p95_latency_ms: sample.p95_latency_ms,
            error_rate: sample.error_rate,
            throughput_rps: sample.throughput_rps,
            violations,
            evaluated_at: now(),
        });
        if !evaluation.passed {
            return Err(ManagerError::denied(
                "performance gate failed",
                serde_json::to_value(&evaluation)?,
            ));
        }
        Ok(evaluation)
    }

    pub fn list_evaluations(&self, limit: usize) -> Vec<PerformanceEvaluation> {
        self.evaluations.list(limit)
    }

    pub fn quarantine(&self, input: FlakeInput) -> ManagerResult<FlakeQuarantine> {
        let test_name = require("test_name", &input.test_name)?;
        if !(0.0..=1.0).contains(&input.failure_rate) {
            return Err(ManagerError::invalid("failure_rate must be between 0 and 1"));
        }
        let at = now();
        let days = bounded(input.days, 14, MAX_QUARANTINE_DAYS);
        let record = FlakeQuarantine {
            id: new_id("flake"),
            test_name: test_name.clone(),
            reason: input.reason.trim().to_string(),
            failure_rate: input.failure_rate,
            quarantined_at: at,
            expires_at: at + Duration::days(days),
        };
        self.flakes.insert_unique(
            record,
            |f| f.test_name == test_name && f.expires_at > at,
            "quarantine",
        )
    }

    pub fn list_quarantined(&self, limit: usize) -> Vec<FlakeQuarantine> {
        self.flakes.list(limit)
    }

    pub fn record_harness_run(&self, input: HarnessRunInput) -> ManagerResult<HarnessRun> {
        let suite = require("suite", &input.suite)?;
        let executed = input.passed + input.failed;
        let pass_rate = if executed == 0 {
            0.0
        } else {
            f64::from(input.passed) / f64::from(executed)
        };
        Ok(self.harness_runs.insert(HarnessRun {
            id: new_id("harness"),
            suite,
            passed: input.passed,
            failed: input.failed,
            skipped: input.skipped,
            duration_ms: input.duration_ms,
            pass_rate,
            status: if input.failed == 0 { "passed" } else { "failed" },
            recorded_at: now(),
        }))
    }

    pub fn list_harness_runs(&self, limit: usize) -> Vec<HarnessRun> {
        self.harness_runs.list(limit)
    }

    pub fn create_ephemeral(&self, input: EphemeralInput) -> ManagerResult<EphemeralEnvironment> {
        let branch = require("branch", &input.branch)?;
        let name = match input.name.trim() {
            "" => format!("test-{}", crate::paths::sanitize_stem(&branch.to_lowercase())),
            n => n.to_lowercase(),
        };
        let ttl = bounded(input.ttl_hours, 4, MAX_EPHEMERAL_TTL_HOURS);
        let at = now();
        self.ephemeral.insert_unique(
            EphemeralEnvironment {
                id: new_id("ephemeral"),
                name: name.clone(),
                branch,
                status: "provisioning",
                created_at: at,
                expires_at: at + Duration::hours(ttl),
            },
            |e| e.name == name && e.expires_at > at,
            "ephemeral environment",
        )
    }

    /// Every version in `(from, to]` must have been applied, and rollback verified.
    pub fn migration_test(&self, input: &MigrationTestInput) -> ManagerResult<Value> {
        if input.to_version <= input.from_version {
            return Err(ManagerError::invalid("to_version must be greater than from_version"));
        }
        let applied: BTreeSet<u32> = input.applied_versions.iter().copied().collect();
        let missing: Vec<u32> = ((input.from_version + 1)..=input.to_version)
            .filter(|v| !applied.contains(v))
            .collect();
        let mut violations: Vec<String> = missing
            .iter()
            .map(|v| format!("migration {v} not applied"))
            .collect();
        if !input.rollback_verified {
            violations.push("rollback not verified".to_string());
        }
        let body = json!({
            "from_version": input.from_version,
            "to_version": input.to_version,
            "missing": missing,
            "rollback_verified": input.rollback_verified,
            "passed": violations.is_empty(),
        });
        outcome("migration test failed", body, violations)
    }

    /// Score = detected / total, where timeouts count as detected.
    pub fn mutation_test(&self, input: &MutationTestInput) -> ManagerResult<Value> {
        let detected = input.killed + input.timed_out;
        let total = detected + input.survived;
        if total == 0 {
            return Err(ManagerError::invalid("no mutants reported"));
        }
        let threshold = input.threshold.unwrap_or(DEFAULT_MUTATION_THRESHOLD);
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ManagerError::invalid("threshold must be between 0 and 1"));
        }
        let score = f64::from(detected) / f64::from(total);
        let body = json!({
            "suite": input.suite.trim(),
            "score": score,
            "threshold": threshold,
            "total": total,
            "survived": input.survived,
            "passed": score >= threshold,
        });
        let violations = if score >= threshold {
            Vec::new()
        } else {
            vec![format!("mutation score {score:.3} below {threshold}")]
        };
        outcome("mutation score below threshold", body, violations)
    }

    pub fn blocker_policy(&self) -> BlockerPolicy {
        self.blocker_policy.read().clone()
    }

    pub fn set_blocker_policy(&self, mut policy: BlockerPolicy) -> BlockerPolicy {
        policy.blocking_labels = clean_list(&policy.blocking_labels)
            .into_iter()
            .map(|l| l.to_lowercase())
            .collect();
        policy.updated_at = Some(now());
        *self.blocker_policy.write() = policy.clone();
        policy
    }

    pub fn bot_policy(&self) -> DependencyBotPolicy {
        self.bot_policy.read().clone()
    }

    pub fn set_bot_policy(&self, mut policy: DependencyBotPolicy) -> ManagerResult<DependencyBotPolicy> {
        let mut types = Vec::new();
        for t in clean_list(&policy.allowed_update_types) {
            let t = t.to_lowercase();
            if !matches!(t.as_str(), "patch" | "minor" | "major") {
                return Err(ManagerError::invalid(format!("unknown update type {t}")));
            }
            types.push(t);
        }
        policy.allowed_update_types = types;
        policy.blocked_packages = clean_list(&policy.blocked_packages)
            .into_iter()
            .map(|p| p.to_lowercase())
            .collect();
        policy.updated_at = Some(now());
        *self.bot_policy.write() = policy.clone();
        Ok(policy)
    }

    /// All-or-nothing: one blocked update rejects the whole batch.
    pub fn propose_updates(&self, input: &DependencyUpdatesInput) -> ManagerResult<Vec<DependencyUpdate>> {
        if input.updates.is_empty() {
            return Err(ManagerError::invalid("updates is required"));
        }
        let policy = self.bot_policy();
        let open = self.updates.count_where(|u| u.status == "proposed");
        let mut proposed = Vec::new();
        let mut blocked = Vec::new();
        for update in &input.updates {
            let package = require_lower("package", &update.package)?;
            let current = require("current_version", &update.current_version)?;
            let target = require("target_version", &update.target_version)?;
            let update_type = classify_update(&current, &target).ok_or_else(|| {
                ManagerError::invalid(format!("{package}: target_version must be newer than current_version"))
            })?;
            if policy.blocked_packages.contains(&package) {
                blocked.push(json!({ "package": package, "reason": "package blocked" }));
                continue;
            }
            if !policy.allowed_update_types.iter().any(|t| t == update_type) {
                blocked.push(json!({ "package": package, "reason": format!("{update_type} updates not allowed") }));
                continue;
            }
            proposed.push(DependencyUpdate {
                id: new_id("dep-update"),
                package,
                current_version: current,
                target_version: target,
                update_type,
                status: "proposed",
                proposed_at: now(),
            });
        }
        if open + proposed.len() > policy.max_open_updates {
            blocked.push(json!({
                "reason": "max_open_updates exceeded",
                "open": open,
                "max_open_updates": policy.max_open_updates,
            }));
        }
        if !blocked.is_empty() {
            return Err(ManagerError::denied(
                "dependency updates blocked by policy",
                json!({ "blocked": blocked, "allowed": proposed.len() }),
            ));
        }
        for update in &proposed {
            self.updates.insert(update.clone());
        }
        info!(count = proposed.len(), "dependency updates proposed");
        Ok(proposed)
    }
}

fn parse_version(raw: &str) -> Option<(u64, u64, u64)> {
    let core = raw.trim().trim_start_matches('v');
    let core = core.split(['-', '+']).next()?;
    let mut parts = core.split('.').map(|p| p.parse::<u64>());
    let major = parts.next()?.ok()?;
    let minor = parts.next().transpose().ok()?.unwrap_or(0);
    let patch = parts.next().transpose().ok()?.unwrap_or(0);
    Some((major, minor, patch))
}

fn classify_update(current: &str, target: &str) -> Option<&'static str> {
    let (c, t) = (parse_version(current)?, parse_version(target)?);
    if t <= c {
        return None;
    }
    Some(if t.0 != c.0 {
        "major"
    } else if t.1 != c.1 {
        "minor"
    } else {
        "patch"
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_input() -> ReadinessInput {
        ReadinessInput {
            release: "2.4.0".into(),
            test_pass_rate: 0.99,
            open_blockers: 0,
            error_budget_remaining: 0.4,
            canary_success_rate: 0.995,
        }
    }

    #[test]
    fn test_readiness_thresholds() {
        let rm = ReleaseManager::new();
        assert_eq!(rm.readiness(&ready_input()).unwrap()["ready"], true);

        let mut low = ready_input();
        low.test_pass_rate = 0.9;
        low.open_blockers = 1;
        match rm.readiness(&low) {
            Err(ManagerError::Denied { detail, .. }) => {
                assert_eq!(detail["violations"], json!(["test_pass_rate", "open_blockers"]));
            }
            other => panic!("expected denial, got {other:?}"),
        }

        rm.set_blocker_policy(BlockerPolicy {
            max_open_blockers: 2,
            ..Default::default()
        });
        let mut one_blocker = ready_input();
        one_blocker.open_blockers = 1;
        assert!(rm.readiness(&one_blocker).is_ok());
    }

    #[test]
    fn test_api_contract() {
        let rm = ReleaseManager::new();
        let mut input = ApiContractInput {
            previous: vec!["GET /v1/jobs".into(), "POST /v1/jobs".into()],
            current: vec!["GET /v1/jobs".into(), "POST /v1/jobs".into(), "GET /v1/runs".into()],
        };
        assert_eq!(rm.api_contract(&input).unwrap()["added"], json!(["GET /v1/runs"]));
        input.current.remove(1);
        assert!(matches!(rm.api_contract(&input), Err(ManagerError::Denied { .. })));
    }

    #[test]
    fn test_upgrade_plan_major_hops() {
        let rm = ReleaseManager::new();
        let plan = rm
            .upgrade_plan(&UpgradeInput {
                from_version: "1.4.0".into(),
                to_version: "3.0.0".into(),
                components: vec![],
            })
            .unwrap();
        let steps = plan["steps"].as_array().unwrap();
        assert!(steps.iter().any(|s| s["step"].as_str().unwrap().starts_with("upgrade to 2.x")));
        assert_eq!(steps[0]["order"], 1);
        assert!(rm
            .upgrade_plan(&UpgradeInput {
                from_version: "2.0.0".into(),
                to_version: "1.0.0".into(),
                components: vec![],
            })
            .is_err());
    }

    #[test]
    fn test_performance_gate_records_failures() {
        let rm = ReleaseManager::new();
        let fast = PerformanceSample {
            name: "api".into(),
            p95_latency_ms: 120.0,
            error_rate: 0.001,
            throughput_rps: 50.0,
        };
        assert!(rm.evaluate_performance(&fast).unwrap().passed);
        let slow = PerformanceSample {
            p95_latency_ms: 900.0,
            ..fast
        };
        assert!(rm.evaluate_performance(&slow).is_err());
        assert_eq!(rm.list_evaluations(100).len(), 2);
    }

    #[test]
    fn test_mutation_default_threshold() {
        let rm = ReleaseManager::new();
        let mut input = MutationTestInput {
            suite: "core".into(),
            killed: 8,
            survived: 2,
            ..Default::default()
        };
        assert_eq!(rm.mutation_test(&input).unwrap()["passed"], true);
        input.survived = 5;
        assert!(rm.mutation_test(&input).is_err());
    }

    #[test]
    fn test_migration_gaps() {
        let rm = ReleaseManager::new();
        let input = MigrationTestInput {
            from_version: 3,
            to_version: 5,
            applied_versions: vec![4, 5],
            rollback_verified: true,
        };
        assert!(rm.migration_test(&input).is_ok());
        let gap = MigrationTestInput {
            applied_versions: vec![5],
            ..input
        };
        assert!(rm.migration_test(&gap).is_err());
    }

    #[test]
    fn test_dependency_bot() {
        let rm = ReleaseManager::new();
        let minor = DependencyUpdatesInput {
            updates: vec![ProposedUpdate {
                package: "serde".into(),
                current_version: "1.0.100".into(),
                target_version: "1.1.0".into(),
            }],
        };
        assert_eq!(rm.propose_updates(&minor).unwrap()[0].update_type, "minor");
        let major = DependencyUpdatesInput {
            updates: vec![ProposedUpdate {
                package: "tokio".into(),
                current_version: "0.2.0".into(),
                target_version: "1.0.0".into(),
            }],
        };
        assert!(matches!(rm.propose_updates(&major), Err(ManagerError::Denied { .. })));
    }

    #[test]
    fn test_classify_update() {
        assert_eq!(classify_update("v1.2.3", "1.2.4"), Some("patch"));
        assert_eq!(classify_update("1.2", "2.0"), Some("major"));
        assert_eq!(classify_update("1.2.3", "1.2.3"), None);
    }
}
