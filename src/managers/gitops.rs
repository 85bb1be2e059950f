//! GitOps: environments bound to a repository branch, materialized plans, deployments
//! (manual or webhook-triggered), reconciles, preview environments, signed plan
//! artifacts, approval gates and rendered PR comments.

use super::queue::{Job, JobRequest, QueueManager};
use super::{bounded, clean_list, now, require, require_lower, ManagerError, ManagerResult};
use crate::crypto::{canonical_json, sha256_hex, Signer};
use crate::ids::new_id;
use crate::paths::{resolve_config_path, write_state_json, StateDir};
use crate::planner::{build_plan, ConfigDocument, Plan};
use crate::store::Collection;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt::Write as _;
use std::path::Path;
use tracing::info;

pub const DEFAULT_PREVIEW_TTL_HOURS: i64 = 24;
/// Longest preview lifetime (30 days).
pub const MAX_PREVIEW_TTL_HOURS: i64 = 30 * 24;

#[derive(Debug, Clone, Serialize)]
pub struct GitopsEnvironment {
    pub id: String,
    pub name: String,
    pub repository: String,
    pub branch: String,
    pub config_path: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GitopsEnvironmentInput {
    pub name: String,
    pub repository: String,
    pub branch: String,
    pub config_path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Materialization {
    pub environment: String,
    pub path: String,
    pub digest: String,
    pub steps: usize,
    pub materialized_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Deployment {
    pub id: String,
    pub environment: String,
    pub commit: String,
    pub trigger: String,
    pub job_id: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DeploymentTrigger {
    pub environment: String,
    pub commit: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PushWebhook {
    pub repository: String,
    pub branch: String,
    pub commit: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Preview {
    pub id: String,
    pub branch: String,
    pub environment: String,
    pub status: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PreviewInput {
    pub branch: String,
    pub environment: String,
    pub ttl_hours: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanArtifact {
    pub id: String,
    pub environment: String,
    pub digest: String,
    pub signature: String,
    pub key_id: String,
    pub signed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PlanArtifactInput {
    pub environment: String,
    pub plan: Value,
    pub signature: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct PlanClaims {
    digest: String,
    env: String,
    iat: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApprovalGate {
    pub id: String,
    pub name: String,
    pub environment: String,
    pub min_approvals: usize,
    pub required_checks: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ApprovalGateInput {
    pub name: String,
    pub environment: String,
    pub min_approvals: usize,
    pub required_checks: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GateEvaluation {
    pub environment: String,
    pub approvals: Vec<String>,
    pub passed_checks: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrComment {
    pub id: String,
    pub pull_request: String,
    pub environment: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

identified!(GitopsEnvironment, Deployment, Preview, PlanArtifact, ApprovalGate, PrComment);

#[derive(Default)]
pub struct GitopsManager {
    environments: Collection<GitopsEnvironment>,
    deployments: Collection<Deployment>,
    previews: Collection<Preview>,
    artifacts: Collection<PlanArtifact>,
    gates: Collection<ApprovalGate>,
    comments: Collection<PrComment>,
}

impl GitopsManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_environment(&self, input: GitopsEnvironmentInput) -> ManagerResult<GitopsEnvironment> {
        let name = require_lower("name", &input.name)?;
        let env = GitopsEnvironment {
            id: new_id("gitops-env"),
            name: name.clone(),
            repository: require("repository", &input.repository)?,
            branch: match input.branch.trim() {
                "" => "main".to_string(),
                b => b.to_string(),
            },
            config_path: require("config_path", &input.config_path)?,
            created_at: now(),
        };
        self.environments
            .insert_unique(env, |e| e.name == name, "environment")
    }

    pub fn list_environments(&self, limit: usize) -> Vec<GitopsEnvironment> {
        self.environments.list(limit)
    }

    fn environment(&self, name: &str) -> ManagerResult<GitopsEnvironment> {
        let name = require_lower("environment", name)?;
        self.environments
            .find(|e| e.name == name)
            .ok_or_else(|| ManagerError::not_found("environment not found"))
    }

    /// Plan `config_path` and write it to `materialized/<environment>.json`.
    pub fn materialize(&self, base_dir: &Path, environment: &str, config_path: &Path) -> ManagerResult<Materialization> {
        let environment = require_lower("environment", environment)?;
        let doc = ConfigDocument::load(config_path)?;
        let plan = build_plan(&doc)?;
        let materialized_at = now();
        let body = json!({
            "environment": environment,
            "source": config_path.display().to_string(),
            "digest": plan.digest,
            "plan": plan.steps,
            "resources": doc.resources,
            "materialized_at": materialized_at,
        });
        let path = write_state_json(base_dir, StateDir::Materialized, &environment, &body)?;
        info!(environment = %environment, path = %path.display(), "environment materialized");
        Ok(Materialization {
            environment,
            path: path.display().to_string(),
            digest: plan.digest,
            steps: plan.steps.len(),
            materialized_at,
        })
    }

    fn enqueue_for(
        &self,
        base_dir: &Path,
        queue: &QueueManager,
        env: &GitopsEnvironment,
        source: &str,
        force: bool,
    ) -> ManagerResult<Job> {
        let path = resolve_config_path(base_dir, &env.config_path)?;
        let (job, _) = queue.enqueue(JobRequest {
            config_path: path.display().to_string(),
            priority: "normal".to_string(),
            idempotency_key: String::new(),
            force,
            source: source.to_string(),
        })?;
        Ok(job)
    }

    fn record_deployment(&self, env: &GitopsEnvironment, commit: &str, trigger: &str, job: &Job) -> Deployment {
        self.deployments.insert(Deployment {
            id: new_id("deployment"),
            environment: env.name.clone(),
            commit: commit.trim().to_string(),
            trigger: trigger.to_string(),
            job_id: job.id.clone(),
            status: "queued".to_string(),
            created_at: now(),
        })
    }

    pub fn trigger(
        &self,
        base_dir: &Path,
        queue: &QueueManager,
        input: &DeploymentTrigger,
        force: bool,
    ) -> ManagerResult<Deployment> {
        let env = self.environment(&input.environment)?;
        let job = self.enqueue_for(base_dir, queue, &env, "gitops", force)?;
        Ok(self.record_deployment(&env, &input.commit, "manual", &job))
    }

    /// Environments bound to the pushed repository and branch.
    pub fn webhook_targets(&self, hook: &PushWebhook) -> ManagerResult<Vec<GitopsEnvironment>> {
        let repository = require("repository", &hook.repository)?;
        let branch = require("branch", &hook.branch)?;
        let branch = branch.strip_prefix("refs/heads/").unwrap_or(&branch).to_string();
        Ok(self
            .environments
            .snapshot()
            .into_iter()
            .filter(|e| e.repository == repository && e.branch == branch)
            .collect())
    }

    /// One deployment per matching environment.
    pub fn webhook(
        &self,
        base_dir: &Path,
        queue: &QueueManager,
        hook: &PushWebhook,
        force: bool,
    ) -> ManagerResult<Vec<Deployment>> {
        let mut out = Vec::new();
        for env in self.webhook_targets(hook)? {
            let job = self.enqueue_for(base_dir, queue, &env, "gitops-webhook", force)?;
            out.push(self.record_deployment(&env, &hook.commit, "webhook", &job));
        }
        Ok(out)
    }

    pub fn list_deployments(&self, environment: Option<&str>, limit: usize) -> Vec<Deployment> {
        self.deployments
            .list_filtered(limit, |d| environment.is_none_or(|e| d.environment == e))
    }

    /// Enqueue a reconcile run for an environment.
    pub fn reconcile(&self, base_dir: &Path, queue: &QueueManager, environment: &str, force: bool) -> ManagerResult<Job> {
        let env = self.environment(environment)?;
        self.enqueue_for(base_dir, queue, &env, "gitops-reconcile", force)
    }

    pub fn create_preview(&self, input: PreviewInput) -> ManagerResult<Preview> {
        let branch = require("branch", &input.branch)?;
        let ttl = bounded(input.ttl_hours, DEFAULT_PREVIEW_TTL_HOURS, MAX_PREVIEW_TTL_HOURS);
        let at = now();
        let preview = Preview {
            id: new_id("preview"),
            environment: match input.environment.trim() {
                "" => format!("preview-{}", crate::paths::sanitize_stem(&branch.to_lowercase())),
                e => e.to_lowercase(),
            },
            branch,
            status: "active".to_string(),
            expires_at: at + Duration::hours(ttl),
            created_at: at,
            updated_at: at,
        };
        Ok(self.previews.insert(preview))
    }

    pub fn list_previews(&self, limit: usize) -> Vec<Preview> {
        self.previews.list(limit)
    }

    /// `extend` pushes expiry out by the default TTL; `close` ends the preview.
    pub fn preview_action(&self, id: &str, action: &str) -> ManagerResult<Preview> {
        self.previews.update(id, "preview", |p| {
            if p.status == "closed" {
                return Err(ManagerError::denied(
                    "preview is closed",
                    json!({ "preview_id": p.id }),
                ));
            }
            let at = now();
            match action {
                "extend" => p.expires_at = p.expires_at.max(at) + Duration::hours(DEFAULT_PREVIEW_TTL_HOURS),
                "close" => p.status = "closed".to_string(),
                other => return Err(ManagerError::invalid(format!("unknown preview action {other}"))),
            }
            p.updated_at = at;
            Ok(p.clone())
        })
    }

    pub fn sign_plan(&self, signer: &Signer, input: &PlanArtifactInput) -> ManagerResult<PlanArtifact> {
        if input.plan.is_null() {
            return Err(ManagerError::invalid("plan is required"));
        }
        let environment = input.environment.trim().to_lowercase();
        let digest = plan_digest(&input.plan);
        let signed_at = now();
        let signature = signer.sign(&PlanClaims {
            digest: digest.clone(),
            env: environment.clone(),
            iat: signed_at.timestamp(),
        })?;
        Ok(self.artifacts.insert(PlanArtifact {
            id: new_id("plan-artifact"),
            environment,
            digest,
            signature,
            key_id: signer.key_id().to_string(),
            signed_at,
        }))
    }

    /// Recompute the digest and compare it with the signed one.
    pub fn verify_plan(&self, signer: &Signer, input: &PlanArtifactInput) -> ManagerResult<Value> {
        let signature = require("signature", &input.signature)?;
        if input.plan.is_null() {
            return Err(ManagerError::invalid("plan is required"));
        }
        let claims: PlanClaims = signer.verify(&signature).map_err(|e| {
            ManagerError::denied("plan signature invalid", json!({ "detail": e.to_string() }))
        })?;
        let digest = plan_digest(&input.plan);
        if claims.digest != digest {
            return Err(ManagerError::denied(
                "plan digest mismatch",
                json!({ "expected": claims.digest, "actual": digest }),
            ));
        }
        Ok(json!({ "verified": true, "digest": digest, "environment": claims.env }))
    }

    pub fn create_gate(&self, input: ApprovalGateInput) -> ManagerResult<ApprovalGate> {
        let environment = require_lower("environment", &input.environment)?;
        let gate = ApprovalGate {
            id: new_id("gate"),
            name: require("name", &input.name)?,
            environment: environment.clone(),
            min_approvals: input.min_approvals,
            required_checks: clean_list(&input.required_checks),
            created_at: now(),
        };
        self.gates
            .insert_unique(gate, |g| g.environment == environment, "approval gate")
    }

    pub fn list_gates(&self, limit: usize) -> Vec<ApprovalGate> {
        self.gates.list(limit)
    }

    pub fn evaluate_gate(&self, eval: &GateEvaluation) -> ManagerResult<Value> {
        let environment = require_lower("environment", &eval.environment)?;
        let gate = self
            .gates
            .find(|g| g.environment == environment)
            .ok_or_else(|| ManagerError::not_found("approval gate not found"))?;
        let approvals = clean_list(&eval.approvals);
        let passed = clean_list(&eval.passed_checks);
        let missing: Vec<&String> = gate
            .required_checks
            .iter()
            .filter(|c| !passed.contains(c))
            .collect();
        let body = json!({
            "gate_id": gate.id,
            "environment": environment,
            "approvals": approvals.len(),
            "min_approvals": gate.min_approvals,
            "missing_checks": missing,
            "passed": approvals.len() >= gate.min_approvals && missing.is_empty(),
        });
        if approvals.len() >= gate.min_approvals && missing.is_empty() {
            Ok(body)
        } else {
            Err(ManagerError::denied("approval gate not satisfied", body))
        }
    }

    pub fn render_pr_comment(&self, pull_request: &str, environment: &str, plan: &Plan) -> ManagerResult<PrComment> {
        let pull_request = require("pull_request", pull_request)?;
        let environment = match environment.trim() {
            "" => "default".to_string(),
            e => e.to_lowercase(),
        };
        let mut body = String::new();
        let _ = writeln!(body, "### Plan for `{environment}`");
        let _ = writeln!(body);
        let _ = writeln!(body, "{} resource(s), digest `{}`", plan.steps.len(), &plan.digest[..12.min(plan.digest.len())]);
        let _ = writeln!(body);
        let _ = writeln!(body, "| # | Resource | Type | Host |");
        let _ = writeln!(body, "|---|---|---|---|");
        for step in &plan.steps {
            let host = if step.host.is_empty() { "*" } else { step.host.as_str() };
            let _ = writeln!(body, "| {} | `{}` | {} | {} |", step.order, step.resource_id, step.kind, host);
        }
        Ok(self.comments.insert(PrComment {
            id: new_id("pr-comment"),
            pull_request,
            environment,
            body,
            created_at: now(),
        }))
    }
}

/// SHA-256 of the canonical plan.
pub fn plan_digest(plan: &Value) -> String {
    sha256_hex(canonical_json(plan).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(dir: &Path) -> GitopsEnvironmentInput {
        std::fs::write(dir.join("site.json"), r#"{"resources":[{"id":"a","type":"file"}]}"#).unwrap();
        GitopsEnvironmentInput {
            name: "Prod".into(),
            repository: "git@example.com:ops/site.git".into(),
            branch: "main".into(),
            config_path: "site.json".into(),
        }
    }

    #[test]
    fn test_materialize_writes_state_file() {
        let dir = tempfile::tempdir().unwrap();
        let gm = GitopsManager::new();
        gm.create_environment(env(dir.path())).unwrap();
        let out = gm
            .materialize(dir.path(), "Prod", &dir.path().join("site.json"))
            .unwrap();
        assert_eq!(out.steps, 1);
        assert!(out.path.ends_with(".masterchef/materialized/prod.json"));
        assert!(Path::new(&out.path).exists());
    }

    #[test]
    fn test_webhook_matches_repository_and_branch() {
        let dir = tempfile::tempdir().unwrap();
        let gm = GitopsManager::new();
        let queue = QueueManager::new();
        gm.create_environment(env(dir.path())).unwrap();
        let hook = PushWebhook {
            repository: "git@example.com:ops/site.git".into(),
            branch: "refs/heads/main".into(),
            commit: "abc123".into(),
        };
        let deployments = gm.webhook(dir.path(), &queue, &hook, false).unwrap();
        assert_eq!(deployments.len(), 1);
        assert_eq!(deployments[0].trigger, "webhook");
        let other = PushWebhook {
            branch: "feature".into(),
            ..hook
        };
        assert!(gm.webhook(dir.path(), &queue, &other, false).unwrap().is_empty());
    }

    #[test]
    fn test_plan_sign_verify() {
        let gm = GitopsManager::new();
        let signer = Signer::new(Some("plan-key"));
        let mut input = PlanArtifactInput {
            environment: "prod".into(),
            plan: json!({"steps": [{"id": "a"}], "b": 1}),
            signature: String::new(),
        };
        let artifact = gm.sign_plan(&signer, &input).unwrap();
        input.signature = artifact.signature.clone();
        input.plan = json!({"b": 1, "steps": [{"id": "a"}]});
        assert!(gm.verify_plan(&signer, &input).is_ok());
        input.plan = json!({"b": 2, "steps": [{"id": "a"}]});
        assert!(matches!(gm.verify_plan(&signer, &input), Err(ManagerError::Denied { .. })));
    }

    #[test]
    fn test_preview_lifecycle() {
        let gm = GitopsManager::new();
        let p = gm
            .create_preview(PreviewInput {
                branch: "Feature/Login".into(),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(p.environment, "preview-feature_login");
        let extended = gm.preview_action(&p.id, "extend").unwrap();
        assert!(extended.expires_at > p.expires_at);
        gm.preview_action(&p.id, "close").unwrap();
        assert!(matches!(gm.preview_action(&p.id, "extend"), Err(ManagerError::Denied { .. })));
    }

    #[test]
    fn test_gate_evaluation() {
        let gm = GitopsManager::new();
        gm.create_gate(ApprovalGateInput {
            name: "prod gate".into(),
            environment: "prod".into(),
            min_approvals: 2,
            required_checks: vec!["ci".into()],
        })
        .unwrap();
        let mut eval = GateEvaluation {
            environment: "PROD".into(),
            approvals: vec!["a".into()],
            passed_checks: vec!["ci".into()],
        };
        assert!(gm.evaluate_gate(&eval).is_err());
        eval.approvals.push("b".into());
        assert!(gm.evaluate_gate(&eval).is_ok());
    }
}
