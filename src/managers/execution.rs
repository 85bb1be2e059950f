//! Execution plane: environments, scoped credentials, resource locks, admission and
//! preflight checks, checkpoints with resume, snapshots, patch and reboot plans, image
//! bakes, artifact deployments and relays.

use super::control::ControlManager;
use super::packages::PackagesManager;
use super::queue::{Job, JobRequest, QueueManager};
use super::{bounded, clean_list, now, require, require_lower, ManagerError, ManagerResult};
use crate::crypto::{canonical_json, sha256_hex, Signer};
use crate::ids::new_id;
use crate::paths::{write_state_json, StateDir};
use crate::planner::ConfigDocument;
use crate::store::{Collection, Identified};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const DEFAULT_CREDENTIAL_TTL_SECONDS: i64 = 3600;
pub const DEFAULT_LOCK_TTL_SECONDS: i64 = 900;
/// Longest credential a caller may request (7 days).
pub const MAX_CREDENTIAL_TTL_SECONDS: i64 = 7 * 24 * 3600;
/// Longest lock lease (24 hours).
pub const MAX_LOCK_TTL_SECONDS: i64 = 24 * 3600;

#[derive(Debug, Clone, Serialize)]
pub struct ExecEnvironment {
    pub id: String,
    pub name: String,
    pub description: String,
    pub max_parallel: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExecEnvironmentInput {
    pub name: String,
    pub description: String,
    pub max_parallel: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Credential {
    pub id: String,
    pub subject: String,
    pub scopes: Vec<String>,
    pub revoked: bool,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CredentialIssueInput {
    pub subject: String,
    pub scopes: Vec<String>,
    pub ttl_seconds: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CredentialValidateInput {
    pub token: String,
    pub scope: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct CredentialClaims {
    jti: String,
    sub: String,
    scopes: Vec<String>,
    exp: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionLock {
    pub resource: String,
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Identified for ExecutionLock {
    fn id(&self) -> &str {
        &self.resource
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LockInput {
    pub resource: String,
    pub holder: String,
    pub ttl_seconds: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Check {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AdmissionInput {
    pub environment: String,
    pub resource: String,
    pub holder: String,
    pub force: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Checkpoint {
    pub id: String,
    pub config_path: String,
    pub run_id: String,
    pub completed_steps: Vec<String>,
    pub note: String,
    pub resumes: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CheckpointInput {
    pub config_path: String,
    pub run_id: String,
    pub completed_steps: Vec<String>,
    pub note: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Resumption {
    pub checkpoint: Checkpoint,
    pub resume_path: String,
    pub remaining: usize,
    pub job: Job,
}

#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub id: String,
    pub name: String,
    pub scope: String,
    pub digest: String,
    pub data: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SnapshotInput {
    pub name: String,
    pub scope: String,
    pub data: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct RolloutPlan {
    pub id: String,
    pub kind: &'static str,
    pub name: String,
    pub packages: Vec<String>,
    pub batch_size: usize,
    pub batches: Vec<Vec<String>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RolloutPlanInput {
    pub name: String,
    pub nodes: Vec<String>,
    pub packages: Vec<String>,
    pub batch_size: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageBake {
    pub id: String,
    pub image: String,
    pub base_image: String,
    pub config_path: String,
    pub job_id: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ImageBakeInput {
    pub image: String,
    pub base_image: String,
    pub config_path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArtifactDeployment {
    pub id: String,
    pub artifact_id: String,
    pub artifact: String,
    pub version: String,
    pub environment: String,
    pub job_id: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ArtifactDeploymentInput {
    pub artifact_id: String,
    pub name: String,
    pub version: String,
    pub checksum: String,
    pub environment: String,
    pub config_path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Relay {
    pub id: String,
    pub name: String,
    pub region: String,
    pub endpoint: String,
    pub capacity: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RelayInput {
    pub name: String,
    pub region: String,
    pub endpoint: String,
    pub capacity: u32,
}

identified!(
    ExecEnvironment,
    Credential,
    Checkpoint,
    Snapshot,
    RolloutPlan,
    ImageBake,
    ArtifactDeployment,
    Relay,
);

#[derive(Default)]
pub struct ExecutionManager {
    environments: Collection<ExecEnvironment>,
    credentials: Collection<Credential>,
    locks: Collection<ExecutionLock>,
    checkpoints: Collection<Checkpoint>,
    snapshots: Collection<Snapshot>,
    patch_plans: Collection<RolloutPlan>,
    reboot_plans: Collection<RolloutPlan>,
    image_bakes: Collection<ImageBake>,
    deployments: Collection<ArtifactDeployment>,
    relays: Collection<Relay>,
}

impl ExecutionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_environment(&self, input: ExecEnvironmentInput) -> ManagerResult<ExecEnvironment> {
        let name = require_lower("name", &input.name)?;
        let env = ExecEnvironment {
            id: new_id("exec-env"),
            name: name.clone(),
            description: input.description.trim().to_string(),
            max_parallel: input.max_parallel.max(1),
            created_at: now(),
        };
        self.environments
            .insert_unique(env, |e| e.name == name, "environment")
    }

    pub fn list_environments(&self, limit: usize) -> Vec<ExecEnvironment> {
        self.environments.list(limit)
    }

    /// Issue an HS256 credential; the token is only ever returned here.
    pub fn issue_credential(&self, signer: &Signer, input: CredentialIssueInput) -> ManagerResult<(Credential, String)> {
        let subject = require("subject", &input.subject)?;
        let scopes = clean_list(&input.scopes);
        if scopes.is_empty() {
            return Err(ManagerError::invalid("scopes is required"));
        }
        let ttl = bounded(
            input.ttl_seconds,
            DEFAULT_CREDENTIAL_TTL_SECONDS,
            MAX_CREDENTIAL_TTL_SECONDS,
        );
        let issued_at = now();
        let cred = Credential {
            id: new_id("cred"),
            subject,
            scopes,
            revoked: false,
            issued_at,
            expires_at: issued_at + Duration::seconds(ttl),
        };
        let token = signer.sign(&CredentialClaims {
            jti: cred.id.clone(),
            sub: cred.subject.clone(),
            scopes: cred.scopes.clone(),
            exp: cred.expires_at.timestamp(),
        })?;
        Ok((self.credentials.insert(cred), token))
    }

    pub fn list_credentials(&self, limit: usize) -> Vec<Credential> {
        self.credentials.list(limit)
    }

    /// Signature, revocation and expiry failures are `Unauthorized`; a scope the
    /// credential does not carry is `Forbidden`.
    pub fn validate_credential(&self, signer: &Signer, input: &CredentialValidateInput) -> ManagerResult<Credential> {
        let token = require("token", &input.token)?;
        let claims: CredentialClaims = signer.verify(&token)?;
        let cred = self
            .credentials
            .get(&claims.jti)
            .ok_or_else(|| ManagerError::Unauthorized("unknown credential".to_string()))?;
        if cred.revoked {
            return Err(ManagerError::Unauthorized("credential revoked".to_string()));
        }
        if cred.expires_at <= now() {
            return Err(ManagerError::Unauthorized("credential expired".to_string()));
        }
        let scope = input.scope.trim();
        if !scope.is_empty() && !cred.scopes.iter().any(|s| s == scope || s == "*") {
            return Err(ManagerError::Forbidden(format!("scope {scope} not granted")));
        }
        Ok(cred)
    }

    pub fn revoke_credential(&self, id: &str) -> ManagerResult<Credential> {
        self.credentials.update(id.trim(), "credential", |c| {
            c.revoked = true;
            Ok(c.clone())
        })
    }

    /// Acquire or refresh. Returns the lock and whether it was newly taken.
    pub fn acquire_lock(&self, input: LockInput) -> ManagerResult<(ExecutionLock, bool)> {
        let resource = require("resource", &input.resource)?;
        let holder = require("holder", &input.holder)?;
        let ttl = bounded(input.ttl_seconds, DEFAULT_LOCK_TTL_SECONDS, MAX_LOCK_TTL_SECONDS);
        let at = now();
        let next = ExecutionLock {
            resource: resource.clone(),
            holder: holder.clone(),
            acquired_at: at,
            expires_at: at + Duration::seconds(ttl),
        };
        self.locks.with_all(|locks| {
            match locks.iter_mut().find(|l| l.resource == resource) {
                Some(existing) if existing.expires_at > at && existing.holder != holder => {
                    Err(ManagerError::denied(
                        "lock held by another holder",
                        json!({ "resource": resource, "holder": existing.holder, "expires_at": existing.expires_at }),
                    ))
                }
                Some(existing) => {
                    let fresh = existing.holder != holder;
                    *existing = next.clone();
                    Ok((next, fresh))
                }
                None => {
                    locks.push(next.clone());
                    Ok((next, true))
                }
            }
        })
    }

    pub fn list_locks(&self, limit: usize) -> Vec<ExecutionLock> {
        let at = now();
        self.locks.list_filtered(limit, |l| l.expires_at > at)
    }

    pub fn release_lock(&self, resource: &str, holder: &str) -> ManagerResult<ExecutionLock> {
        let resource = require("resource", resource)?;
        let holder = require("holder", holder)?;
        self.locks.with_all(|locks| {
            let pos = locks
                .iter()
                .position(|l| l.resource == resource)
                .ok_or_else(|| ManagerError::not_found("lock not found"))?;
            if locks[pos].holder != holder {
                return Err(ManagerError::denied(
                    "lock holder mismatch",
                    json!({ "resource": resource, "holder": locks[pos].holder }),
                ));
            }
            Ok(locks.remove(pos))
        })
    }

    /// Gate checks shared by preflight and admission.
    pub fn gate_checks(&self, control: &ControlManager, queue: &QueueManager, force: bool) -> Vec<Check> {
        let stop = control.emergency_stop();
        let freeze = control.freeze();
        let snapshot = queue.snapshot();
        vec![
            Check {
                name: "emergency_stop",
                passed: !stop.enabled,
                detail: if stop.enabled { stop.reason } else { "inactive".to_string() },
            },
            Check {
                name: "change_freeze",
                passed: !freeze.is_active() || force,
                detail: if freeze.is_active() { freeze.reason } else { "inactive".to_string() },
            },
            Check {
                name: "queue_accepting",
                passed: !snapshot.paused && !snapshot.draining,
                detail: format!("paused={} draining={}", snapshot.paused, snapshot.draining),
            },
            Check {
                name: "queue_capacity",
                passed: snapshot.pending < snapshot.max_pending,
                detail: format!("{}/{} pending", snapshot.pending, snapshot.max_pending),
            },
        ]
    }

    /// All gate checks pass, else a denial listing them.
    pub fn preflight(&self, control: &ControlManager, queue: &QueueManager) -> ManagerResult<Value> {
        let checks = self.gate_checks(control, queue, false);
        checks_outcome("preflight failed", json!({}), checks)
    }

    /// Gate checks plus environment existence and lock ownership.
    pub fn admission_check(
        &self,
        control: &ControlManager,
        queue: &QueueManager,
        input: &AdmissionInput,
    ) -> ManagerResult<Value> {
        let environment = require_lower("environment", &input.environment)?;
        let mut checks = self.gate_checks(control, queue, input.force);
        let known = self.environments.find(|e| e.name == environment).is_some();
        checks.push(Check {
            name: "environment_registered",
            passed: known,
            detail: environment.clone(),
        });
        let resource = input.resource.trim();
        if !resource.is_empty() {
            let at = now();
            let holder = self
                .locks
                .find(|l| l.resource == resource && l.expires_at > at)
                .map(|l| l.holder);
            let passed = holder
                .as_deref()
                .is_none_or(|h| h == input.holder.trim());
            checks.push(Check {
                name: "resource_lock",
                passed,
                detail: holder.unwrap_or_else(|| "unlocked".to_string()),
            });
        }
        checks_outcome(
            "admission check failed",
            json!({ "environment": environment }),
            checks,
        )
    }

    pub fn create_checkpoint(&self, config_path: &Path, input: CheckpointInput) -> ManagerResult<Checkpoint> {
        let cp = Checkpoint {
            id: new_id("checkpoint"),
            config_path: config_path.display().to_string(),
            run_id: input.run_id.trim().to_string(),
            completed_steps: clean_list(&input.completed_steps),
            note: input.note.trim().to_string(),
            resumes: 0,
            created_at: now(),
        };
        Ok(self.checkpoints.insert(cp))
    }

    pub fn list_checkpoints(&self, limit: usize) -> Vec<Checkpoint> {
        self.checkpoints.list(limit)
    }

    /// Write the remaining resources to `resume/<id>.json` and enqueue it.
    pub fn resume_checkpoint(
        &self,
        base_dir: &Path,
        queue: &QueueManager,
        id: &str,
        force: bool,
    ) -> ManagerResult<Resumption> {
        let cp = self
            .checkpoints
            .get(id)
            .ok_or_else(|| ManagerError::not_found("checkpoint not found"))?;
        let source = PathBuf::from(&cp.config_path);
        if !source.exists() {
            return Err(ManagerError::invalid(crate::paths::CONFIG_PATH_NOT_FOUND));
        }
        let doc = ConfigDocument::load(&source)?;
        let remaining: Vec<_> = doc
            .resources
            .into_iter()
            .filter(|r| !cp.completed_steps.iter().any(|s| s == r.id.trim()))
            .collect();
        let derived = json!({
            "version": doc.version,
            "checkpoint_id": cp.id,
            "source": cp.config_path,
            "resources": remaining,
        });
        let path = write_state_json(base_dir, StateDir::Resume, &cp.id, &derived)?;
        let (job, _) = queue.enqueue(JobRequest {
            config_path: path.display().to_string(),
            priority: "high".to_string(),
            idempotency_key: String::new(),
            force,
            source: "checkpoint".to_string(),
        })?;
        let checkpoint = self.checkpoints.update(&cp.id, "checkpoint", |c| {
            c.resumes += 1;
            Ok(c.clone())
        })?;
        info!(checkpoint_id = %checkpoint.id, job_id = %job.id, remaining = remaining.len(), "checkpoint resumed");
        Ok(Resumption {
            checkpoint,
            resume_path: path.display().to_string(),
            remaining: remaining.len(),
            job,
        })
    }

    pub fn create_snapshot(&self, input: SnapshotInput) -> ManagerResult<Snapshot> {
        let name = require("name", &input.name)?;
        let scope = match input.scope.trim() {
            "" => "global".to_string(),
            s => s.to_string(),
        };
        let snap = Snapshot {
            id: new_id("snapshot"),
            name,
            scope,
            digest: sha256_hex(canonical_json(&input.data).as_bytes()),
            data: input.data,
            created_at: now(),
        };
        Ok(self.snapshots.insert(snap))
    }

    pub fn list_snapshots(&self, limit: usize) -> Vec<Snapshot> {
        self.snapshots.list(limit)
    }

    pub fn create_patch_plan(&self, input: RolloutPlanInput) -> ManagerResult<RolloutPlan> {
        let plan = rollout_plan("patch", input)?;
        Ok(self.patch_plans.insert(plan))
    }

    pub fn list_patch_plans(&self, limit: usize) -> Vec<RolloutPlan> {
        self.patch_plans.list(limit)
    }

    pub fn create_reboot_plan(&self, input: RolloutPlanInput) -> ManagerResult<RolloutPlan> {
        let plan = rollout_plan("reboot", input)?;
        Ok(self.reboot_plans.insert(plan))
    }

    pub fn list_reboot_plans(&self, limit: usize) -> Vec<RolloutPlan> {
        self.reboot_plans.list(limit)
    }

    pub fn bake_image(&self, queue: &QueueManager, config_path: &Path, input: ImageBakeInput, force: bool) -> ManagerResult<ImageBake> {
        let image = require("image", &input.image)?;
        let (job, _) = queue.enqueue(JobRequest {
            config_path: config_path.display().to_string(),
            priority: "low".to_string(),
            idempotency_key: String::new(),
            force,
            source: "image-bake".to_string(),
        })?;
        let bake = ImageBake {
            id: new_id("bake"),
            image,
            base_image: input.base_image.trim().to_string(),
            config_path: job.config_path,
            job_id: job.id,
            status: "queued".to_string(),
            created_at: now(),
        };
        Ok(self.image_bakes.insert(bake))
    }

    pub fn list_image_bakes(&self, limit: usize) -> Vec<ImageBake> {
        self.image_bakes.list(limit)
    }

    /// Deploy a registered artifact after checking the caller's checksum against
    /// the registry.
    pub fn deploy_artifact(
        &self,
        packages: &PackagesManager,
        queue: &QueueManager,
        config_path: &Path,
        input: ArtifactDeploymentInput,
        force: bool,
    ) -> ManagerResult<ArtifactDeployment> {
        let environment = require_lower("environment", &input.environment)?;
        let artifact = if input.artifact_id.trim().is_empty() {
            packages.find_artifact(&input.name, &input.version)
        } else {
            packages.get_artifact(input.artifact_id.trim())
        }
        .ok_or_else(|| ManagerError::not_found("artifact not found"))?;
        let checksum = require("checksum", &input.checksum)?.to_lowercase();
        if checksum != artifact.checksum {
            return Err(ManagerError::denied(
                "artifact checksum mismatch",
                json!({ "artifact_id": artifact.id, "expected": artifact.checksum, "actual": checksum }),
            ));
        }
        let (job, _) = queue.enqueue(JobRequest {
            config_path: config_path.display().to_string(),
            priority: "normal".to_string(),
            idempotency_key: String::new(),
            force,
            source: "artifact-deployment".to_string(),
        })?;
        debug!(artifact_id = %artifact.id, job_id = %job.id, "artifact deployment enqueued");
        let deployment = ArtifactDeployment {
            id: new_id("deploy"),
            artifact_id: artifact.id,
            artifact: artifact.name,
            version: artifact.version,
            environment,
            job_id: job.id,
            status: "queued".to_string(),
            created_at: now(),
        };
        Ok(self.deployments.insert(deployment))
    }

    pub fn list_artifact_deployments(&self, limit: usize) -> Vec<ArtifactDeployment> {
        self.deployments.list(limit)
    }

    pub fn create_relay(&self, input: RelayInput) -> ManagerResult<Relay> {
        let name = require_lower("name", &input.name)?;
        let endpoint = require("endpoint", &input.endpoint)?;
        url::Url::parse(&endpoint).map_err(|e| ManagerError::invalid(format!("invalid endpoint: {e}")))?;
        let relay = Relay {
            id: new_id("relay"),
            name: name.clone(),
            region: input.region.trim().to_lowercase(),
            endpoint,
            capacity: input.capacity,
            created_at: now(),
        };
        self.relays.insert_unique(relay, |r| r.name == name, "relay")
    }

    pub fn list_relays(&self, limit: usize) -> Vec<Relay> {
        self.relays.list(limit)
    }
}

fn checks_outcome(reason: &str, mut body: Value, checks: Vec<Check>) -> ManagerResult<Value> {
    let passed = checks.iter().all(|c| c.passed);
    let failing: Vec<&str> = checks.iter().filter(|c| !c.passed).map(|c| c.name).collect();
    if let Value::Object(map) = &mut body {
        map.insert("passed".into(), json!(passed));
        map.insert("failing".into(), json!(failing));
        map.insert("checks".into(), serde_json::to_value(&checks)?);
    }
    if passed {
        Ok(body)
    } else {
        Err(ManagerError::denied(reason, body))
    }
}

fn rollout_plan(kind: &'static str, input: RolloutPlanInput) -> ManagerResult<RolloutPlan> {
    let name = require("name", &input.name)?;
    let nodes = clean_list(&input.nodes);
    if nodes.is_empty() {
        return Err(ManagerError::invalid("nodes is required"));
    }
    let batch_size = input.batch_size.max(1);
    Ok(RolloutPlan {
        id: new_id(kind),
        kind,
        name,
        packages: clean_list(&input.packages),
        batch_size,
        batches: nodes.chunks(batch_size).map(<[String]>::to_vec).collect(),
        created_at: now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managers::packages::ArtifactInput;

    #[test]
    fn test_credential_lifecycle() {
        let exec = ExecutionManager::new();
        let signer = Signer::new(Some("test-key"));
        let (cred, token) = exec
            .issue_credential(
                &signer,
                CredentialIssueInput {
                    subject: "deployer".into(),
                    scopes: vec!["apply".into()],
                    ttl_seconds: 60,
                },
            )
            .unwrap();
        let check = |scope: &str| {
            exec.validate_credential(
                &signer,
                &CredentialValidateInput {
                    token: token.clone(),
                    scope: scope.into(),
                },
            )
        };
        assert!(check("apply").is_ok());
        assert!(matches!(check("destroy"), Err(ManagerError::Forbidden(_))));
        exec.revoke_credential(&cred.id).unwrap();
        assert!(matches!(check("apply"), Err(ManagerError::Unauthorized(_))));

        let other = Signer::new(Some("other-key"));
        assert!(matches!(
            exec.validate_credential(
                &other,
                &CredentialValidateInput {
                    token,
                    scope: String::new()
                }
            ),
            Err(ManagerError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_locks() {
        let exec = ExecutionManager::new();
        let lock = |holder: &str| LockInput {
            resource: "db-cluster".into(),
            holder: holder.into(),
            ttl_seconds: 60,
        };
        assert!(exec.acquire_lock(lock("alice")).unwrap().1);
        assert!(!exec.acquire_lock(lock("alice")).unwrap().1);
        assert!(matches!(exec.acquire_lock(lock("bob")), Err(ManagerError::Denied { .. })));
        assert!(matches!(exec.release_lock("db-cluster", "bob"), Err(ManagerError::Denied { .. })));
        exec.release_lock("db-cluster", "alice").unwrap();
        assert!(matches!(exec.release_lock("db-cluster", "alice"), Err(ManagerError::NotFound(_))));
    }

    #[test]
    fn test_admission_check() {
        let exec = ExecutionManager::new();
        let control = ControlManager::new();
        let queue = QueueManager::new();
        exec.create_environment(ExecEnvironmentInput {
            name: "Prod".into(),
            ..Default::default()
        })
        .unwrap();
        let input = AdmissionInput {
            environment: "prod".into(),
            ..Default::default()
        };
        assert!(exec.admission_check(&control, &queue, &input).is_ok());
        control.set_freeze(true, "release", None).unwrap();
        let err = exec.admission_check(&control, &queue, &input).unwrap_err();
        match err {
            ManagerError::Denied { detail, .. } => assert_eq!(detail["failing"], json!(["change_freeze"])),
            other => panic!("unexpected {other:?}"),
        }
        let forced = AdmissionInput { force: true, ..input };
        assert!(exec.admission_check(&control, &queue, &forced).is_ok());
    }

    #[test]
    fn test_checkpoint_resume_writes_remaining() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("site.json");
        std::fs::write(
            &config,
            r#"{"resources":[{"id":"a","type":"file"},{"id":"b","type":"file"}]}"#,
        )
        .unwrap();
        let exec = ExecutionManager::new();
        let queue = QueueManager::new();
        let cp = exec
            .create_checkpoint(
                &config,
                CheckpointInput {
                    completed_steps: vec!["a".into()],
                    ..Default::default()
                },
            )
            .unwrap();
        let resumed = exec.resume_checkpoint(dir.path(), &queue, &cp.id, false).unwrap();
        assert_eq!(resumed.remaining, 1);
        assert_eq!(resumed.checkpoint.resumes, 1);
        let written: Value =
            serde_json::from_str(&std::fs::read_to_string(&resumed.resume_path).unwrap()).unwrap();
        assert_eq!(written["resources"][0]["id"], "b");
        assert_eq!(resumed.job.source, "checkpoint");
    }

    #[test]
    fn test_rollout_batches() {
        let plan = rollout_plan(
            "patch",
            RolloutPlanInput {
                name: "monthly".into(),
                nodes: vec!["a".into(), "b".into(), "c".into()],
                batch_size: 2,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(plan.batches, vec![vec!["a", "b"], vec!["c"]]);
    }

    #[test]
    fn test_artifact_deployment_checksum() {
        let exec = ExecutionManager::new();
        let packages = PackagesManager::new();
        let queue = QueueManager::new();
        let artifact = packages
            .register_artifact(ArtifactInput {
                name: "agent".into(),
                version: "1.2.0".into(),
                checksum: "ab".repeat(32),
                ..Default::default()
            })
            .unwrap();
        let input = |checksum: String| ArtifactDeploymentInput {
            artifact_id: artifact.id.clone(),
            checksum,
            environment: "prod".into(),
            ..Default::default()
        };
        let path = Path::new("/tmp/site.yaml");
        assert!(matches!(
            exec.deploy_artifact(&packages, &queue, path, input("cd".repeat(32)), false),
            Err(ManagerError::Denied { .. })
        ));
        let deployed = exec
            .deploy_artifact(&packages, &queue, path, input("ab".repeat(32)), false)
            .unwrap();
        assert_eq!(deployed.status, "queued");
    }
}
