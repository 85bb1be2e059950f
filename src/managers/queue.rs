//! Job queue and run history.
//!
//! Jobs move `pending → running → succeeded | failed`, and may be `canceled` from
//! `pending` or `running`. `failed` and `canceled` jobs can be retried back to `pending`.
//! Enqueue is idempotent on `idempotency_key`: a repeat returns the existing job.

use super::{bounded, now, require, ManagerError, ManagerResult};
use crate::store::{Collection, Identified};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

pub const DEFAULT_MAX_PENDING: usize = 100;
pub const DEFAULT_MAX_RUNNING: usize = 10;
pub const DEFAULT_STUCK_AGE_SECONDS: i64 = 900;
/// Oldest cutoff `recover_stuck` accepts (30 days).
pub const MAX_STUCK_AGE_SECONDS: i64 = 30 * 24 * 3600;

/// Effective cutoff for [`QueueManager::recover_stuck`].
pub fn stuck_age(max_age_seconds: i64) -> i64 {
    bounded(max_age_seconds, DEFAULT_STUCK_AGE_SECONDS, MAX_STUCK_AGE_SECONDS)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Canceled => "canceled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub config_path: String,
    pub priority: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub idempotency_key: String,
    pub status: JobStatus,
    pub force: bool,
    /// Producer of the job (`api`, `command`, `checkpoint`, `gitops`, ...)
    pub source: String,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_node: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Identified for Job {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Enqueue request after adapter-level normalization.
#[derive(Debug, Clone, Default)]
pub struct JobRequest {
    pub config_path: String,
    pub priority: String,
    pub idempotency_key: String,
    pub force: bool,
    pub source: String,
}

/// `high`, `normal` (default) or `low`.
pub fn normalize_priority(raw: &str) -> ManagerResult<String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "normal" => Ok("normal".to_string()),
        p @ ("high" | "low") => Ok(p.to_string()),
        other => Err(ManagerError::invalid(format!(
            "priority must be high, normal or low (got {other:?})"
        ))),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub config_path: String,
    pub status: String,
    pub resources_changed: u32,
    pub summary: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl Identified for Run {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RunInput {
    pub job_id: String,
    pub config_path: String,
    pub status: String,
    pub resources_changed: u32,
    pub summary: String,
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct Capacity {
    pub max_pending: usize,
    pub max_running: usize,
}

#[derive(Debug, Clone, Copy, Serialize)]
struct QueueFlags {
    paused: bool,
    draining: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub paused: bool,
    pub draining: bool,
    pub pending: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub canceled: usize,
    pub total: usize,
    pub max_pending: usize,
    pub max_running: usize,
}

pub struct QueueManager {
    jobs: Collection<Job>,
    runs: Collection<Run>,
    flags: RwLock<QueueFlags>,
    capacity: RwLock<Capacity>,
}

impl Default for QueueManager {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueManager {
    pub fn new() -> Self {
        Self {
            jobs: Collection::new(),
            runs: Collection::new(),
            flags: RwLock::new(QueueFlags {
                paused: false,
                draining: false,
            }),
            capacity: RwLock::new(Capacity {
                max_pending: DEFAULT_MAX_PENDING,
                max_running: DEFAULT_MAX_RUNNING,
            }),
        }
    }

    /// Returns the job and whether it was newly created.
    pub fn enqueue(&self, req: JobRequest) -> ManagerResult<(Job, bool)> {
        let config_path = require("config_path", &req.config_path)?;
        let priority = normalize_priority(&req.priority)?;
        let key = req.idempotency_key.trim().to_string();
        let flags = *self.flags.read();
        let capacity = *self.capacity.read();

        self.jobs.with_all(|jobs| {
            if !key.is_empty() {
                if let Some(existing) = jobs.iter().find(|j| j.idempotency_key == key) {
                    debug!(job_id = %existing.id, idempotency_key = %key, "duplicate enqueue");
                    return Ok((existing.clone(), false));
                }
            }
            if flags.paused || flags.draining {
                return Err(ManagerError::denied(
                    "queue is not accepting jobs",
                    json!({ "paused": flags.paused, "draining": flags.draining }),
                ));
            }
            let pending = jobs.iter().filter(|j| j.status == JobStatus::Pending).count();
            if pending >= capacity.max_pending {
                return Err(ManagerError::denied(
                    "queue saturated",
                    json!({ "pending": pending, "max_pending": capacity.max_pending }),
                ));
            }
            let ts = now();
            let job = Job {
                id: crate::ids::new_id("job"),
                config_path,
                priority,
                idempotency_key: key,
                status: JobStatus::Pending,
                force: req.force,
                source: if req.source.is_empty() {
                    "api".to_string()
                } else {
                    req.source
                },
                attempts: 0,
                assigned_node: None,
                created_at: ts,
                updated_at: ts,
            };
            jobs.push(job.clone());
            info!(job_id = %job.id, config_path = %job.config_path, priority = %job.priority, "job enqueued");
            Ok((job, true))
        })
    }

    pub fn get(&self, id: &str) -> ManagerResult<Job> {
        self.jobs
            .get(id)
            .ok_or_else(|| ManagerError::not_found("job not found"))
    }

    pub fn list(&self, status: Option<&str>, limit: usize) -> Vec<Job> {
        self.jobs
            .list_filtered(limit, |j| status.is_none_or(|s| j.status.as_str() == s))
    }

    pub fn all_jobs(&self) -> Vec<Job> {
        self.jobs.snapshot()
    }

    pub fn cancel(&self, id: &str) -> ManagerResult<Job> {
        self.jobs.update(id, "job", |job| match job.status {
            JobStatus::Pending | JobStatus::Running => {
                job.status = JobStatus::Canceled;
                job.updated_at = now();
                Ok(job.clone())
            }
            other => Err(invalid_transition(job, other, "cancel")),
        })
    }

    pub fn retry(&self, id: &str) -> ManagerResult<Job> {
        self.jobs.update(id, "job", |job| match job.status {
            JobStatus::Failed | JobStatus::Canceled => {
                job.status = JobStatus::Pending;
                job.attempts += 1;
                job.assigned_node = None;
                job.updated_at = now();
                Ok(job.clone())
            }
            other => Err(invalid_transition(job, other, "retry")),
        })
    }

    /// Hand a pending job to `node`; it becomes `running`.
    pub fn assign(&self, id: &str, node: &str) -> ManagerResult<Job> {
        let max_running = self.capacity.read().max_running;
        let running = self.jobs.count_where(|j| j.status == JobStatus::Running);
        self.jobs.update(id, "job", |job| {
            if job.status != JobStatus::Pending {
                return Err(invalid_transition(job, job.status, "dispatch"));
            }
            if running >= max_running {
                return Err(ManagerError::denied(
                    "running capacity exhausted",
                    json!({ "running": running, "max_running": max_running }),
                ));
            }
            job.status = JobStatus::Running;
            job.assigned_node = Some(node.to_string());
            job.updated_at = now();
            Ok(job.clone())
        })
    }

    /// Requeue `running` jobs untouched for longer than `max_age_seconds`.
    pub fn recover_stuck(&self, max_age_seconds: i64) -> Vec<Job> {
        let age = stuck_age(max_age_seconds);
        let cutoff = now() - Duration::seconds(age);
        let recovered = self.jobs.update_where(
            |j| j.status == JobStatus::Running && j.updated_at <= cutoff,
            |j| {
                j.status = JobStatus::Pending;
                j.assigned_node = None;
                j.attempts += 1;
                j.updated_at = now();
            },
        );
        if !recovered.is_empty() {
            info!(count = recovered.len(), max_age_seconds = age, "recovered stuck jobs");
        }
        recovered
    }

    /// `pause`, `resume` or `drain` (drain cancels everything still pending).
    pub fn control(&self, action: &str) -> ManagerResult<(QueueSnapshot, usize)> {
        let mut affected = 0;
        match action {
            "pause" => self.flags.write().paused = true,
            "resume" => {
                let mut flags = self.flags.write();
                flags.paused = false;
                flags.draining = false;
            }
            "drain" => {
                self.flags.write().draining = true;
                affected = self
                    .jobs
                    .update_where(
                        |j| j.status == JobStatus::Pending,
                        |j| {
                            j.status = JobStatus::Canceled;
                            j.updated_at = now();
                        },
                    )
                    .len();
            }
            other => {
                return Err(ManagerError::invalid(format!(
                    "action must be pause, resume or drain (got {other:?})"
                )))
            }
        }
        Ok((self.snapshot(), affected))
    }

    pub fn capacity(&self) -> Capacity {
        *self.capacity.read()
    }

    pub fn set_capacity(&self, max_pending: usize, max_running: usize) -> ManagerResult<Capacity> {
        if max_pending == 0 || max_running == 0 {
            return Err(ManagerError::invalid(
                "max_pending and max_running must be positive",
            ));
        }
        let next = Capacity {
            max_pending,
            max_running,
        };
        *self.capacity.write() = next;
        Ok(next)
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let jobs = self.jobs.snapshot();
        let count = |s: JobStatus| jobs.iter().filter(|j| j.status == s).count();
        let flags = *self.flags.read();
        let capacity = *self.capacity.read();
        QueueSnapshot {
            paused: flags.paused,
            draining: flags.draining,
            pending: count(JobStatus::Pending),
            running: count(JobStatus::Running),
            succeeded: count(JobStatus::Succeeded),
            failed: count(JobStatus::Failed),
            canceled: count(JobStatus::Canceled),
            total: jobs.len(),
            max_pending: capacity.max_pending,
            max_running: capacity.max_running,
        }
    }

    /// Record a finished run; a referenced job takes the run's outcome.
    pub fn record_run(&self, input: RunInput) -> ManagerResult<Run> {
        let status = match input.status.trim().to_ascii_lowercase().as_str() {
            "" | "succeeded" | "success" => "succeeded",
            "failed" | "failure" => "failed",
            other => {
                return Err(ManagerError::invalid(format!(
                    "status must be succeeded or failed (got {other:?})"
                )))
            }
        };
        let job_id = Some(input.job_id.trim().to_string()).filter(|s| !s.is_empty());
        let mut config_path = input.config_path.trim().to_string();
        if let Some(id) = &job_id {
            let job = self.jobs.update(id, "job", |job| {
                job.status = if status == "succeeded" {
                    JobStatus::Succeeded
                } else {
                    JobStatus::Failed
                };
                job.updated_at = now();
                Ok(job.clone())
            })?;
            if config_path.is_empty() {
                config_path = job.config_path;
            }
        }
        let config_path = require("config_path", &config_path)?;
        let finished_at = now();
        let run = Run {
            id: crate::ids::new_id("run"),
            job_id,
            config_path,
            status: status.to_string(),
            resources_changed: input.resources_changed,
            summary: input.summary.trim().to_string(),
            started_at: input.started_at.unwrap_or(finished_at),
            finished_at,
        };
        Ok(self.runs.insert(run))
    }

    pub fn list_runs(&self, status: Option<&str>, limit: usize) -> Vec<Run> {
        self.runs
            .list_filtered(limit, |r| status.is_none_or(|s| r.status == s))
    }

    pub fn get_run(&self, id: &str) -> ManagerResult<Run> {
        self.runs
            .get(id)
            .ok_or_else(|| ManagerError::not_found("run not found"))
    }

    pub fn all_runs(&self) -> Vec<Run> {
        self.runs.snapshot()
    }

    /// Replace job and run history wholesale (backup restore).
    pub fn restore(&self, jobs: Vec<Job>, runs: Vec<Run>) {
        self.jobs.replace_all(jobs);
        self.runs.replace_all(runs);
    }
}

fn invalid_transition(job: &Job, from: JobStatus, action: &str) -> ManagerError {
    ManagerError::denied(
        "invalid job transition",
        json!({ "job_id": job.id, "status": from.as_str(), "action": action }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(path: &str, key: &str) -> JobRequest {
        JobRequest {
            config_path: path.to_string(),
            idempotency_key: key.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_enqueue_is_idempotent() {
        let q = QueueManager::new();
        let (a, created) = q.enqueue(req("site.yaml", "k1")).unwrap();
        assert!(created);
        let (b, created) = q.enqueue(req("site.yaml", "k1")).unwrap();
        assert!(!created);
        assert_eq!(a.id, b.id);
        assert_eq!(q.list(None, 100).len(), 1);
    }

    #[test]
    fn test_saturation_denies() {
        let q = QueueManager::new();
        q.set_capacity(1, 1).unwrap();
        q.enqueue(req("a.yaml", "")).unwrap();
        let err = q.enqueue(req("b.yaml", "")).unwrap_err();
        assert!(matches!(err, ManagerError::Denied { .. }));
    }

    #[test]
    fn test_cancel_and_retry_transitions() {
        let q = QueueManager::new();
        let (job, _) = q.enqueue(req("a.yaml", "")).unwrap();
        assert_eq!(q.cancel(&job.id).unwrap().status, JobStatus::Canceled);
        assert!(matches!(q.cancel(&job.id), Err(ManagerError::Denied { .. })));
        let retried = q.retry(&job.id).unwrap();
        assert_eq!(retried.status, JobStatus::Pending);
        assert_eq!(retried.attempts, 1);
        assert!(matches!(q.retry(&job.id), Err(ManagerError::Denied { .. })));
        assert!(matches!(q.cancel("job-missing"), Err(ManagerError::NotFound(_))));
    }

    #[test]
    fn test_pause_blocks_and_drain_cancels() {
        let q = QueueManager::new();
        q.enqueue(req("a.yaml", "")).unwrap();
        q.control("pause").unwrap();
        assert!(q.enqueue(req("b.yaml", "")).is_err());
        q.control("resume").unwrap();
        let (snap, drained) = q.control("drain").unwrap();
        assert_eq!(drained, 1);
        assert_eq!(snap.canceled, 1);
        assert!(snap.draining);
        assert!(q.control("explode").is_err());
    }

    #[test]
    fn test_recover_stuck_requeues_running() {
        let q = QueueManager::new();
        let (job, _) = q.enqueue(req("a.yaml", "")).unwrap();
        q.assign(&job.id, "web-01").unwrap();
        assert!(q.recover_stuck(3600).is_empty());
        std::thread::sleep(std::time::Duration::from_millis(1100));
        let recovered = q.recover_stuck(1);
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].status, JobStatus::Pending);
    }

    #[test]
    fn test_record_run_completes_job() {
        let q = QueueManager::new();
        let (job, _) = q.enqueue(req("a.yaml", "")).unwrap();
        let run = q
            .record_run(RunInput {
                job_id: job.id.clone(),
                status: "failed".into(),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(run.config_path, "a.yaml");
        assert_eq!(q.get(&job.id).unwrap().status, JobStatus::Failed);
        assert!(q.record_run(RunInput::default()).is_err());
    }

    #[test]
    fn test_priority_normalization() {
        assert_eq!(normalize_priority("").unwrap(), "normal");
        assert_eq!(normalize_priority(" HIGH ").unwrap(), "high");
        assert!(normalize_priority("urgent").is_err());
    }
}
