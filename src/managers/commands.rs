//! Replay-safe command ingestion.
//!
//! External replayers attach a checksum over `action|config_path|priority|idempotency_key`.
//! A mismatching command is parked on the dead-letter list instead of being enqueued;
//! a matching one becomes a queue job keyed by its idempotency key.

use super::control::ControlManager;
use super::queue::{normalize_priority, Job, JobRequest, QueueManager};
use super::{now, require, require_lower, ManagerError, ManagerResult};
use crate::crypto::sha256_hex;
use crate::ids::new_id;
use crate::paths::resolve_config_path;
use crate::store::Collection;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

pub const COMMAND_ACTIONS: [&str; 3] = ["apply", "plan", "check"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandInput {
    pub action: String,
    pub config_path: String,
    pub priority: String,
    pub idempotency_key: String,
    pub checksum: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter {
    pub id: String,
    pub action: String,
    pub config_path: String,
    pub priority: String,
    pub idempotency_key: String,
    pub checksum: String,
    pub expected_checksum: String,
    pub reason: String,
    pub received_at: DateTime<Utc>,
}

identified!(DeadLetter);

#[derive(Debug, Clone)]
pub enum Ingested {
    /// The job and whether it was newly created.
    Enqueued(Job, bool),
    DeadLettered(DeadLetter),
}

/// Hex SHA-256 of `action|config_path|priority|idempotency_key`, each field trimmed.
pub fn command_checksum(action: &str, config_path: &str, priority: &str, idempotency_key: &str) -> String {
    let joined = [action, config_path, priority, idempotency_key]
        .iter()
        .map(|s| s.trim())
        .collect::<Vec<_>>()
        .join("|");
    sha256_hex(joined.as_bytes())
}

#[derive(Default)]
pub struct CommandsManager {
    dead_letters: Collection<DeadLetter>,
}

impl CommandsManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ingest(
        &self,
        base_dir: &Path,
        control: &ControlManager,
        queue: &QueueManager,
        input: &CommandInput,
        force: bool,
    ) -> ManagerResult<Ingested> {
        let action = require_lower("action", &input.action)?;
        if !COMMAND_ACTIONS.contains(&action.as_str()) {
            return Err(ManagerError::invalid("action must be apply, plan or check"));
        }
        let config_path = require("config_path", &input.config_path)?;
        let idempotency_key = require("idempotency_key", &input.idempotency_key)?;
        let checksum = require("checksum", &input.checksum)?.to_lowercase();
        let expected = command_checksum(&action, &config_path, &input.priority, &idempotency_key);
        if checksum != expected {
            let letter = self.dead_letters.insert(DeadLetter {
                id: new_id("dead-letter"),
                action,
                config_path,
                priority: input.priority.trim().to_string(),
                idempotency_key,
                checksum,
                expected_checksum: expected,
                reason: "checksum mismatch".to_string(),
                received_at: now(),
            });
            warn!(dead_letter_id = %letter.id, "command checksum mismatch");
            return Ok(Ingested::DeadLettered(letter));
        }
        let priority = normalize_priority(&input.priority)?;
        let resolved = resolve_config_path(base_dir, &config_path)?;
        control.check_enqueue(force)?;
        let (job, created) = queue.enqueue(JobRequest {
            config_path: resolved.display().to_string(),
            priority,
            idempotency_key,
            force,
            source: format!("command:{action}"),
        })?;
        if created {
            info!(job_id = %job.id, action = %action, "command ingested");
        }
        Ok(Ingested::Enqueued(job, created))
    }

    pub fn dead_letters(&self, limit: usize) -> Vec<DeadLetter> {
        self.dead_letters.list(limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, ControlManager, QueueManager, CommandsManager) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("site.yaml"), "resources: []\n").unwrap();
        (dir, ControlManager::new(), QueueManager::new(), CommandsManager::new())
    }

    fn input(checksum: String) -> CommandInput {
        CommandInput {
            action: "apply".into(),
            config_path: "site.yaml".into(),
            priority: "high".into(),
            idempotency_key: "evt-1".into(),
            checksum,
        }
    }

    #[test]
    fn test_checksum_is_pure() {
        let a = command_checksum("apply", "site.yaml", "high", "k");
        assert_eq!(a, command_checksum(" apply", "site.yaml ", "high", "k"));
        assert_ne!(a, command_checksum("apply", "site.yaml", "low", "k"));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_mismatch_dead_letters() {
        let (dir, control, queue, cm) = setup();
        let out = cm
            .ingest(dir.path(), &control, &queue, &input("00".repeat(32)), false)
            .unwrap();
        assert!(matches!(out, Ingested::DeadLettered(_)));
        assert_eq!(cm.dead_letters(100).len(), 1);
        assert!(queue.all_jobs().is_empty());
    }

    #[test]
    fn test_match_enqueues_once() {
        let (dir, control, queue, cm) = setup();
        let good = input(command_checksum("apply", "site.yaml", "high", "evt-1"));
        match cm.ingest(dir.path(), &control, &queue, &good, false).unwrap() {
            Ingested::Enqueued(job, created) => {
                assert!(created);
                assert_eq!(job.source, "command:apply");
            }
            other => panic!("expected enqueue, got {other:?}"),
        }
        match cm.ingest(dir.path(), &control, &queue, &good, false).unwrap() {
            Ingested::Enqueued(_, created) => assert!(!created),
            other => panic!("expected enqueue, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_action() {
        let (dir, control, queue, cm) = setup();
        let mut bad = input(String::new());
        bad.action = "destroy".into();
        assert!(matches!(
            cm.ingest(dir.path(), &control, &queue, &bad, false),
            Err(ManagerError::Invalid(_))
        ));
    }
}
