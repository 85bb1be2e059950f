//! Operational records: backups and restores, shift handoffs, checklists,
//! deployment/scale profiles, failover drills, schema migrations, release channels,
//! federation peers and the topology advisor.

use super::{clean_list, now, require, require_lower, ManagerError, ManagerResult};
use crate::crypto::sha256_hex;
use crate::ids::new_id;
use crate::store::{Collection, ObjectStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Backup {
    pub id: String,
    pub label: String,
    pub object_key: String,
    pub size: u64,
    pub sha256: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DrillResult {
    pub id: String,
    pub backup_id: String,
    pub passed: bool,
    pub detail: String,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Handoff {
    pub id: String,
    pub from: String,
    pub to: String,
    pub summary: String,
    pub open_incidents: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HandoffInput {
    pub from: String,
    pub to: String,
    pub summary: String,
    pub open_incidents: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChecklistItem {
    pub name: String,
    pub completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Checklist {
    pub id: String,
    pub name: String,
    pub items: Vec<ChecklistItem>,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeploymentProfile {
    pub id: String,
    pub name: String,
    pub environment: String,
    pub max_parallel: u32,
    pub require_approval: bool,
    /// UTC hours during which deployments are allowed; empty means any time
    pub allowed_hours: Vec<u32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DeploymentProfileInput {
    pub name: String,
    pub environment: String,
    pub max_parallel: u32,
    pub require_approval: bool,
    pub allowed_hours: Vec<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProfileEvaluation {
    pub profile: String,
    pub parallel: u32,
    pub approved: bool,
    pub hour: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailoverDrill {
    pub id: String,
    pub region: String,
    pub target_region: String,
    pub rto_seconds: u64,
    pub rpo_seconds: u64,
    pub passed: bool,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FailoverDrillInput {
    pub region: String,
    pub target_region: String,
    pub rto_seconds: u64,
    pub rpo_seconds: u64,
    pub rto_target_seconds: Option<u64>,
    pub rpo_target_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScaleProfile {
    pub id: String,
    pub name: String,
    pub min_workers: u32,
    pub max_workers: u32,
    pub target_queue_depth: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScaleProfileInput {
    pub name: String,
    pub min_workers: u32,
    pub max_workers: u32,
    pub target_queue_depth: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchemaMigration {
    pub id: String,
    pub version: u32,
    pub description: String,
    pub applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<DateTime<Utc>>,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
    pub description: String,
    pub min_soak_hours: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FederationPeer {
    pub id: String,
    pub name: String,
    pub endpoint: String,
    pub region: String,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TopologyInput {
    pub nodes: u32,
    pub regions: Vec<String>,
    pub target_availability: f64,
}

identified!(
    Backup,
    Handoff,
    Checklist,
    DeploymentProfile,
    FailoverDrill,
    ScaleProfile,
    SchemaMigration,
    Channel,
    FederationPeer,
    DrillResult,
);

#[derive(Default)]
pub struct OperationsManager {
    backups: Collection<Backup>,
    drills: Collection<DrillResult>,
    handoffs: Collection<Handoff>,
    checklists: Collection<Checklist>,
    deployment_profiles: Collection<DeploymentProfile>,
    failover_drills: Collection<FailoverDrill>,
    scale_profiles: Collection<ScaleProfile>,
    migrations: Collection<SchemaMigration>,
    channels: Collection<Channel>,
    peers: Collection<FederationPeer>,
}

impl OperationsManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize `state` into the object store and record the backup.
    pub fn create_backup(&self, store: &dyn ObjectStore, label: &str, state: &Value) -> ManagerResult<Backup> {
        let id = new_id("backup");
        let bytes = serde_json::to_vec(state)?;
        let info = store.put(&format!("{id}.json"), &bytes)?;
        let backup = Backup {
            id,
            label: label.trim().to_string(),
            object_key: info.key,
            size: info.size,
            sha256: info.sha256,
            created_at: now(),
        };
        info!(backup_id = %backup.id, size = backup.size, "backup written");
        Ok(self.backups.insert(backup))
    }

    pub fn list_backups(&self, limit: usize) -> Vec<Backup> {
        self.backups.list(limit)
    }

    /// Read a backup back and check its digest. A mismatch is a denial.
    pub fn load_backup(&self, store: &dyn ObjectStore, backup_id: &str) -> ManagerResult<(Backup, Value)> {
        let id = require("backup_id", backup_id)?;
        let backup = self
            .backups
            .get(&id)
            .ok_or_else(|| ManagerError::not_found("backup not found"))?;
        let bytes = store.get(&backup.object_key)?;
        let actual = sha256_hex(&bytes);
        if actual != backup.sha256 {
            return Err(ManagerError::denied(
                "backup checksum mismatch",
                json!({ "backup_id": backup.id, "expected": backup.sha256, "actual": actual }),
            ));
        }
        let state = serde_json::from_slice(&bytes)
            .map_err(|e| ManagerError::denied("backup is unreadable", json!({ "detail": e.to_string() })))?;
        Ok((backup, state))
    }

    /// Restore drill: load and verify a backup without applying it. The outcome is
    /// recorded whether or not it passed.
    pub fn drill(&self, store: &dyn ObjectStore, backup_id: Option<&str>) -> DrillResult {
        let target = backup_id
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .or_else(|| self.backups.list(1).pop().map(|b| b.id));
        let (backup_id, passed, detail) = match target {
            None => (String::new(), false, "no backups available".to_string()),
            Some(id) => match self.load_backup(store, &id) {
                Ok((b, state)) => {
                    let sections = state.as_object().map(|o| o.len()).unwrap_or(0);
                    (b.id, true, format!("verified {sections} state sections"))
                }
                Err(e) => (id, false, e.to_string()),
            },
        };
        let result = DrillResult {
            id: new_id("drill"),
            backup_id,
            passed,
            detail,
            checked_at: now(),
        };
        self.drills.insert(result)
    }

    pub fn create_handoff(&self, input: HandoffInput) -> ManagerResult<Handoff> {
        let handoff = Handoff {
            id: new_id("handoff"),
            from: require("from", &input.from)?,
            to: require("to", &input.to)?,
            summary: require("summary", &input.summary)?,
            open_incidents: clean_list(&input.open_incidents),
            created_at: now(),
        };
        Ok(self.handoffs.insert(handoff))
    }

    pub fn list_handoffs(&self, limit: usize) -> Vec<Handoff> {
        self.handoffs.list(limit)
    }

    pub fn create_checklist(&self, name: &str, items: &[String]) -> ManagerResult<Checklist> {
        let items = clean_list(items);
        if items.is_empty() {
            return Err(ManagerError::invalid("items are required"));
        }
        let checklist = Checklist {
            id: new_id("checklist"),
            name: require("name", name)?,
            items: items
                .into_iter()
                .map(|name| ChecklistItem {
                    name,
                    completed: false,
                    completed_at: None,
                })
                .collect(),
            completed: false,
            created_at: now(),
        };
        Ok(self.checklists.insert(checklist))
    }

    pub fn list_checklists(&self, limit: usize) -> Vec<Checklist> {
        self.checklists.list(limit)
    }

    pub fn complete_checklist_item(&self, id: &str, item: &str) -> ManagerResult<Checklist> {
        let item = require("item", item)?;
        self.checklists.update(id, "checklist", |list| {
            let entry = list
                .items
                .iter_mut()
                .find(|i| i.name == item)
                .ok_or_else(|| ManagerError::invalid(format!("unknown checklist item {item:?}")))?;
            if entry.completed {
                return Err(ManagerError::conflict("checklist item already completed"));
            }
            entry.completed = true;
            entry.completed_at = Some(now());
            list.completed = list.items.iter().all(|i| i.completed);
            Ok(list.clone())
        })
    }

    pub fn create_deployment_profile(&self, input: DeploymentProfileInput) -> ManagerResult<DeploymentProfile> {
        if input.allowed_hours.iter().any(|h| *h > 23) {
            return Err(ManagerError::invalid("allowed_hours must be between 0 and 23"));
        }
        let name = require_lower("name", &input.name)?;
        let profile = DeploymentProfile {
            id: new_id("profile"),
            environment: require_lower("environment", &input.environment)?,
            max_parallel: input.max_parallel.max(1),
            require_approval: input.require_approval,
            allowed_hours: input.allowed_hours,
            created_at: now(),
            name: name.clone(),
        };
        self.deployment_profiles
            .insert_unique(profile, |p| p.name == name, "deployment profile")
    }

    pub fn list_deployment_profiles(&self, limit: usize) -> Vec<DeploymentProfile> {
        self.deployment_profiles.list(limit)
    }

    /// `Ok` with the profile when allowed; a denial listing violations otherwise.
    pub fn evaluate_deployment_profile(&self, eval: &ProfileEvaluation) -> ManagerResult<Value> {
        let key = require_lower("profile", &eval.profile)?;
        let profile = self
            .deployment_profiles
            .find(|p| p.name == key || p.id == key)
            .ok_or_else(|| ManagerError::not_found("deployment profile not found"))?;
        let mut violations = Vec::new();
        if eval.parallel > profile.max_parallel {
            violations.push(format!(
                "parallel {} exceeds max_parallel {}",
                eval.parallel, profile.max_parallel
            ));
        }
        if profile.require_approval && !eval.approved {
            violations.push("approval required".to_string());
        }
        let hour = eval
            .hour
            .unwrap_or_else(|| chrono::Timelike::hour(&now()));
        if !profile.allowed_hours.is_empty() && !profile.allowed_hours.contains(&hour) {
            violations.push(format!("hour {hour} outside allowed window"));
        }
        let body = json!({
            "profile": profile.name,
            "allowed": violations.is_empty(),
            "violations": violations,
        });
        if violations.is_empty() {
            Ok(body)
        } else {
            Err(ManagerError::denied("deployment profile violated", body))
        }
    }

    pub fn record_failover_drill(&self, input: FailoverDrillInput) -> ManagerResult<FailoverDrill> {
        let rto_ok = input.rto_target_seconds.is_none_or(|t| input.rto_seconds <= t);
        let rpo_ok = input.rpo_target_seconds.is_none_or(|t| input.rpo_seconds <= t);
        let drill = FailoverDrill {
            id: new_id("failover"),
            region: require_lower("region", &input.region)?,
            target_region: require_lower("target_region", &input.target_region)?,
            rto_seconds: input.rto_seconds,
            rpo_seconds: input.rpo_seconds,
            passed: rto_ok && rpo_ok,
            recorded_at: now(),
        };
        if drill.region == drill.target_region {
            return Err(ManagerError::invalid("target_region must differ from region"));
        }
        Ok(self.failover_drills.insert(drill))
    }

    pub fn list_failover_drills(&self, limit: usize) -> Vec<FailoverDrill> {
        self.failover_drills.list(limit)
    }

    pub fn create_scale_profile(&self, input: ScaleProfileInput) -> ManagerResult<ScaleProfile> {
        if input.min_workers == 0 || input.min_workers > input.max_workers {
            return Err(ManagerError::invalid(
                "min_workers must be positive and not exceed max_workers",
            ));
        }
        let name = require_lower("name", &input.name)?;
        let profile = ScaleProfile {
            id: new_id("scale"),
            name: name.clone(),
            min_workers: input.min_workers,
            max_workers: input.max_workers,
            target_queue_depth: input.target_queue_depth,
            created_at: now(),
        };
        self.scale_profiles
            .insert_unique(profile, |p| p.name == name, "scale profile")
    }

    pub fn list_scale_profiles(&self, limit: usize) -> Vec<ScaleProfile> {
        self.scale_profiles.list(limit)
    }

    pub fn register_migration(&self, version: u32, description: &str) -> ManagerResult<SchemaMigration> {
        if version == 0 {
            return Err(ManagerError::invalid("version must be positive"));
        }
        let migration = SchemaMigration {
            id: format!("migration-{version}"),
            version,
            description: description.trim().to_string(),
            applied: false,
            applied_at: None,
            registered_at: now(),
        };
        self.migrations
            .insert_unique(migration, |m| m.version == version, "schema migration version")
    }

    pub fn list_migrations(&self, limit: usize) -> Vec<SchemaMigration> {
        let mut all = self.migrations.list(usize::MAX);
        all.sort_by_key(|m| m.version);
        let skip = all.len().saturating_sub(limit);
        all.into_iter().skip(skip).collect()
    }

    /// Apply `version`; earlier versions must already be applied.
    pub fn apply_migration(&self, version: u32) -> ManagerResult<SchemaMigration> {
        self.migrations.with_all(|all| {
            let pending_before: Vec<u32> = all
                .iter()
                .filter(|m| m.version < version && !m.applied)
                .map(|m| m.version)
                .collect();
            let migration = all
                .iter_mut()
                .find(|m| m.version == version)
                .ok_or_else(|| ManagerError::not_found("schema migration not found"))?;
            if migration.applied {
                return Err(ManagerError::conflict("schema migration already applied"));
            }
            if !pending_before.is_empty() {
                return Err(ManagerError::denied(
                    "earlier migrations pending",
                    json!({ "pending": pending_before }),
                ));
            }
            migration.applied = true;
            migration.applied_at = Some(now());
            Ok(migration.clone())
        })
    }

    pub fn create_channel(&self, name: &str, description: &str, min_soak_hours: u32) -> ManagerResult<Channel> {
        let name = require_lower("name", name)?;
        let channel = Channel {
            id: new_id("channel"),
            name: name.clone(),
            description: description.trim().to_string(),
            min_soak_hours,
            created_at: now(),
        };
        self.channels.insert_unique(channel, |c| c.name == name, "channel")
    }

    pub fn list_channels(&self, limit: usize) -> Vec<Channel> {
        self.channels.list(limit)
    }

    pub fn add_peer(&self, name: &str, endpoint: &str, region: &str) -> ManagerResult<FederationPeer> {
        let endpoint = require("endpoint", endpoint)?;
        url::Url::parse(&endpoint)
            .map_err(|e| ManagerError::invalid(format!("endpoint is not a valid URL: {e}")))?;
        let name = require_lower("name", name)?;
        let peer = FederationPeer {
            id: new_id("peer"),
            name: name.clone(),
            endpoint,
            region: region.trim().to_lowercase(),
            added_at: now(),
        };
        self.peers.insert_unique(peer, |p| p.name == name, "federation peer")
    }

    pub fn list_peers(&self, limit: usize) -> Vec<FederationPeer> {
        self.peers.list(limit)
    }
}

/// Sizing recommendations for a fleet; pure function.
pub fn topology_advice(input: &TopologyInput) -> ManagerResult<Value> {
    if input.nodes == 0 {
        return Err(ManagerError::invalid("nodes must be positive"));
    }
    let regions = clean_list(&input.regions);
    let region_count = regions.len().max(1) as u32;
    let target = if input.target_availability > 0.0 {
        input.target_availability
    } else {
        0.99
    };
    let per_region = input.nodes.div_ceil(region_count);
    let controllers = if target >= 0.999 { 3 } else if target >= 0.99 { 2 } else { 1 };
    let relays_per_region = per_region.div_ceil(1000).max(if per_region > 250 { 1 } else { 0 });
    let workers = input.nodes.div_ceil(500).max(1) * 2;

    let mut recommendations = vec![
        format!("run {controllers} control-plane replicas per region"),
        format!("size the worker pool at {workers} workers"),
    ];
    if relays_per_region > 0 {
        recommendations.push(format!("deploy {relays_per_region} relays per region"));
    }
    if region_count == 1 && target >= 0.999 {
        recommendations.push("add a second region to reach the availability target".to_string());
    }
    Ok(json!({
        "nodes": input.nodes,
        "regions": regions,
        "target_availability": target,
        "nodes_per_region": per_region,
        "controllers_per_region": controllers,
        "relays_per_region": relays_per_region,
        "workers": workers,
        "recommendations": recommendations,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FsObjectStore;

    #[test]
    fn test_backup_roundtrip_and_tamper() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        let ops = OperationsManager::new();
        let backup = ops
            .create_backup(&store, "nightly", &json!({"jobs": [], "nodes": []}))
            .unwrap();
        let (_, state) = ops.load_backup(&store, &backup.id).unwrap();
        assert!(state["jobs"].is_array());
        assert!(ops.drill(&store, None).passed);

        store.put(&backup.object_key, b"{\"tampered\":true}").unwrap();
        assert!(matches!(
            ops.load_backup(&store, &backup.id),
            Err(ManagerError::Denied { .. })
        ));
        assert!(!ops.drill(&store, Some(&backup.id)).passed);
        assert!(matches!(
            ops.load_backup(&store, "backup-missing"),
            Err(ManagerError::NotFound(_))
        ));
    }

    #[test]
    fn test_drill_without_backups_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        let result = OperationsManager::new().drill(&store, None);
        assert!(!result.passed);
        assert_eq!(result.detail, "no backups available");
    }

    #[test]
    fn test_checklist_completion() {
        let ops = OperationsManager::new();
        let list = ops
            .create_checklist("release", &["tag".into(), "notes".into()])
            .unwrap();
        let after = ops.complete_checklist_item(&list.id, "tag").unwrap();
        assert!(!after.completed);
        let after = ops.complete_checklist_item(&list.id, "notes").unwrap();
        assert!(after.completed);
        assert!(matches!(
            ops.complete_checklist_item(&list.id, "tag"),
            Err(ManagerError::Conflict(_))
        ));
        assert!(matches!(
            ops.complete_checklist_item(&list.id, "bogus"),
            Err(ManagerError::Invalid(_))
        ));
    }

    #[test]
    fn test_migrations_apply_in_order() {
        let ops = OperationsManager::new();
        ops.register_migration(1, "init").unwrap();
        ops.register_migration(2, "add index").unwrap();
        assert!(matches!(
            ops.register_migration(2, "dup"),
            Err(ManagerError::Conflict(_))
        ));
        assert!(matches!(
            ops.apply_migration(2),
            Err(ManagerError::Denied { .. })
        ));
        ops.apply_migration(1).unwrap();
        ops.apply_migration(2).unwrap();
        assert!(matches!(ops.apply_migration(2), Err(ManagerError::Conflict(_))));
        assert!(matches!(ops.apply_migration(9), Err(ManagerError::NotFound(_))));
    }

    #[test]
    fn test_deployment_profile_evaluation() {
        let ops = OperationsManager::new();
        ops.create_deployment_profile(DeploymentProfileInput {
            name: "Prod-Safe".into(),
            environment: "prod".into(),
            max_parallel: 2,
            require_approval: true,
            allowed_hours: vec![],
        })
        .unwrap();
        let ok = ops.evaluate_deployment_profile(&ProfileEvaluation {
            profile: "prod-safe".into(),
            parallel: 2,
            approved: true,
            hour: None,
        });
        assert!(ok.is_ok());
        let denied = ops.evaluate_deployment_profile(&ProfileEvaluation {
            profile: "prod-safe".into(),
            parallel: 5,
            approved: false,
            hour: None,
        });
        match denied {
            Err(ManagerError::Denied { detail, .. }) => {
                assert_eq!(detail["violations"].as_array().unwrap().len(), 2)
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_topology_advice() {
        let advice = topology_advice(&TopologyInput {
            nodes: 3000,
            regions: vec!["us-east".into(), "eu-west".into()],
            target_availability: 0.999,
        })
        .unwrap();
        assert_eq!(advice["nodes_per_region"], 1500);
        assert_eq!(advice["controllers_per_region"], 3);
        assert_eq!(advice["relays_per_region"], 2);
        assert!(topology_advice(&TopologyInput::default()).is_err());
    }

    #[test]
    fn test_peers_and_channels_are_unique() {
        let ops = OperationsManager::new();
        ops.add_peer("east", "https://east.example.com", "us-east").unwrap();
        assert!(ops.add_peer("EAST", "https://x.example.com", "").is_err());
        assert!(ops.add_peer("west", "not a url", "").is_err());
        ops.create_channel("Stable", "", 24).unwrap();
        assert!(matches!(
            ops.create_channel("stable", "", 1),
            Err(ManagerError::Conflict(_))
        ));
    }
}
