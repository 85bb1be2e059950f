//! Generic catalog resources (schedules, templates, workflows, canaries, change records
//! and friends) sharing one create/list/get contract, plus canary health and the
//! change-record lifecycle.

use super::{now, ManagerError, ManagerResult};
use crate::ids::new_id;
use crate::store::Collection;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::info;

pub const CANARY_HEALTHY: f64 = 0.99;
pub const CANARY_DEGRADED: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CatalogKind {
    Schedules,
    Templates,
    Workflows,
    Associations,
    Canaries,
    ChangeRecords,
    Views,
    Runbooks,
    SolutionPacks,
    WorkspaceTemplates,
}

impl CatalogKind {
    pub const ALL: [CatalogKind; 10] = [
        CatalogKind::Schedules,
        CatalogKind::Templates,
        CatalogKind::Workflows,
        CatalogKind::Associations,
        CatalogKind::Canaries,
        CatalogKind::ChangeRecords,
        CatalogKind::Views,
        CatalogKind::Runbooks,
        CatalogKind::SolutionPacks,
        CatalogKind::WorkspaceTemplates,
    ];

    /// Path segment under `/v1/`.
    pub fn segment(self) -> &'static str {
        match self {
            CatalogKind::Schedules => "schedules",
            CatalogKind::Templates => "templates",
            CatalogKind::Workflows => "workflows",
            CatalogKind::Associations => "associations",
            CatalogKind::Canaries => "canaries",
            CatalogKind::ChangeRecords => "change-records",
            CatalogKind::Views => "views",
            CatalogKind::Runbooks => "runbooks",
            CatalogKind::SolutionPacks => "solution-packs",
            CatalogKind::WorkspaceTemplates => "workspace-templates",
        }
    }

    pub fn from_segment(segment: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.segment() == segment)
    }

    /// Event namespace, e.g. `change_records`.
    pub fn event_prefix(self) -> String {
        self.segment().replace('-', "_")
    }

    fn singular(self) -> &'static str {
        match self {
            CatalogKind::Schedules => "schedule",
            CatalogKind::Templates => "template",
            CatalogKind::Workflows => "workflow",
            CatalogKind::Associations => "association",
            CatalogKind::Canaries => "canary",
            CatalogKind::ChangeRecords => "change record",
            CatalogKind::Views => "view",
            CatalogKind::Runbooks => "runbook",
            CatalogKind::SolutionPacks => "solution pack",
            CatalogKind::WorkspaceTemplates => "workspace template",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CanaryStats {
    pub successes: u64,
    pub failures: u64,
    pub success_rate: f64,
    pub health: &'static str,
    pub last_result_at: Option<DateTime<Utc>>,
}

impl CanaryStats {
    fn record(&mut self, success: bool) {
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        let total = self.successes + self.failures;
        self.success_rate = self.successes as f64 / total as f64;
        self.health = health_for(self.success_rate);
        self.last_result_at = Some(now());
    }
}

fn health_for(rate: f64) -> &'static str {
    if rate >= CANARY_HEALTHY {
        "healthy"
    } else if rate >= CANARY_DEGRADED {
        "degraded"
    } else {
        "failing"
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogItem {
    pub id: String,
    pub kind: CatalogKind,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canary: Option<CanaryStats>,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

identified!(CatalogItem);

#[derive(Default)]
pub struct CatalogManager {
    items: Collection<CatalogItem>,
}

impl CatalogManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// `body` must be an object with a non-empty `name`; the remaining fields are kept
    /// verbatim. Names are unique per kind.
    pub fn create(&self, kind: CatalogKind, body: Value) -> ManagerResult<CatalogItem> {
        let Value::Object(mut attributes) = body else {
            return Err(ManagerError::invalid("body must be an object"));
        };
        let name = match attributes.remove("name") {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            _ => return Err(ManagerError::invalid("name is required")),
        };
        for reserved in ["id", "kind", "status", "canary", "created_at", "updated_at"] {
            attributes.remove(reserved);
        }
        validate(kind, &attributes)?;
        let at = now();
        let item = CatalogItem {
            id: new_id(&kind.event_prefix()),
            kind,
            name: name.clone(),
            status: match kind {
                CatalogKind::ChangeRecords => Some("pending".to_string()),
                CatalogKind::Schedules | CatalogKind::Workflows => Some("active".to_string()),
                _ => None,
            },
            canary: (kind == CatalogKind::Canaries).then(|| CanaryStats {
                success_rate: 1.0,
                health: "healthy",
                ..Default::default()
            }),
            attributes,
            created_at: at,
            updated_at: at,
        };
        let created = self.items.insert_unique(
            item,
            |i| i.kind == kind && i.name == name,
            kind.singular(),
        )?;
        info!(kind = kind.segment(), id = %created.id, "catalog item created");
        Ok(created)
    }

    pub fn list(&self, kind: CatalogKind, limit: usize) -> Vec<CatalogItem> {
        self.items.list_filtered(limit, |i| i.kind == kind)
    }

    pub fn get(&self, kind: CatalogKind, id: &str) -> ManagerResult<CatalogItem> {
        self.items
            .get(id)
            .filter(|i| i.kind == kind)
            .ok_or_else(|| ManagerError::not_found(format!("{} not found", kind.singular())))
    }

    pub fn record_canary_result(&self, id: &str, success: bool) -> ManagerResult<CatalogItem> {
        self.get(CatalogKind::Canaries, id)?;
        self.items.update(id, "canary", |item| {
            item.canary.get_or_insert_with(CanaryStats::default).record(success);
            item.updated_at = now();
            Ok(item.clone())
        })
    }

    pub fn canary_health(&self) -> Value {
        let canaries = self.list(CatalogKind::Canaries, usize::MAX);
        let count = |h: &str| {
            canaries
                .iter()
                .filter(|c| c.canary.as_ref().is_some_and(|s| s.health == h))
                .count()
        };
        json!({
            "total": canaries.len(),
            "healthy": count("healthy"),
            "degraded": count("degraded"),
            "failing": count("failing"),
        })
    }

    /// `pending → approved|rejected`, `approved → completed`.
    pub fn change_record_action(&self, id: &str, action: &str, actor: &str) -> ManagerResult<CatalogItem> {
        self.get(CatalogKind::ChangeRecords, id)?;
        self.items.update(id, "change record", |item| {
            let current = item.status.clone().unwrap_or_default();
            let next = match (current.as_str(), action) {
                ("pending", "approve") => "approved",
                ("pending", "reject") => "rejected",
                ("approved", "complete") => "completed",
                _ => {
                    return Err(ManagerError::denied(
                        "invalid change record transition",
                        json!({ "id": item.id, "status": current, "action": action }),
                    ))
                }
            };
            item.status = Some(next.to_string());
            let actor = actor.trim();
            if !actor.is_empty() {
                item.attributes
                    .insert(format!("{next}_by"), Value::String(actor.to_string()));
            }
            item.updated_at = now();
            Ok(item.clone())
        })
    }
}

fn validate(kind: CatalogKind, attributes: &Map<String, Value>) -> ManagerResult<()> {
    let text = |field: &str| {
        attributes
            .get(field)
            .and_then(Value::as_str)
            .is_some_and(|s| !s.trim().is_empty())
    };
    match kind {
        CatalogKind::Schedules => {
            let interval = attributes
                .get("interval_seconds")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            if interval == 0 && !text("cron") {
                return Err(ManagerError::invalid("cron or interval_seconds is required"));
            }
        }
        CatalogKind::Canaries if !text("target") => {
            return Err(ManagerError::invalid("target is required"));
        }
        CatalogKind::Workflows => {
            if let Some(steps) = attributes.get("steps") {
                if !steps.is_array() {
                    return Err(ManagerError::invalid("steps must be a list"));
                }
            }
        }
        _ => {}
    }
    Ok(())
}

/// Built-in runbooks shipped with the server.
pub fn runbook_catalog() -> Vec<Value> {
    vec![
        json!({
            "id": "drain-and-patch",
            "name": "Drain and patch a node",
            "risk": "medium",
            "steps": ["quarantine node", "wait for running jobs", "apply patch plan", "reboot", "activate node"],
        }),
        json!({
            "id": "emergency-stop",
            "name": "Halt all executions",
            "risk": "high",
            "steps": ["enable emergency stop", "cancel pending jobs", "notify on-call", "record handoff"],
        }),
        json!({
            "id": "restore-from-backup",
            "name": "Restore control-plane state",
            "risk": "high",
            "steps": ["pause queue", "run restore drill", "restore backup", "resume queue"],
        }),
        json!({
            "id": "rotate-agent-certificates",
            "name": "Rotate agent certificates",
            "risk": "low",
            "steps": ["list active certificates", "rotate each certificate", "verify agent check-ins"],
        }),
        json!({
            "id": "freeze-window",
            "name": "Open a change freeze",
            "risk": "low",
            "steps": ["enable freeze with end time", "announce freeze", "disable freeze after window"],
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_segments() {
        for kind in CatalogKind::ALL {
            assert_eq!(CatalogKind::from_segment(kind.segment()), Some(kind));
        }
        assert_eq!(CatalogKind::ChangeRecords.event_prefix(), "change_records");
        assert_eq!(CatalogKind::from_segment("pets"), None);
    }

    #[test]
    fn test_create_keeps_attributes() {
        let cm = CatalogManager::new();
        let item = cm
            .create(
                CatalogKind::Templates,
                json!({"name": " base ", "config_path": "site.yaml", "id": "forged"}),
            )
            .unwrap();
        assert_eq!(item.name, "base");
        assert_ne!(item.id, "forged");
        let encoded = serde_json::to_value(&item).unwrap();
        assert_eq!(encoded["config_path"], "site.yaml");
        assert_eq!(encoded["kind"], "templates");
        assert!(cm.create(CatalogKind::Templates, json!({"name": "base"})).is_err());
        assert!(cm.create(CatalogKind::Views, json!({"name": "base"})).is_ok());
        assert!(matches!(
            cm.get(CatalogKind::Views, &item.id),
            Err(ManagerError::NotFound(_))
        ));
    }

    #[test]
    fn test_schedule_validation() {
        let cm = CatalogManager::new();
        assert!(cm.create(CatalogKind::Schedules, json!({"name": "nightly"})).is_err());
        assert!(cm
            .create(CatalogKind::Schedules, json!({"name": "nightly", "cron": "0 2 * * *"}))
            .is_ok());
    }

    #[test]
    fn test_canary_health() {
        let cm = CatalogManager::new();
        let canary = cm
            .create(CatalogKind::Canaries, json!({"name": "web", "target": "https://web"}))
            .unwrap();
        assert_eq!(cm.canary_health()["healthy"], 1);
        for success in [true, true, true, true, true, true, true, true, true, false] {
            cm.record_canary_result(&canary.id, success).unwrap();
        }
        let health = cm.canary_health();
        assert_eq!(health["total"], 1);
        assert_eq!(health["degraded"], 1);
    }

    #[test]
    fn test_change_record_transitions() {
        let cm = CatalogManager::new();
        let cr = cm
            .create(CatalogKind::ChangeRecords, json!({"name": "CHG-1"}))
            .unwrap();
        assert!(cm.change_record_action(&cr.id, "complete", "").is_err());
        let approved = cm.change_record_action(&cr.id, "approve", "lee").unwrap();
        assert_eq!(approved.status.as_deref(), Some("approved"));
        assert_eq!(approved.attributes["approved_by"], "lee");
        cm.change_record_action(&cr.id, "complete", "lee").unwrap();
        assert!(cm.change_record_action(&cr.id, "reject", "").is_err());
    }
}
