//! Agent check-ins, the agent PKI (CSRs and certificates), job dispatch to nodes and
//! per-node catalog compilation.

use super::inventory::InventoryManager;
use super::queue::{Job, JobRequest, QueueManager};
use super::{now, require, require_lower, ManagerError, ManagerResult};
use crate::crypto::{canonical_json, sha256_hex};
use crate::ids::{new_id, new_token};
use crate::planner::{build_plan, ConfigDocument, Resource};
use crate::store::Collection;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::info;

pub const CERTIFICATE_VALIDITY_DAYS: i64 = 365;

#[derive(Debug, Clone, Serialize)]
pub struct Checkin {
    /// Node id; one record per node
    pub id: String,
    pub agent_version: String,
    pub status: String,
    pub facts: Map<String, Value>,
    pub checkins: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CheckinInput {
    pub node_id: String,
    pub agent_version: String,
    pub status: String,
    pub facts: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CsrStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Serialize)]
pub struct Csr {
    pub id: String,
    pub node_id: String,
    pub common_name: String,
    pub public_key_fingerprint: String,
    pub status: CsrStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
    pub submitted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CsrInput {
    pub node_id: String,
    pub common_name: String,
    pub public_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertificateStatus {
    Active,
    Superseded,
    Revoked,
}

#[derive(Debug, Clone, Serialize)]
pub struct Certificate {
    pub id: String,
    pub node_id: String,
    pub common_name: String,
    pub serial: String,
    pub fingerprint: String,
    pub status: CertificateStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replaces: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DispatchInput {
    pub node_id: String,
    pub config_path: String,
    pub priority: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Dispatch {
    pub id: String,
    pub node_id: String,
    pub job_id: String,
    pub config_path: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeCatalog {
    pub id: String,
    pub node_id: String,
    pub resources: Vec<Resource>,
    pub resource_count: usize,
    pub digest: String,
    pub compiled_at: DateTime<Utc>,
}

identified!(Checkin, Csr, Certificate, Dispatch, NodeCatalog);

#[derive(Default)]
pub struct AgentsManager {
    checkins: Collection<Checkin>,
    csrs: Collection<Csr>,
    certificates: Collection<Certificate>,
    dispatches: Collection<Dispatch>,
    catalogs: Collection<NodeCatalog>,
}

impl AgentsManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert the node's check-in record and bump its counter.
    pub fn checkin(&self, input: CheckinInput) -> ManagerResult<Checkin> {
        let node_id = require_lower("node_id", &input.node_id)?;
        let at = now();
        let status = match input.status.trim() {
            "" => "ok".to_string(),
            s => s.to_lowercase(),
        };
        let record = self.checkins.with_all(|all| {
            match all.iter_mut().find(|c| c.id == node_id) {
                Some(existing) => {
                    existing.agent_version = input.agent_version.trim().to_string();
                    existing.status = status;
                    existing.facts.extend(input.facts);
                    existing.checkins += 1;
                    existing.last_seen = at;
                    existing.clone()
                }
                None => {
                    let fresh = Checkin {
                        id: node_id,
                        agent_version: input.agent_version.trim().to_string(),
                        status,
                        facts: input.facts,
                        checkins: 1,
                        first_seen: at,
                        last_seen: at,
                    };
                    all.push(fresh.clone());
                    fresh
                }
            }
        });
        Ok(record)
    }

    pub fn list_checkins(&self, limit: usize) -> Vec<Checkin> {
        self.checkins.list(limit)
    }

    pub fn submit_csr(&self, input: CsrInput) -> ManagerResult<Csr> {
        let node_id = require_lower("node_id", &input.node_id)?;
        let public_key = require("public_key", &input.public_key)?;
        let common_name = match input.common_name.trim() {
            "" => node_id.clone(),
            cn => cn.to_string(),
        };
        let csr = Csr {
            id: new_id("csr"),
            node_id,
            common_name,
            public_key_fingerprint: sha256_hex(public_key.as_bytes()),
            status: CsrStatus::Pending,
            certificate_id: None,
            decided_by: None,
            submitted_at: now(),
            decided_at: None,
        };
        Ok(self.csrs.insert(csr))
    }

    pub fn list_csrs(&self, status: Option<&str>, limit: usize) -> Vec<Csr> {
        self.csrs.list_filtered(limit, |c| {
            status.is_none_or(|s| serde_json::to_value(c.status).is_ok_and(|v| v == s))
        })
    }

    /// `approve` issues a certificate; `reject` closes the request. Only pending
    /// CSRs can be decided.
    pub fn decide_csr(&self, id: &str, action: &str, actor: &str) -> ManagerResult<(Csr, Option<Certificate>)> {
        let approve = match action {
            "approve" => true,
            "reject" => false,
            other => return Err(ManagerError::invalid(format!("unknown csr action {other}"))),
        };
        let csr = self.csrs.update(id, "csr", |csr| {
            if csr.status != CsrStatus::Pending {
                return Err(ManagerError::denied(
                    "csr is not pending",
                    json!({ "csr_id": csr.id, "status": csr.status }),
                ));
            }
            csr.status = if approve { CsrStatus::Approved } else { CsrStatus::Rejected };
            csr.decided_by = Some(actor.trim().to_string()).filter(|a| !a.is_empty());
            csr.decided_at = Some(now());
            Ok(csr.clone())
        })?;
        if !approve {
            return Ok((csr, None));
        }
        let cert = self.issue(&csr.node_id, &csr.common_name, None);
        let csr = self.csrs.update(&csr.id, "csr", |c| {
            c.certificate_id = Some(cert.id.clone());
            Ok(c.clone())
        })?;
        info!(csr_id = %csr.id, certificate_id = %cert.id, "certificate issued");
        Ok((csr, Some(cert)))
    }

    pub fn list_certificates(&self, status: Option<&str>, limit: usize) -> Vec<Certificate> {
        self.certificates.list_filtered(limit, |c| {
            status.is_none_or(|s| serde_json::to_value(c.status).is_ok_and(|v| v == s))
        })
    }

    /// `rotate` supersedes the certificate with a fresh one; `revoke` ends it.
    /// Revoked or superseded certificates cannot change again.
    pub fn certificate_action(&self, id: &str, action: &str) -> ManagerResult<Certificate> {
        let rotate = match action {
            "rotate" => true,
            "revoke" => false,
            other => return Err(ManagerError::invalid(format!("unknown certificate action {other}"))),
        };
        let old = self.certificates.update(id, "certificate", |cert| {
            if cert.status != CertificateStatus::Active {
                return Err(ManagerError::denied(
                    "certificate is not active",
                    json!({ "certificate_id": cert.id, "status": cert.status }),
                ));
            }
            if rotate {
                cert.status = CertificateStatus::Superseded;
            } else {
                cert.status = CertificateStatus::Revoked;
                cert.revoked_at = Some(now());
            }
            Ok(cert.clone())
        })?;
        if rotate {
            Ok(self.issue(&old.node_id, &old.common_name, Some(old.id)))
        } else {
            Ok(old)
        }
    }

    fn issue(&self, node_id: &str, common_name: &str, replaces: Option<String>) -> Certificate {
        let serial = new_token();
        let issued_at = now();
        let cert = Certificate {
            id: new_id("cert"),
            node_id: node_id.to_string(),
            common_name: common_name.to_string(),
            fingerprint: sha256_hex(format!("{common_name}:{serial}").as_bytes()),
            serial,
            status: CertificateStatus::Active,
            replaces,
            issued_at,
            expires_at: issued_at + Duration::days(CERTIFICATE_VALIDITY_DAYS),
            revoked_at: None,
        };
        self.certificates.insert(cert)
    }

    /// Enqueue a job for a known node that accepts work and assign it. The caller has
    /// already resolved `config_path` and checked the operational gates.
    pub fn dispatch(
        &self,
        inventory: &InventoryManager,
        queue: &QueueManager,
        input: DispatchInput,
        force: bool,
    ) -> ManagerResult<(Dispatch, Job)> {
        let node = inventory.get(&require("node_id", &input.node_id)?)?;
        if !node.status.accepts_work() {
            return Err(ManagerError::denied(
                "node does not accept work",
                json!({ "node_id": node.id, "status": node.status }),
            ));
        }
        let (job, _) = queue.enqueue(JobRequest {
            config_path: input.config_path.clone(),
            priority: input.priority,
            idempotency_key: String::new(),
            force,
            source: "dispatch".to_string(),
        })?;
        let job = queue.assign(&job.id, &node.id)?;
        let dispatch = Dispatch {
            id: new_id("dispatch"),
            node_id: node.id,
            job_id: job.id.clone(),
            config_path: job.config_path.clone(),
            status: "dispatched".to_string(),
            created_at: now(),
        };
        Ok((self.dispatches.insert(dispatch), job))
    }

    pub fn list_dispatches(&self, limit: usize) -> Vec<Dispatch> {
        self.dispatches.list(limit)
    }

    /// Resources addressed to `node_id` (or to no host), in plan order.
    pub fn compile_catalog(&self, node_id: &str, doc: &ConfigDocument) -> ManagerResult<NodeCatalog> {
        let node_id = require_lower("node_id", node_id)?;
        let plan = build_plan(doc)?;
        let resources: Vec<Resource> = plan
            .steps
            .iter()
            .filter(|s| s.host.is_empty() || s.host.eq_ignore_ascii_case(&node_id))
            .filter_map(|s| doc.resources.iter().find(|r| r.id.trim() == s.resource_id))
            .cloned()
            .collect();
        let digest = sha256_hex(canonical_json(&serde_json::to_value(&resources)?).as_bytes());
        let catalog = NodeCatalog {
            id: new_id("catalog"),
            node_id,
            resource_count: resources.len(),
            resources,
            digest,
            compiled_at: now(),
        };
        Ok(self.catalogs.insert(catalog))
    }

    pub fn list_catalogs(&self, limit: usize) -> Vec<NodeCatalog> {
        self.catalogs.list(limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managers::inventory::NodeInput;

    #[test]
    fn test_checkin_upserts() {
        let agents = AgentsManager::new();
        agents
            .checkin(CheckinInput {
                node_id: "Web-01".into(),
                agent_version: "1.0".into(),
                ..Default::default()
            })
            .unwrap();
        let second = agents
            .checkin(CheckinInput {
                node_id: "web-01".into(),
                agent_version: "1.1".into(),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(second.checkins, 2);
        assert_eq!(second.agent_version, "1.1");
        assert_eq!(agents.list_checkins(100).len(), 1);
    }

    #[test]
    fn test_csr_approval_issues_certificate() {
        let agents = AgentsManager::new();
        let csr = agents
            .submit_csr(CsrInput {
                node_id: "web-01".into(),
                public_key: "ssh-ed25519 AAAA".into(),
                ..Default::default()
            })
            .unwrap();
        let (csr, cert) = agents.decide_csr(&csr.id, "approve", "ops").unwrap();
        let cert = cert.unwrap();
        assert_eq!(csr.certificate_id.as_deref(), Some(cert.id.as_str()));
        assert_eq!((cert.expires_at - cert.issued_at).num_days(), 365);
        assert!(matches!(
            agents.decide_csr(&csr.id, "reject", "ops"),
            Err(ManagerError::Denied { .. })
        ));

        let rotated = agents.certificate_action(&cert.id, "rotate").unwrap();
        assert_eq!(rotated.replaces.as_deref(), Some(cert.id.as_str()));
        assert!(agents.certificate_action(&cert.id, "revoke").is_err());
        agents.certificate_action(&rotated.id, "revoke").unwrap();
        assert!(matches!(
            agents.certificate_action(&rotated.id, "rotate"),
            Err(ManagerError::Denied { .. })
        ));
    }

    #[test]
    fn test_dispatch_respects_node_status() {
        let agents = AgentsManager::new();
        let inv = InventoryManager::new();
        let queue = QueueManager::new();
        inv.enroll(NodeInput {
            hostname: "web-01".into(),
            ..Default::default()
        })
        .unwrap();
        let input = DispatchInput {
            node_id: "web-01".into(),
            config_path: "/tmp/site.yaml".into(),
            ..Default::default()
        };
        let (dispatch, job) = agents.dispatch(&inv, &queue, input.clone(), false).unwrap();
        assert_eq!(job.assigned_node.as_deref(), Some("web-01"));
        assert_eq!(dispatch.job_id, job.id);

        inv.transition("web-01", "quarantine").unwrap();
        assert!(matches!(
            agents.dispatch(&inv, &queue, input, false),
            Err(ManagerError::Denied { .. })
        ));
        let unknown = DispatchInput {
            node_id: "ghost".into(),
            config_path: "/tmp/site.yaml".into(),
            ..Default::default()
        };
        assert!(matches!(
            agents.dispatch(&inv, &queue, unknown, false),
            Err(ManagerError::NotFound(_))
        ));
    }

    #[test]
    fn test_catalog_filters_by_host() {
        let doc = ConfigDocument::from_value(json!({
            "resources": [
                {"id": "pkg", "type": "package", "host": "web-01"},
                {"id": "svc", "type": "service", "host": "web-01", "depends_on": ["pkg"]},
                {"id": "db", "type": "package", "host": "db-01"},
                {"id": "motd", "type": "file"}
            ]
        }))
        .unwrap();
        let catalog = AgentsManager::new().compile_catalog("web-01", &doc).unwrap();
        let ids: Vec<&str> = catalog.resources.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["pkg", "motd", "svc"]);
    }
}
