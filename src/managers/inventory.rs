//! Node inventory: enrollment and lifecycle, discovery, classification rules, ENC
//! providers, drift analysis and CMDB import/export.
//!
//! Nodes are keyed by lowercased hostname. A decommissioned node accepts no further
//! lifecycle transitions.

use super::{clean_list, now, require, require_lower, ManagerError, ManagerResult};
use crate::crypto::{canonical_json, sha256_hex};
use crate::ids::new_id;
use crate::store::Collection;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, info};

pub const DEFAULT_DRIFT_SLO_PERCENT: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Enrolled,
    Active,
    Quarantined,
    Decommissioned,
    Bootstrapped,
}

impl NodeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeStatus::Enrolled => "enrolled",
            NodeStatus::Active => "active",
            NodeStatus::Quarantined => "quarantined",
            NodeStatus::Decommissioned => "decommissioned",
            NodeStatus::Bootstrapped => "bootstrapped",
        }
    }

    /// Quarantined and decommissioned nodes receive no work.
    pub fn accepts_work(self) -> bool {
        !matches!(self, NodeStatus::Quarantined | NodeStatus::Decommissioned)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub hostname: String,
    pub address: String,
    pub role: String,
    pub environment: String,
    pub status: NodeStatus,
    pub labels: BTreeMap<String, String>,
    pub classes: Vec<String>,
    pub facts: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub enrolled_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NodeInput {
    pub hostname: String,
    pub address: String,
    pub role: String,
    pub environment: String,
    pub labels: BTreeMap<String, String>,
    pub facts: Map<String, Value>,
}

#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    pub status: Option<String>,
    pub role: Option<String>,
    pub environment: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DiscoveryInput {
    pub source: String,
    pub hosts: Vec<String>,
    pub auto_enroll: bool,
    pub role: String,
    pub environment: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryRun {
    pub id: String,
    pub source: String,
    pub discovered: Vec<String>,
    pub already_known: usize,
    pub enrolled: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassificationRule {
    pub id: String,
    pub name: String,
    pub match_role: String,
    pub match_environment: String,
    pub match_labels: BTreeMap<String, String>,
    pub classes: Vec<String>,
    pub priority: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClassificationRuleInput {
    pub name: String,
    pub match_role: String,
    pub match_environment: String,
    pub match_labels: BTreeMap<String, String>,
    pub classes: Vec<String>,
    pub priority: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EncProvider {
    pub id: String,
    pub name: String,
    pub match_labels: BTreeMap<String, String>,
    pub classes: Vec<String>,
    pub parameters: Map<String, Value>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EncProviderInput {
    pub name: String,
    pub match_labels: BTreeMap<String, String>,
    pub classes: Vec<String>,
    pub parameters: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DriftInput {
    pub scope: String,
    pub desired: Map<String, Value>,
    pub observed: Map<String, Value>,
    pub slo_percent: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DriftReport {
    pub id: String,
    pub scope: String,
    pub total: usize,
    pub drifted: usize,
    pub drift_percent: f64,
    pub slo_percent: f64,
    pub breached: bool,
    pub drifted_keys: Vec<String>,
    pub analyzed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CmdbImport {
    pub records: Vec<NodeInput>,
    pub mode: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CmdbImportResult {
    pub mode: String,
    pub created: usize,
    pub updated: usize,
    pub removed: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct InventoryBundle {
    pub version: u32,
    pub exported_at: Option<DateTime<Utc>>,
    pub nodes: Vec<Node>,
    pub checksum: String,
}

identified!(Node, DiscoveryRun, ClassificationRule, EncProvider, DriftReport);

#[derive(Default)]
pub struct InventoryManager {
    nodes: Collection<Node>,
    discoveries: Collection<DiscoveryRun>,
    rules: Collection<ClassificationRule>,
    providers: Collection<EncProvider>,
    drift_reports: Collection<DriftReport>,
}

impl InventoryManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enroll(&self, input: NodeInput) -> ManagerResult<Node> {
        let node = build_node(input, NodeStatus::Enrolled)?;
        let id = node.id.clone();
        let node = self.nodes.insert_unique(node, |n| n.id == id, "node")?;
        info!(node_id = %node.id, "node enrolled");
        Ok(node)
    }

    pub fn get(&self, id: &str) -> ManagerResult<Node> {
        self.nodes
            .get(&id.trim().to_lowercase())
            .ok_or_else(|| ManagerError::not_found("node not found"))
    }

    pub fn list(&self, filter: &NodeFilter, limit: usize) -> Vec<Node> {
        self.nodes.list_filtered(limit, |n| {
            filter.status.as_deref().is_none_or(|s| n.status.as_str() == s)
                && filter.role.as_deref().is_none_or(|r| n.role.eq_ignore_ascii_case(r))
                && filter
                    .environment
                    .as_deref()
                    .is_none_or(|e| n.environment == e)
        })
    }

    pub fn all(&self) -> Vec<Node> {
        self.nodes.snapshot()
    }

    /// `heartbeat | activate | quarantine | decommission | bootstrap`.
    pub fn transition(&self, id: &str, action: &str) -> ManagerResult<Node> {
        let id = id.trim().to_lowercase();
        let next = match action {
            "heartbeat" => None,
            "activate" => Some(NodeStatus::Active),
            "quarantine" => Some(NodeStatus::Quarantined),
            "decommission" => Some(NodeStatus::Decommissioned),
            "bootstrap" => Some(NodeStatus::Bootstrapped),
            other => return Err(ManagerError::invalid(format!("unknown node lifecycle action {other}"))),
        };
        self.nodes.update(&id, "node", |node| {
            if node.status == NodeStatus::Decommissioned {
                return Err(ManagerError::denied(
                    "node is decommissioned",
                    json!({ "node_id": node.id, "status": node.status, "action": action }),
                ));
            }
            let at = now();
            match next {
                Some(status) => node.status = status,
                None => node.last_heartbeat = Some(at),
            }
            node.updated_at = at;
            debug!(node_id = %node.id, status = node.status.as_str(), action, "node transition");
            Ok(node.clone())
        })
    }

    pub fn discover(&self, input: DiscoveryInput) -> ManagerResult<DiscoveryRun> {
        let source = require("source", &input.source)?;
        let hosts: Vec<String> = clean_list(&input.hosts)
            .into_iter()
            .map(|h| h.to_lowercase())
            .collect();
        if hosts.is_empty() {
            return Err(ManagerError::invalid("hosts is required"));
        }
        let mut already_known = 0;
        let mut enrolled = 0;
        for host in &hosts {
            if self.nodes.get(host).is_some() {
                already_known += 1;
                continue;
            }
            if input.auto_enroll {
                let node = build_node(
                    NodeInput {
                        hostname: host.clone(),
                        role: input.role.clone(),
                        environment: input.environment.clone(),
                        ..Default::default()
                    },
                    NodeStatus::Enrolled,
                )?;
                if self.nodes.insert_unique(node, |n| n.id == *host, "node").is_ok() {
                    enrolled += 1;
                }
            }
        }
        let run = DiscoveryRun {
            id: new_id("discovery"),
            source,
            discovered: hosts,
            already_known,
            enrolled,
            created_at: now(),
        };
        Ok(self.discoveries.insert(run))
    }

    pub fn list_discoveries(&self, limit: usize) -> Vec<DiscoveryRun> {
        self.discoveries.list(limit)
    }

    pub fn create_rule(&self, input: ClassificationRuleInput) -> ManagerResult<ClassificationRule> {
        let classes = clean_list(&input.classes);
        if classes.is_empty() {
            return Err(ManagerError::invalid("classes is required"));
        }
        let rule = ClassificationRule {
            id: new_id("class-rule"),
            name: require("name", &input.name)?,
            match_role: input.match_role.trim().to_string(),
            match_environment: input.match_environment.trim().to_lowercase(),
            match_labels: input.match_labels,
            classes,
            priority: input.priority,
            created_at: now(),
        };
        Ok(self.rules.insert(rule))
    }

    pub fn list_rules(&self, limit: usize) -> Vec<ClassificationRule> {
        self.rules.list(limit)
    }

    /// Apply every matching rule (highest priority first) and store the class union
    /// on the node.
    pub fn classify(&self, node_id: &str) -> ManagerResult<Value> {
        let node = self.get(&require("node_id", node_id)?)?;
        let mut rules: Vec<ClassificationRule> = self
            .rules
            .snapshot()
            .into_iter()
            .filter(|r| rule_matches(r, &node))
            .collect();
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));

        let mut classes = node.classes.clone();
        for rule in &rules {
            for class in &rule.classes {
                if !classes.contains(class) {
                    classes.push(class.clone());
                }
            }
        }
        let stored = classes.clone();
        self.nodes.update(&node.id, "node", |n| {
            n.classes = stored;
            n.updated_at = now();
            Ok(())
        })?;
        Ok(json!({
            "node_id": node.id,
            "classes": classes,
            "matched_rules": rules.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
        }))
    }

    pub fn create_provider(&self, input: EncProviderInput) -> ManagerResult<EncProvider> {
        let name = require_lower("name", &input.name)?;
        let at = now();
        let provider = EncProvider {
            id: new_id("enc"),
            name: name.clone(),
            match_labels: input.match_labels,
            classes: clean_list(&input.classes),
            parameters: input.parameters,
            enabled: true,
            created_at: at,
            updated_at: at,
        };
        self.providers
            .insert_unique(provider, |p| p.name == name, "enc provider")
    }

    pub fn list_providers(&self, limit: usize) -> Vec<EncProvider> {
        self.providers.list(limit)
    }

    /// `enable | disable`
    pub fn set_provider_enabled(&self, id: &str, action: &str) -> ManagerResult<EncProvider> {
        let enabled = match action {
            "enable" => true,
            "disable" => false,
            other => return Err(ManagerError::invalid(format!("unknown enc provider action {other}"))),
        };
        self.providers.update(id, "enc provider", |p| {
            p.enabled = enabled;
            p.updated_at = now();
            Ok(p.clone())
        })
    }

    /// Merge classes and parameters from enabled providers whose labels match.
    /// `classify` stores the classes on the node; `preview` leaves it untouched.
    pub fn enc_classify(&self, node_id: &str, action: &str) -> ManagerResult<Value> {
        let action = match action.trim().to_lowercase().as_str() {
            "" | "classify" => "classify",
            "preview" => "preview",
            other => return Err(ManagerError::invalid(format!("unknown enc action {other}"))),
        };
        let node = self.get(&require("node_id", node_id)?)?;
        let mut classes: Vec<String> = Vec::new();
        let mut parameters = Map::new();
        let mut providers = Vec::new();
        for provider in self.providers.snapshot() {
            if !provider.enabled || !labels_match(&provider.match_labels, &node.labels) {
                continue;
            }
            for class in &provider.classes {
                if !classes.contains(class) {
                    classes.push(class.clone());
                }
            }
            for (k, v) in &provider.parameters {
                parameters.insert(k.clone(), v.clone());
            }
            providers.push(provider.name);
        }
        if action == "classify" {
            let merged = classes.clone();
            self.nodes.update(&node.id, "node", |n| {
                for class in merged {
                    if !n.classes.contains(&class) {
                        n.classes.push(class);
                    }
                }
                n.updated_at = now();
                Ok(())
            })?;
        }
        Ok(json!({
            "node_id": node.id,
            "action": action,
            "classes": classes,
            "parameters": parameters,
            "providers": providers,
        }))
    }

    /// Compare desired against observed keys. The report is recorded either way; a
    /// breach of the SLO is a denial carrying the report.
    pub fn analyze_drift(&self, input: DriftInput) -> ManagerResult<DriftReport> {
        if input.desired.is_empty() {
            return Err(ManagerError::invalid("desired is required"));
        }
        let slo = input.slo_percent.unwrap_or(DEFAULT_DRIFT_SLO_PERCENT);
        if !(0.0..=100.0).contains(&slo) {
            return Err(ManagerError::invalid("slo_percent must be between 0 and 100"));
        }
        let mut drifted_keys: Vec<String> = input
            .desired
            .iter()
            .filter(|(k, v)| input.observed.get(*k) != Some(*v))
            .map(|(k, _)| k.clone())
            .collect();
        drifted_keys.sort();
        let total = input.desired.len();
        let drift_percent = drifted_keys.len() as f64 * 100.0 / total as f64;
        let report = DriftReport {
            id: new_id("drift"),
            scope: input.scope.trim().to_string(),
            total,
            drifted: drifted_keys.len(),
            drift_percent: (drift_percent * 100.0).round() / 100.0,
            slo_percent: slo,
            breached: drift_percent > slo,
            drifted_keys,
            analyzed_at: now(),
        };
        let report = self.drift_reports.insert(report);
        if report.breached {
            return Err(ManagerError::denied(
                "drift slo breached",
                serde_json::to_value(&report)?,
            ));
        }
        Ok(report)
    }

    pub fn list_drift_reports(&self, limit: usize) -> Vec<DriftReport> {
        self.drift_reports.list(limit)
    }

    /// `merge` upserts by hostname; `replace` swaps the whole inventory.
    pub fn cmdb_import(&self, input: CmdbImport) -> ManagerResult<CmdbImportResult> {
        let mode = match input.mode.trim().to_lowercase().as_str() {
            "" | "merge" => "merge",
            "replace" => "replace",
            other => return Err(ManagerError::invalid(format!("mode must be merge or replace (got {other})"))),
        };
        let mut incoming = Vec::with_capacity(input.records.len());
        for record in input.records {
            incoming.push(build_node(record, NodeStatus::Enrolled)?);
        }

        let result = self.nodes.with_all(|nodes| {
            let mut created = 0;
            let mut updated = 0;
            let mut removed = 0;
            if mode == "replace" {
                removed = nodes
                    .iter()
                    .filter(|n| !incoming.iter().any(|i| i.id == n.id))
                    .count();
                nodes.retain(|n| incoming.iter().any(|i| i.id == n.id));
            }
            for node in incoming {
                match nodes.iter_mut().find(|n| n.id == node.id) {
                    Some(existing) => {
                        existing.address = node.address;
                        existing.role = node.role;
                        existing.environment = node.environment;
                        existing.labels.extend(node.labels);
                        existing.facts.extend(node.facts);
                        existing.updated_at = node.updated_at;
                        updated += 1;
                    }
                    None => {
                        nodes.push(node);
                        created += 1;
                    }
                }
            }
            CmdbImportResult {
                mode: mode.to_string(),
                created,
                updated,
                removed,
                total: nodes.len(),
            }
        });
        info!(mode, created = result.created, updated = result.updated, removed = result.removed, "cmdb import");
        Ok(result)
    }

    pub fn export(&self) -> ManagerResult<InventoryBundle> {
        let nodes = self.nodes.snapshot();
        let checksum = bundle_checksum(&nodes)?;
        Ok(InventoryBundle {
            version: 1,
            exported_at: Some(now()),
            nodes,
            checksum,
        })
    }

    /// Replace the inventory with a previously exported bundle.
    pub fn import(&self, bundle: InventoryBundle) -> ManagerResult<usize> {
        let expected = require("checksum", &bundle.checksum)?;
        let actual = bundle_checksum(&bundle.nodes)?;
        if actual != expected {
            return Err(ManagerError::denied(
                "bundle checksum mismatch",
                json!({ "expected": expected, "actual": actual }),
            ));
        }
        let count = bundle.nodes.len();
        self.nodes.replace_all(bundle.nodes);
        Ok(count)
    }
}

fn build_node(input: NodeInput, status: NodeStatus) -> ManagerResult<Node> {
    let hostname = require_lower("hostname", &input.hostname)?;
    let at = now();
    Ok(Node {
        id: hostname.clone(),
        hostname,
        address: input.address.trim().to_string(),
        role: input.role.trim().to_string(),
        environment: input.environment.trim().to_lowercase(),
        status,
        labels: input.labels,
        classes: Vec::new(),
        facts: input.facts,
        last_heartbeat: None,
        enrolled_at: at,
        updated_at: at,
    })
}

fn labels_match(wanted: &BTreeMap<String, String>, labels: &BTreeMap<String, String>) -> bool {
    wanted.iter().all(|(k, v)| labels.get(k) == Some(v))
}

fn rule_matches(rule: &ClassificationRule, node: &Node) -> bool {
    (rule.match_role.is_empty() || rule.match_role.eq_ignore_ascii_case(&node.role))
        && (rule.match_environment.is_empty() || rule.match_environment == node.environment)
        && labels_match(&rule.match_labels, &node.labels)
}

fn bundle_checksum(nodes: &[Node]) -> ManagerResult<String> {
    let value = serde_json::to_value(nodes)?;
    Ok(sha256_hex(canonical_json(&value).as_bytes()))
}
