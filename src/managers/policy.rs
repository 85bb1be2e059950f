//! Policy bundles with staged promotion, layered input resolution, rule simulation
//! and signed pull sources.
//!
//! Bundles promote one stage at a time: `draft → dev → staging → prod`.

use super::{loose_eq, now, require, require_lower, ManagerError, ManagerResult};
use crate::crypto::{canonical_json, sha256_hex, Signer};
use crate::ids::new_id;
use crate::store::Collection;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Draft,
    Dev,
    Staging,
    Prod,
}

impl Stage {
    pub fn parse(raw: &str) -> ManagerResult<Self> {
        match raw.trim().to_lowercase().as_str() {
            "draft" => Ok(Stage::Draft),
            "dev" => Ok(Stage::Dev),
            "staging" => Ok(Stage::Staging),
            "prod" => Ok(Stage::Prod),
            other => Err(ManagerError::invalid(format!("unknown stage {other}"))),
        }
    }

    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Draft => Some(Stage::Dev),
            Stage::Dev => Some(Stage::Staging),
            Stage::Staging => Some(Stage::Prod),
            Stage::Prod => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyRule {
    pub name: String,
    pub field: String,
    /// `equals` (default), `not_equals`, `in`, `exists`, `gt`, `lt`
    pub operator: String,
    pub value: Value,
    /// `allow` or `deny` (default)
    pub effect: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PolicyBundle {
    pub id: String,
    pub name: String,
    pub group: String,
    pub version: String,
    pub stage: Stage,
    pub rules: Vec<PolicyRule>,
    pub digest: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PolicyBundleInput {
    pub name: String,
    pub group: String,
    pub version: String,
    pub rules: Vec<PolicyRule>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Promotion {
    pub id: String,
    pub bundle_id: String,
    pub from: Stage,
    pub to: Stage,
    pub actor: String,
    pub promoted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PromoteInput {
    pub target_stage: String,
    pub actor: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InputLayer {
    pub name: String,
    pub values: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ResolveInput {
    pub layers: Vec<InputLayer>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SimulateInput {
    pub bundle_id: String,
    pub rules: Vec<PolicyRule>,
    pub input: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PullSource {
    pub id: String,
    pub name: String,
    pub url: String,
    pub branch: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PullSourceInput {
    pub name: String,
    pub url: String,
    pub branch: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PullExecuteInput {
    pub source_id: String,
    pub config: Value,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PullResult {
    pub id: String,
    pub source_id: String,
    pub digest: String,
    pub verified: bool,
    pub detail: String,
    pub executed_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct DigestClaims {
    digest: String,
}

identified!(PolicyBundle, Promotion, PullSource, PullResult);

#[derive(Default)]
pub struct PolicyManager {
    bundles: Collection<PolicyBundle>,
    promotions: Collection<Promotion>,
    sources: Collection<PullSource>,
    results: Collection<PullResult>,
}

impl PolicyManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_bundle(&self, input: PolicyBundleInput) -> ManagerResult<PolicyBundle> {
        let name = require("name", &input.name)?;
        let group = require_lower("group", &input.group)?;
        let version = match input.version.trim() {
            "" => "1".to_string(),
            v => v.to_string(),
        };
        for rule in &input.rules {
            require("rule.field", &rule.field)?;
        }
        let digest = sha256_hex(canonical_json(&serde_json::to_value(&input.rules)?).as_bytes());
        let at = now();
        let bundle = PolicyBundle {
            id: new_id("bundle"),
            name: name.clone(),
            group: group.clone(),
            version: version.clone(),
            stage: Stage::Draft,
            rules: input.rules,
            digest,
            created_at: at,
            updated_at: at,
        };
        self.bundles.insert_unique(
            bundle,
            |b| b.group == group && b.name == name && b.version == version,
            "bundle version",
        )
    }

    pub fn list_bundles(&self, group: Option<&str>, limit: usize) -> Vec<PolicyBundle> {
        self.bundles
            .list_filtered(limit, |b| group.is_none_or(|g| b.group == g))
    }

    pub fn get_bundle(&self, id: &str) -> ManagerResult<PolicyBundle> {
        self.bundles
            .get(id)
            .ok_or_else(|| ManagerError::not_found("bundle not found"))
    }

    /// Advance exactly one stage. Naming a target other than the next stage is a
    /// denial, as is promoting past `prod`.
    pub fn promote(&self, id: &str, input: &PromoteInput) -> ManagerResult<(PolicyBundle, Promotion)> {
        let target = match input.target_stage.trim() {
            "" => None,
            raw => Some(Stage::parse(raw)?),
        };
        let (bundle, from) = self.bundles.update(id, "bundle", |b| {
            let Some(next) = b.stage.next() else {
                return Err(ManagerError::denied(
                    "bundle already at final stage",
                    json!({ "bundle_id": b.id, "stage": b.stage }),
                ));
            };
            if let Some(target) = target {
                if target != next {
                    return Err(ManagerError::denied(
                        "stage skipping not allowed",
                        json!({ "bundle_id": b.id, "stage": b.stage, "next": next, "requested": target }),
                    ));
                }
            }
            let from = b.stage;
            b.stage = next;
            b.updated_at = now();
            Ok((b.clone(), from))
        })?;
        let promotion = self.promotions.insert(Promotion {
            id: new_id("promotion"),
            bundle_id: bundle.id.clone(),
            from,
            to: bundle.stage,
            actor: input.actor.trim().to_string(),
            promoted_at: now(),
        });
        info!(bundle_id = %bundle.id, to = ?bundle.stage, "bundle promoted");
        Ok((bundle, promotion))
    }

    pub fn promotions(&self, id: &str, limit: usize) -> ManagerResult<Vec<Promotion>> {
        let bundle = self.get_bundle(id)?;
        Ok(self
            .promotions
            .list_filtered(limit, |p| p.bundle_id == bundle.id))
    }

    /// Rule evaluation against `input`. Deny rules win; with no rules or no match
    /// the decision is `allow`.
    pub fn simulate(&self, req: &SimulateInput) -> ManagerResult<Value> {
        let rules = if req.bundle_id.trim().is_empty() {
            req.rules.clone()
        } else {
            self.get_bundle(req.bundle_id.trim())?.rules
        };
        let mut matched_allow = Vec::new();
        let mut matched_deny = Vec::new();
        for rule in &rules {
            if !rule_matches(rule, &req.input) {
                continue;
            }
            let name = if rule.name.is_empty() { rule.field.clone() } else { rule.name.clone() };
            if rule.effect.eq_ignore_ascii_case("allow") {
                matched_allow.push(name);
            } else {
                matched_deny.push(name);
            }
        }
        let decision = if matched_deny.is_empty() { "allow" } else { "deny" };
        Ok(json!({
            "decision": decision,
            "rules_evaluated": rules.len(),
            "matched_allow": matched_allow,
            "matched_deny": matched_deny,
        }))
    }

    pub fn create_source(&self, input: PullSourceInput) -> ManagerResult<PullSource> {
        let name = require_lower("name", &input.name)?;
        let url = require("url", &input.url)?;
        url::Url::parse(&url).map_err(|e| ManagerError::invalid(format!("invalid url: {e}")))?;
        let source = PullSource {
            id: new_id("pull-source"),
            name: name.clone(),
            url,
            branch: match input.branch.trim() {
                "" => "main".to_string(),
                b => b.to_string(),
            },
            created_at: now(),
        };
        self.sources
            .insert_unique(source, |s| s.name == name, "pull source")
    }

    pub fn list_sources(&self, limit: usize) -> Vec<PullSource> {
        self.sources.list(limit)
    }

    /// Verify a signed configuration from a pull source. The result is recorded
    /// whether or not verification passes.
    pub fn execute_pull(&self, signer: &Signer, input: &PullExecuteInput) -> ManagerResult<PullResult> {
        let source_id = require("source_id", &input.source_id)?;
        if self.sources.get(&source_id).is_none() {
            return Err(ManagerError::not_found("pull source not found"));
        }
        if input.config.is_null() {
            return Err(ManagerError::invalid("config is required"));
        }
        let signature = require("signature", &input.signature)?;
        let digest = sha256_hex(canonical_json(&input.config).as_bytes());
        let (verified, detail) = match signer.verify::<DigestClaims>(&signature) {
            Ok(claims) if claims.digest == digest => (true, "signature verified".to_string()),
            Ok(claims) => (false, format!("digest mismatch: signed {}", claims.digest)),
            Err(e) => (false, e.to_string()),
        };
        let result = self.results.insert(PullResult {
            id: new_id("pull"),
            source_id,
            digest,
            verified,
            detail,
            executed_at: now(),
        });
        if !verified {
            warn!(pull_id = %result.id, detail = %result.detail, "pull verification failed");
            return Err(ManagerError::denied(
                "pull verification failed",
                serde_json::to_value(&result)?,
            ));
        }
        Ok(result)
    }

    pub fn list_results(&self, limit: usize) -> Vec<PullResult> {
        self.results.list(limit)
    }
}

/// Merge layers in order; later layers win and nested objects merge key by key.
/// Returns the merged values and, per top-level key, the last layer that set it.
pub fn resolve_inputs(input: &ResolveInput) -> ManagerResult<Value> {
    if input.layers.is_empty() {
        return Err(ManagerError::invalid("layers is required"));
    }
    let mut resolved = Map::new();
    let mut provenance = Map::new();
    for (i, layer) in input.layers.iter().enumerate() {
        let name = match layer.name.trim() {
            "" => format!("layer-{i}"),
            n => n.to_string(),
        };
        for (key, value) in &layer.values {
            match resolved.get_mut(key) {
                Some(existing) => deep_merge(existing, value),
                None => {
                    resolved.insert(key.clone(), value.clone());
                }
            }
            provenance.insert(key.clone(), Value::String(name.clone()));
        }
    }
    Ok(json!({ "resolved": resolved, "provenance": provenance, "layers": input.layers.len() }))
}

fn deep_merge(target: &mut Value, overlay: &Value) {
    match (target, overlay) {
        (Value::Object(t), Value::Object(o)) => {
            for (k, v) in o {
                match t.get_mut(k) {
                    Some(existing) => deep_merge(existing, v),
                    None => {
                        t.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (slot, v) => *slot = v.clone(),
    }
}

/// Dotted lookup: `node.role` reads `input["node"]["role"]`.
fn lookup<'a>(input: &'a Map<String, Value>, field: &str) -> Option<&'a Value> {
    let mut parts = field.split('.');
    let mut current = input.get(parts.next()?)?;
    for part in parts {
        current = current.get(part)?;
    }
    Some(current)
}

fn rule_matches(rule: &PolicyRule, input: &Map<String, Value>) -> bool {
    let actual = lookup(input, rule.field.trim());
    match rule.operator.trim().to_lowercase().as_str() {
        "exists" => actual.is_some(),
        "not_equals" => actual.is_none_or(|a| !loose_eq(a, &rule.value)),
        "in" => actual.is_some_and(|a| {
            rule.value
                .as_array()
                .is_some_and(|opts| opts.iter().any(|o| loose_eq(a, o)))
        }),
        "gt" => numeric(actual).zip(rule.value.as_f64()).is_some_and(|(a, b)| a > b),
        "lt" => numeric(actual).zip(rule.value.as_f64()).is_some_and(|(a, b)| a < b),
        _ => actual.is_some_and(|a| loose_eq(a, &rule.value)),
    }
}

fn numeric(v: Option<&Value>) -> Option<f64> {
    match v? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle(pm: &PolicyManager) -> PolicyBundle {
        pm.create_bundle(PolicyBundleInput {
            name: "baseline".into(),
            group: "Security".into(),
            rules: vec![PolicyRule {
                name: "no-root".into(),
                field: "user".into(),
                value: json!("root"),
                ..Default::default()
            }],
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_promotion_order() {
        let pm = PolicyManager::new();
        let b = bundle(&pm);
        assert_eq!(b.group, "security");
        let skip = PromoteInput {
            target_stage: "prod".into(),
            ..Default::default()
        };
        assert!(matches!(pm.promote(&b.id, &skip), Err(ManagerError::Denied { .. })));
        for expected in [Stage::Dev, Stage::Staging, Stage::Prod] {
            let (b, _) = pm.promote(&b.id, &PromoteInput::default()).unwrap();
            assert_eq!(b.stage, expected);
        }
        assert!(pm.promote(&b.id, &PromoteInput::default()).is_err());
        assert_eq!(pm.promotions(&b.id, 100).unwrap().len(), 3);
    }

    #[test]
    fn test_simulate() {
        let pm = PolicyManager::new();
        let b = bundle(&pm);
        let mut req = SimulateInput {
            bundle_id: b.id.clone(),
            ..Default::default()
        };
        req.input.insert("user".into(), json!("root"));
        assert_eq!(pm.simulate(&req).unwrap()["decision"], "deny");
        req.input.insert("user".into(), json!("deploy"));
        assert_eq!(pm.simulate(&req).unwrap()["decision"], "allow");
    }

    #[test]
    fn test_gt_and_nested_lookup() {
        let rule = PolicyRule {
            field: "node.cpu".into(),
            operator: "gt".into(),
            value: json!(8),
            ..Default::default()
        };
        let input = json!({"node": {"cpu": "16"}});
        assert!(rule_matches(&rule, input.as_object().unwrap()));
    }

    #[test]
    fn test_resolve_layers() {
        let input: ResolveInput = serde_json::from_value(json!({
            "layers": [
                {"name": "defaults", "values": {"ntp": {"server": "a", "burst": true}, "tz": "UTC"}},
                {"name": "prod", "values": {"ntp": {"server": "b"}}}
            ]
        }))
        .unwrap();
        let out = resolve_inputs(&input).unwrap();
        assert_eq!(out["resolved"]["ntp"], json!({"server": "b", "burst": true}));
        assert_eq!(out["provenance"]["ntp"], "prod");
        assert_eq!(out["provenance"]["tz"], "defaults");
    }

    #[test]
    fn test_pull_execute_records_both_outcomes() {
        #[derive(Serialize)]
        struct Claims {
            digest: String,
        }
        let pm = PolicyManager::new();
        let signer = Signer::new(Some("pull-key"));
        let src = pm
            .create_source(PullSourceInput {
                name: "central".into(),
                url: "https://git.example.com/policy.git".into(),
                ..Default::default()
            })
            .unwrap();
        let config = json!({"rules": [1, 2]});
        let signature = signer
            .sign(&Claims {
                digest: sha256_hex(canonical_json(&config).as_bytes()),
            })
            .unwrap();
        let mut input = PullExecuteInput {
            source_id: src.id,
            config,
            signature,
        };
        assert!(pm.execute_pull(&signer, &input).unwrap().verified);
        input.config = json!({"rules": [3]});
        assert!(matches!(pm.execute_pull(&signer, &input), Err(ManagerError::Denied { .. })));
        assert_eq!(pm.list_results(100).len(), 2);
    }
}
