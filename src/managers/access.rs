//! Access control: ABAC policies, RBAC roles and bindings, just-in-time grants,
//! break-glass requests, delegated administration and approval policies.

use super::{clean_list, loose_eq, now, require, require_lower, wildcard_eq, ManagerError, ManagerResult};
use crate::crypto::sha256_hex;
use crate::ids::{new_id, new_token};
use crate::logging::REDACTED_VALUE;
use crate::store::Collection;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Allow,
    Deny,
}

impl Effect {
    pub fn parse(raw: &str) -> ManagerResult<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "allow" => Ok(Effect::Allow),
            "deny" => Ok(Effect::Deny),
            other => Err(ManagerError::invalid(format!(
                "effect must be allow or deny (got {other:?})"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AbacPolicy {
    pub id: String,
    pub name: String,
    pub effect: Effect,
    pub subject: String,
    pub resource: String,
    pub action: String,
    pub conditions: Map<String, Value>,
    pub priority: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AbacPolicyInput {
    pub name: String,
    pub effect: String,
    pub subject: String,
    pub resource: String,
    pub action: String,
    pub conditions: Map<String, Value>,
    pub priority: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AbacCheck {
    pub subject: String,
    pub resource: String,
    pub action: String,
    pub context: Map<String, Value>,
}

impl AbacPolicy {
    fn matches(&self, check: &AbacCheck) -> bool {
        wildcard_eq(&self.subject, check.subject.trim())
            && wildcard_eq(&self.resource, check.resource.trim())
            && wildcard_eq(&self.action, check.action.trim())
            && self.conditions.iter().all(|(k, expected)| {
                check
                    .context
                    .get(k)
                    .is_some_and(|actual| loose_eq(actual, expected))
            })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Role {
    pub id: String,
    pub name: String,
    pub permissions: Vec<Permission>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Permission {
    pub resource: String,
    pub action: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Binding {
    pub id: String,
    pub role_id: String,
    pub role: String,
    pub subject: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JitGrant {
    pub id: String,
    pub subject: String,
    pub resource: String,
    pub action: String,
    pub reason: String,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub token: String,
    #[serde(skip)]
    token_hash: String,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct JitGrantInput {
    pub subject: String,
    pub resource: String,
    pub action: String,
    pub reason: String,
    pub ttl_minutes: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BreakGlassStatus {
    Pending,
    Approved,
    Rejected,
    Revoked,
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakGlassRequest {
    pub id: String,
    pub requester: String,
    pub reason: String,
    pub scope: String,
    pub status: BreakGlassStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub requested_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Delegation {
    pub id: String,
    pub delegate: String,
    pub scope: String,
    pub granted_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DelegationInput {
    pub delegate: String,
    pub scope: String,
    pub granted_by: String,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApprovalPolicy {
    pub id: String,
    pub name: String,
    pub environment: String,
    pub min_approvals: u32,
    pub required_roles: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ApprovalPolicyInput {
    pub name: String,
    pub environment: String,
    pub min_approvals: u32,
    pub required_roles: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Approval {
    pub approver: String,
    pub role: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ApprovalEvaluation {
    pub policy_id: String,
    pub environment: String,
    pub requester: String,
    pub approvals: Vec<Approval>,
}

identified!(AbacPolicy, Role, Binding, JitGrant, BreakGlassRequest, Delegation, ApprovalPolicy);

#[derive(Default)]
pub struct AccessManager {
    abac: Collection<AbacPolicy>,
    roles: Collection<Role>,
    bindings: Collection<Binding>,
    grants: Collection<JitGrant>,
    break_glass: Collection<BreakGlassRequest>,
    delegations: Collection<Delegation>,
    approval_policies: Collection<ApprovalPolicy>,
}

impl AccessManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_abac_policy(&self, input: AbacPolicyInput) -> ManagerResult<AbacPolicy> {
        let policy = AbacPolicy {
            id: new_id("abac"),
            name: require("name", &input.name)?,
            effect: Effect::parse(&input.effect)?,
            subject: require("subject", &input.subject)?,
            resource: require("resource", &input.resource)?,
            action: require("action", &input.action)?,
            conditions: input.conditions,
            priority: input.priority,
            created_at: now(),
        };
        Ok(self.abac.insert(policy))
    }

    pub fn list_abac_policies(&self, limit: usize) -> Vec<AbacPolicy> {
        self.abac.list(limit)
    }

    pub fn get_abac_policy(&self, id: &str) -> ManagerResult<AbacPolicy> {
        self.abac
            .get(id)
            .ok_or_else(|| ManagerError::not_found("abac policy not found"))
    }

    pub fn delete_abac_policy(&self, id: &str) -> ManagerResult<AbacPolicy> {
        self.abac
            .remove(id)
            .ok_or_else(|| ManagerError::not_found("abac policy not found"))
    }

    /// Highest-priority matching policy decides; deny wins ties; no match denies.
    /// Returns the decision object and whether access is allowed.
    pub fn check_abac(&self, check: &AbacCheck) -> (Value, bool) {
        let mut matching: Vec<AbacPolicy> = self
            .abac
            .snapshot()
            .into_iter()
            .filter(|p| p.matches(check))
            .collect();
        matching.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| (a.effect == Effect::Allow).cmp(&(b.effect == Effect::Allow)))
        });
        match matching.first() {
            Some(p) => {
                let allowed = p.effect == Effect::Allow;
                (
                    json!({
                        "allowed": allowed,
                        "effect": p.effect,
                        "policy_id": p.id,
                        "policy": p.name,
                        "matched": matching.len(),
                        "reason": if allowed { "allowed by policy" } else { "denied by policy" },
                    }),
                    allowed,
                )
            }
            None => (
                json!({
                    "allowed": false,
                    "effect": Effect::Deny,
                    "matched": 0,
                    "reason": "no matching policy",
                }),
                false,
            ),
        }
    }

    pub fn create_role(&self, name: &str, permissions: Vec<Permission>) -> ManagerResult<Role> {
        let name = require_lower("name", name)?;
        let permissions = permissions
            .into_iter()
            .map(|p| {
                Ok(Permission {
                    resource: require("permission resource", &p.resource)?,
                    action: require("permission action", &p.action)?,
                })
            })
            .collect::<ManagerResult<Vec<_>>>()?;
        let role = Role {
            id: new_id("role"),
            name: name.clone(),
            permissions,
            created_at: now(),
        };
        self.roles.insert_unique(role, |r| r.name == name, "role")
    }

    pub fn list_roles(&self, limit: usize) -> Vec<Role> {
        self.roles.list(limit)
    }

    /// `role` may be a role id or name; it must exist.
    pub fn create_binding(&self, role: &str, subject: &str) -> ManagerResult<Binding> {
        let key = require("role", role)?;
        let subject = require("subject", subject)?;
        let lowered = key.to_lowercase();
        let role = self
            .roles
            .find(|r| r.id == key || r.name == lowered)
            .ok_or_else(|| ManagerError::not_found("role not found"))?;
        let binding = Binding {
            id: new_id("binding"),
            role_id: role.id.clone(),
            role: role.name,
            subject: subject.clone(),
            created_at: now(),
        };
        let role_id = role.id;
        self.bindings.insert_unique(
            binding,
            |b| b.role_id == role_id && b.subject == subject,
            "binding",
        )
    }

    pub fn list_bindings(&self, limit: usize) -> Vec<Binding> {
        self.bindings.list(limit)
    }

    pub fn check_rbac(&self, subject: &str, resource: &str, action: &str) -> (Value, bool) {
        let subject = subject.trim();
        let role_ids: BTreeSet<String> = self
            .bindings
            .snapshot()
            .into_iter()
            .filter(|b| b.subject == subject)
            .map(|b| b.role_id)
            .collect();
        let granted_by = self
            .roles
            .snapshot()
            .into_iter()
            .filter(|r| role_ids.contains(&r.id))
            .find(|r| {
                r.permissions.iter().any(|p| {
                    wildcard_eq(&p.resource, resource.trim()) && wildcard_eq(&p.action, action.trim())
                })
            });
        let allowed = granted_by.is_some();
        (
            json!({
                "allowed": allowed,
                "subject": subject,
                "resource": resource.trim(),
                "action": action.trim(),
                "role": granted_by.map(|r| r.name),
            }),
            allowed,
        )
    }

    /// Issue a grant; the returned copy carries the one-time token.
    pub fn issue_grant(&self, input: JitGrantInput) -> ManagerResult<JitGrant> {
        let ttl = if input.ttl_minutes > 0 {
            input.ttl_minutes.min(24 * 60)
        } else {
            60
        };
        let token = new_token();
        let issued_at = now();
        let grant = JitGrant {
            id: new_id("jit"),
            subject: require("subject", &input.subject)?,
            resource: require("resource", &input.resource)?,
            action: require("action", &input.action)?,
            reason: require("reason", &input.reason)?,
            expires_at: issued_at + Duration::minutes(ttl),
            revoked: false,
            token_hash: sha256_hex(token.as_bytes()),
            token: REDACTED_VALUE.to_string(),
            issued_at,
        };
        self.grants.insert(grant.clone());
        Ok(JitGrant { token, ..grant })
    }

    pub fn list_grants(&self, limit: usize) -> Vec<JitGrant> {
        self.grants.list(limit)
    }

    /// 401 when the token is unknown, expired or revoked; 403 when it does not
    /// cover `resource`/`action`.
    pub fn validate_grant(&self, token: &str, resource: &str, action: &str) -> ManagerResult<JitGrant> {
        let token = require("token", token)?;
        let hash = sha256_hex(token.as_bytes());
        let grant = self
            .grants
            .find(|g| g.token_hash == hash)
            .ok_or_else(|| ManagerError::Unauthorized("invalid grant token".to_string()))?;
        if grant.revoked {
            return Err(ManagerError::Unauthorized("grant revoked".to_string()));
        }
        if now() >= grant.expires_at {
            return Err(ManagerError::Unauthorized("grant expired".to_string()));
        }
        let resource = resource.trim();
        let action = action.trim();
        if (!resource.is_empty() && !wildcard_eq(&grant.resource, resource))
            || (!action.is_empty() && !wildcard_eq(&grant.action, action))
        {
            return Err(ManagerError::Forbidden(
                "grant does not cover resource or action".to_string(),
            ));
        }
        Ok(grant)
    }

    pub fn revoke_grant(&self, id: &str) -> ManagerResult<JitGrant> {
        let id = require("id", id)?;
        self.grants.update(&id, "grant", |g| {
            if g.revoked {
                return Err(ManagerError::conflict("grant already revoked"));
            }
            g.revoked = true;
            Ok(g.clone())
        })
    }

    pub fn request_break_glass(&self, requester: &str, reason: &str, scope: &str) -> ManagerResult<BreakGlassRequest> {
        let ts = now();
        let request = BreakGlassRequest {
            id: new_id("bg"),
            requester: require("requester", requester)?,
            reason: require("reason", reason)?,
            scope: if scope.trim().is_empty() {
                "*".to_string()
            } else {
                scope.trim().to_string()
            },
            status: BreakGlassStatus::Pending,
            decided_by: None,
            expires_at: None,
            requested_at: ts,
            updated_at: ts,
        };
        Ok(self.break_glass.insert(request))
    }

    pub fn list_break_glass(&self, limit: usize) -> Vec<BreakGlassRequest> {
        self.break_glass.list(limit)
    }

    /// `approve`/`reject` only from pending, never by the requester; `revoke` only
    /// from approved.
    pub fn decide_break_glass(&self, id: &str, action: &str, actor: &str, ttl_minutes: i64) -> ManagerResult<BreakGlassRequest> {
        let actor = require("actor", actor)?;
        self.break_glass.update(id, "break-glass request", |req| {
            let deny = |reason: &str, req: &BreakGlassRequest| {
                ManagerError::denied(
                    reason,
                    json!({ "request_id": req.id, "status": req.status, "action": action }),
                )
            };
            match action {
                "approve" | "reject" => {
                    if req.status != BreakGlassStatus::Pending {
                        return Err(deny("break-glass request is not pending", &*req));
                    }
                    if req.requester == actor {
                        return Err(deny("self-approval is not allowed", &*req));
                    }
                    if action == "approve" {
                        req.status = BreakGlassStatus::Approved;
                        let ttl = if ttl_minutes > 0 { ttl_minutes.min(240) } else { 60 };
                        req.expires_at = Some(now() + Duration::minutes(ttl));
                    } else {
                        req.status = BreakGlassStatus::Rejected;
                    }
                }
                "revoke" => {
                    if req.status != BreakGlassStatus::Approved {
                        return Err(deny("only approved requests can be revoked", &*req));
                    }
                    req.status = BreakGlassStatus::Revoked;
                }
                other => {
                    return Err(ManagerError::invalid(format!("unknown break-glass action {other:?}")))
                }
            }
            req.decided_by = Some(actor.clone());
            req.updated_at = now();
            Ok(req.clone())
        })
    }

    pub fn create_delegation(&self, input: DelegationInput) -> ManagerResult<Delegation> {
        if input.expires_at.is_some_and(|t| t <= now()) {
            return Err(ManagerError::invalid("expires_at must be in the future"));
        }
        let delegation = Delegation {
            id: new_id("delegation"),
            delegate: require("delegate", &input.delegate)?,
            scope: require("scope", &input.scope)?,
            granted_by: require("granted_by", &input.granted_by)?,
            expires_at: input.expires_at,
            created_at: now(),
        };
        if delegation.delegate == delegation.granted_by {
            return Err(ManagerError::invalid("cannot delegate to yourself"));
        }
        Ok(self.delegations.insert(delegation))
    }

    pub fn list_delegations(&self, limit: usize) -> Vec<Delegation> {
        self.delegations.list(limit)
    }

    pub fn create_approval_policy(&self, input: ApprovalPolicyInput) -> ManagerResult<ApprovalPolicy> {
        let policy = ApprovalPolicy {
            id: new_id("approval"),
            name: require("name", &input.name)?,
            environment: require_lower("environment", &input.environment)?,
            min_approvals: input.min_approvals.max(1),
            required_roles: clean_list(&input.required_roles)
                .into_iter()
                .map(|r| r.to_lowercase())
                .collect(),
            created_at: now(),
        };
        Ok(self.approval_policies.insert(policy))
    }

    pub fn list_approval_policies(&self, limit: usize) -> Vec<ApprovalPolicy> {
        self.approval_policies.list(limit)
    }

    /// Distinct approvers (excluding the requester) must reach `min_approvals` and
    /// cover every required role.
    pub fn evaluate_approvals(&self, eval: &ApprovalEvaluation) -> ManagerResult<Value> {
        let env = eval.environment.trim().to_lowercase();
        let policy = if !eval.policy_id.trim().is_empty() {
            self.approval_policies.get(eval.policy_id.trim())
        } else if !env.is_empty() {
            self.approval_policies.find(|p| p.environment == env)
        } else {
            return Err(ManagerError::invalid("policy_id or environment is required"));
        }
        .ok_or_else(|| ManagerError::not_found("approval policy not found"))?;

        let requester = eval.requester.trim();
        let mut approvers = BTreeSet::new();
        let mut roles = BTreeSet::new();
        for a in &eval.approvals {
            let who = a.approver.trim();
            if who.is_empty() || who == requester {
                continue;
            }
            if approvers.insert(who.to_string()) {
                roles.insert(a.role.trim().to_lowercase());
            }
        }
        let missing_roles: Vec<&String> = policy
            .required_roles
            .iter()
            .filter(|r| !roles.contains(*r))
            .collect();
        let satisfied = approvers.len() as u32 >= policy.min_approvals && missing_roles.is_empty();
        let body = json!({
            "policy_id": policy.id,
            "satisfied": satisfied,
            "approvals": approvers.len(),
            "min_approvals": policy.min_approvals,
            "missing_roles": missing_roles,
        });
        if satisfied {
            Ok(body)
        } else {
            Err(ManagerError::denied("approval policy not satisfied", body))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn abac(name: &str, effect: &str, cond: Value, priority: i64) -> AbacPolicyInput {
        AbacPolicyInput {
            name: name.into(),
            effect: effect.into(),
            subject: "sre:oncall".into(),
            resource: "run".into(),
            action: "apply".into(),
            conditions: cond.as_object().cloned().unwrap_or_default(),
            priority,
        }
    }

    fn check(ctx: Value) -> AbacCheck {
        AbacCheck {
            subject: "sre:oncall".into(),
            resource: "run".into(),
            action: "apply".into(),
            context: ctx.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn test_abac_deny_then_allow() {
        let m = AccessManager::new();
        m.create_abac_policy(abac("deny-freeze", "deny", json!({"freeze_active": "true"}), 100))
            .unwrap();
        assert!(!m.check_abac(&check(json!({"freeze_active": "true"}))).1);
        // nothing matches yet for the unfrozen context
        assert!(!m.check_abac(&check(json!({"freeze_active": "false"}))).1);
        m.create_abac_policy(abac("allow-normal", "allow", json!({"freeze_active": "false"}), 50))
            .unwrap();
        assert!(m.check_abac(&check(json!({"freeze_active": "false"}))).1);
        assert!(!m.check_abac(&check(json!({"freeze_active": "true"}))).1);
    }

    #[test]
    fn test_abac_deny_wins_ties() {
        let m = AccessManager::new();
        m.create_abac_policy(abac("a", "allow", json!({}), 10)).unwrap();
        m.create_abac_policy(abac("d", "deny", json!({}), 10)).unwrap();
        let (decision, allowed) = m.check_abac(&check(json!({})));
        assert!(!allowed);
        assert_eq!(decision["policy"], "d");
    }

    #[test]
    fn test_rbac_binding_requires_role() {
        let m = AccessManager::new();
        assert!(matches!(
            m.create_binding("admin", "alice"),
            Err(ManagerError::NotFound(_))
        ));
        m.create_role(
            "Operator",
            vec![Permission {
                resource: "jobs".into(),
                action: "*".into(),
            }],
        )
        .unwrap();
        m.create_binding("operator", "alice").unwrap();
        assert!(m.check_rbac("alice", "jobs", "cancel").1);
        assert!(!m.check_rbac("alice", "nodes", "cancel").1);
        assert!(!m.check_rbac("bob", "jobs", "cancel").1);
    }

    #[test]
    fn test_jit_grant_lifecycle() {
        let m = AccessManager::new();
        let grant = m
            .issue_grant(JitGrantInput {
                subject: "alice".into(),
                resource: "db".into(),
                action: "read".into(),
                reason: "incident".into(),
                ttl_minutes: 5,
            })
            .unwrap();
        assert_ne!(grant.token, REDACTED_VALUE);
        assert_eq!(m.list_grants(10)[0].token, REDACTED_VALUE);
        assert!(m.validate_grant(&grant.token, "db", "read").is_ok());
        assert!(matches!(
            m.validate_grant(&grant.token, "db", "write"),
            Err(ManagerError::Forbidden(_))
        ));
        assert!(matches!(
            m.validate_grant("bogus", "db", "read"),
            Err(ManagerError::Unauthorized(_))
        ));
        m.revoke_grant(&grant.id).unwrap();
        assert!(matches!(
            m.validate_grant(&grant.token, "db", "read"),
            Err(ManagerError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_break_glass_rules() {
        let m = AccessManager::new();
        let req = m.request_break_glass("alice", "outage", "prod").unwrap();
        assert!(matches!(
            m.decide_break_glass(&req.id, "approve", "alice", 0),
            Err(ManagerError::Denied { .. })
        ));
        assert!(matches!(
            m.decide_break_glass(&req.id, "revoke", "bob", 0),
            Err(ManagerError::Denied { .. })
        ));
        let approved = m.decide_break_glass(&req.id, "approve", "bob", 30).unwrap();
        assert_eq!(approved.status, BreakGlassStatus::Approved);
        assert!(m.decide_break_glass(&req.id, "reject", "carol", 0).is_err());
        let revoked = m.decide_break_glass(&req.id, "revoke", "carol", 0).unwrap();
        assert_eq!(revoked.status, BreakGlassStatus::Revoked);
    }

    #[test]
    fn test_approval_policy_evaluation() {
        let m = AccessManager::new();
        m.create_approval_policy(ApprovalPolicyInput {
            name: "prod".into(),
            environment: "Prod".into(),
            min_approvals: 2,
            required_roles: vec!["SRE".into()],
        })
        .unwrap();
        let mut eval = ApprovalEvaluation {
            environment: "prod".into(),
            requester: "alice".into(),
            approvals: vec![
                Approval {
                    approver: "alice".into(),
                    role: "sre".into(),
                },
                Approval {
                    approver: "bob".into(),
                    role: "dev".into(),
                },
            ],
            ..Default::default()
        };
        assert!(m.evaluate_approvals(&eval).is_err());
        eval.approvals.push(Approval {
            approver: "carol".into(),
            role: "sre".into(),
        });
        assert!(m.evaluate_approvals(&eval).is_ok());
    }
}
