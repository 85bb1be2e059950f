//! Per-tenant admission limits.

use super::{now, require_lower, ManagerError, ManagerResult};
use crate::store::{Collection, Identified};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantPolicy {
    pub tenant: String,
    pub requests_per_minute: u32,
    pub max_concurrent_runs: u32,
    pub max_queue_share_percent: u32,
    pub updated_at: DateTime<Utc>,
}

impl Identified for TenantPolicy {
    fn id(&self) -> &str {
        &self.tenant
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TenantPolicyInput {
    pub tenant: String,
    pub requests_per_minute: u32,
    pub max_concurrent_runs: u32,
    pub max_queue_share_percent: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AdmitRequest {
    pub tenant: String,
    pub tenant_queued: u64,
    pub total_queued: u64,
    pub tenant_running: u64,
    pub requests_last_minute: u64,
}

#[derive(Default)]
pub struct TenancyManager {
    policies: Collection<TenantPolicy>,
}

/// Tenant used when a request names none.
pub const DEFAULT_TENANT: &str = "default";

impl TenancyManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored policy and whether it was newly created.
    pub fn upsert(&self, input: TenantPolicyInput) -> ManagerResult<(TenantPolicy, bool)> {
        let tenant = tenant_name(&input.tenant)?;
        if input.max_queue_share_percent == 0 || input.max_queue_share_percent > 100 {
            return Err(ManagerError::invalid(
                "max_queue_share_percent must be between 1 and 100",
            ));
        }
        if input.requests_per_minute == 0 || input.max_concurrent_runs == 0 {
            return Err(ManagerError::invalid(
                "requests_per_minute and max_concurrent_runs must be positive",
            ));
        }
        let policy = TenantPolicy {
            tenant,
            requests_per_minute: input.requests_per_minute,
            max_concurrent_runs: input.max_concurrent_runs,
            max_queue_share_percent: input.max_queue_share_percent,
            updated_at: now(),
        };
        let replaced = self.policies.upsert(policy.clone());
        Ok((policy, !replaced))
    }

    pub fn list(&self, limit: usize) -> Vec<TenantPolicy> {
        self.policies.list(limit)
    }

    /// Admission decision. Queue share is `tenant_queued` over `total_queued`, or over
    /// `queue_capacity` when the caller reports no total.
    pub fn admit(&self, req: &AdmitRequest, queue_capacity: usize) -> ManagerResult<Value> {
        let tenant = tenant_name(&req.tenant)?;
        let policy = self
            .policies
            .get(&tenant)
            .ok_or_else(|| ManagerError::not_found("tenant policy not found"))?;

        let denominator = if req.total_queued > 0 {
            req.total_queued
        } else {
            (queue_capacity as u64).max(1)
        };
        let share = req.tenant_queued as f64 * 100.0 / denominator as f64;

        let mut violations = Vec::new();
        if share > f64::from(policy.max_queue_share_percent) {
            violations.push(format!(
                "queue share {share:.1}% exceeds {}%",
                policy.max_queue_share_percent
            ));
        }
        if req.tenant_running >= u64::from(policy.max_concurrent_runs) && req.tenant_running > 0 {
            violations.push(format!(
                "concurrent runs {} reach limit {}",
                req.tenant_running, policy.max_concurrent_runs
            ));
        }
        if req.requests_last_minute > u64::from(policy.requests_per_minute) {
            violations.push(format!(
                "request rate {} exceeds {} per minute",
                req.requests_last_minute, policy.requests_per_minute
            ));
        }

        let body = json!({
            "tenant": tenant,
            "admitted": violations.is_empty(),
            "queue_share_percent": (share * 10.0).round() / 10.0,
            "violations": violations,
            "policy": policy,
        });
        if violations.is_empty() {
            Ok(body)
        } else {
            Err(ManagerError::denied("tenant limit exceeded", body))
        }
    }
}

fn tenant_name(raw: &str) -> ManagerResult<String> {
    if raw.trim().is_empty() {
        return Ok(DEFAULT_TENANT.to_string());
    }
    require_lower("tenant", raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> TenantPolicyInput {
        TenantPolicyInput {
            tenant: "".into(),
            requests_per_minute: 120,
            max_concurrent_runs: 10,
            max_queue_share_percent: 40,
        }
    }

    #[test]
    fn test_share_against_capacity() {
        let t = TenancyManager::new();
        let (_, created) = t.upsert(policy()).unwrap();
        assert!(created);
        let ok = AdmitRequest {
            tenant_queued: 20,
            ..Default::default()
        };
        assert!(t.admit(&ok, 100).is_ok());
        let over = AdmitRequest {
            tenant_queued: 70,
            ..Default::default()
        };
        assert!(matches!(t.admit(&over, 100), Err(ManagerError::Denied { .. })));
    }

    #[test]
    fn test_upsert_replaces() {
        let t = TenancyManager::new();
        t.upsert(policy()).unwrap();
        let (p, created) = t
            .upsert(TenantPolicyInput {
                max_queue_share_percent: 80,
                ..policy()
            })
            .unwrap();
        assert!(!created);
        assert_eq!(p.max_queue_share_percent, 80);
        assert_eq!(t.list(100).len(), 1);
    }

    #[test]
    fn test_rate_and_concurrency_limits() {
        let t = TenancyManager::new();
        t.upsert(policy()).unwrap();
        let busy = AdmitRequest {
            tenant_running: 10,
            ..Default::default()
        };
        assert!(t.admit(&busy, 100).is_err());
        let chatty = AdmitRequest {
            requests_last_minute: 121,
            ..Default::default()
        };
        assert!(t.admit(&chatty, 100).is_err());
        let unknown = AdmitRequest {
            tenant: "acme".into(),
            ..Default::default()
        };
        assert!(matches!(t.admit(&unknown, 100), Err(ManagerError::NotFound(_))));
    }

    #[test]
    fn test_invalid_share() {
        let t = TenancyManager::new();
        assert!(t
            .upsert(TenantPolicyInput {
                max_queue_share_percent: 0,
                ..policy()
            })
            .is_err());
    }
}
