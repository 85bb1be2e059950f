//! Operational gates: emergency stop, change freeze and maintenance windows.
//!
//! Gate state is read on every enqueue, so it lives in [`ArcSwap`] snapshots and
//! readers never take a lock.

use super::{now, require, ManagerError, ManagerResult};
use crate::store::{Collection, Identified};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EmergencyStop {
    pub enabled: bool,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Freeze {
    pub enabled: bool,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Freeze {
    /// Enabled and not past `until`.
    pub fn is_active(&self) -> bool {
        self.enabled && self.until.is_none_or(|until| now() < until)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Maintenance {
    pub target: String,
    pub enabled: bool,
    pub reason: String,
    pub updated_at: DateTime<Utc>,
}

impl Identified for Maintenance {
    fn id(&self) -> &str {
        &self.target
    }
}

pub struct ControlManager {
    emergency: ArcSwap<EmergencyStop>,
    freeze: ArcSwap<Freeze>,
    maintenance: Collection<Maintenance>,
}

impl Default for ControlManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlManager {
    pub fn new() -> Self {
        Self {
            emergency: ArcSwap::from_pointee(EmergencyStop::default()),
            freeze: ArcSwap::from_pointee(Freeze::default()),
            maintenance: Collection::new(),
        }
    }

    pub fn emergency_stop(&self) -> EmergencyStop {
        self.emergency.load().as_ref().clone()
    }

    pub fn set_emergency_stop(&self, enabled: bool, reason: &str) -> EmergencyStop {
        let next = EmergencyStop {
            enabled,
            reason: reason.trim().to_string(),
            updated_at: Some(now()),
        };
        if enabled {
            warn!(reason = %next.reason, "emergency stop engaged");
        }
        self.emergency.store(Arc::new(next.clone()));
        next
    }

    pub fn freeze(&self) -> Freeze {
        self.freeze.load().as_ref().clone()
    }

    pub fn set_freeze(
        &self,
        enabled: bool,
        reason: &str,
        until: Option<DateTime<Utc>>,
    ) -> ManagerResult<Freeze> {
        if enabled && until.is_some_and(|u| u <= now()) {
            return Err(ManagerError::invalid("until must be in the future"));
        }
        let next = Freeze {
            enabled,
            reason: reason.trim().to_string(),
            until,
            updated_at: Some(now()),
        };
        self.freeze.store(Arc::new(next.clone()));
        Ok(next)
    }

    /// Emergency stop always denies; an active freeze denies unless `force`.
    pub fn check_enqueue(&self, force: bool) -> ManagerResult<()> {
        self.check_emergency_stop()?;
        let freeze = self.freeze.load();
        if freeze.is_active() && !force {
            return Err(ManagerError::denied(
                "change freeze active",
                json!({ "freeze": freeze.as_ref(), "override_header": "X-Force-Apply" }),
            ));
        }
        Ok(())
    }

    pub fn check_emergency_stop(&self) -> ManagerResult<()> {
        let stop = self.emergency.load();
        if stop.enabled {
            return Err(ManagerError::denied(
                "emergency stop active",
                json!({ "emergency_stop": stop.as_ref() }),
            ));
        }
        Ok(())
    }

    pub fn set_maintenance(&self, target: &str, enabled: bool, reason: &str) -> ManagerResult<Maintenance> {
        let entry = Maintenance {
            target: require("target", target)?,
            enabled,
            reason: reason.trim().to_string(),
            updated_at: now(),
        };
        self.maintenance.upsert(entry.clone());
        Ok(entry)
    }

    pub fn maintenance(&self) -> Vec<Maintenance> {
        self.maintenance.snapshot()
    }

    pub fn in_maintenance(&self, target: &str) -> bool {
        self.maintenance
            .get(target)
            .is_some_and(|m| m.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_freeze_honours_force() {
        let c = ControlManager::new();
        assert!(c.check_enqueue(false).is_ok());
        c.set_freeze(true, "release week", None).unwrap();
        assert!(matches!(
            c.check_enqueue(false),
            Err(ManagerError::Denied { .. })
        ));
        assert!(c.check_enqueue(true).is_ok());
    }

    #[test]
    fn test_emergency_stop_ignores_force() {
        let c = ControlManager::new();
        c.set_emergency_stop(true, "incident");
        let err = c.check_enqueue(true).unwrap_err();
        assert_eq!(err.to_string(), "emergency stop active");
        c.set_emergency_stop(false, "");
        assert!(c.check_enqueue(true).is_ok());
    }

    #[test]
    fn test_expired_freeze_is_inactive() {
        let freeze = Freeze {
            enabled: true,
            until: Some(now() - chrono::Duration::seconds(1)),
            ..Default::default()
        };
        assert!(!freeze.is_active());
        let c = ControlManager::new();
        assert!(c
            .set_freeze(true, "x", Some(now() - chrono::Duration::seconds(5)))
            .is_err());
    }

    #[test]
    fn test_maintenance_upsert() {
        let c = ControlManager::new();
        c.set_maintenance("db-01", true, "patching").unwrap();
        c.set_maintenance("db-01", false, "done").unwrap();
        assert_eq!(c.maintenance().len(), 1);
        assert!(!c.in_maintenance("db-01"));
        assert!(c.set_maintenance(" ", true, "").is_err());
    }
}
