//! # Managers Module
//!
//! In-process domain services. Adapters in [`crate::api`] decode and normalize input,
//! call exactly one named manager operation, and map the [`ManagerError`] outcome onto
//! the HTTP status table. Managers never see HTTP types and never publish events.
//!
//! Every manager serializes concurrent mutations of the same entity through its own
//! [`crate::store::Collection`] locks; conflicts surface as [`ManagerError::Conflict`]
//! or [`ManagerError::Denied`].

/// `Identified` for records keyed by their `id` field.
macro_rules! identified {
    ($($ty:ty),+ $(,)?) => {
        $(impl crate::store::Identified for $ty {
            fn id(&self) -> &str {
                &self.id
            }
        })+
    };
}

pub mod access;
pub mod adhoc;
pub mod agents;
pub mod catalog;
pub mod commands;
pub mod compliance;
pub mod control;
pub mod execution;
pub mod gitops;
pub mod inventory;
pub mod notify;
pub mod operations;
pub mod packages;
pub mod policy;
pub mod queue;
pub mod release;
pub mod secrets;
pub mod tenancy;

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

pub type ManagerResult<T> = Result<T, ManagerError>;

#[derive(Debug, Error)]
pub enum ManagerError {
    /// Validation failure (400)
    #[error("{0}")]
    Invalid(String),
    #[error("{0}")]
    NotFound(String),
    /// Domain denial (409) with a structured explanation
    #[error("{reason}")]
    Denied { reason: String, detail: Value },
    /// Duplicate or conflicting state (409)
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Internal(String),
}

impl ManagerError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn denied(reason: impl Into<String>, detail: Value) -> Self {
        Self::Denied {
            reason: reason.into(),
            detail,
        }
    }
}

impl From<serde_json::Error> for ManagerError {
    fn from(err: serde_json::Error) -> Self {
        ManagerError::Internal(format!("encoding failed: {err}"))
    }
}

pub(crate) fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Positive `requested` capped at `max`; zero or negative → `default`.
pub(crate) fn bounded(requested: i64, default: i64, max: i64) -> i64 {
    if requested > 0 {
        requested.min(max)
    } else {
        default
    }
}

/// Trimmed, non-empty value or `<field> is required`.
pub(crate) fn require(field: &str, value: &str) -> ManagerResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ManagerError::Invalid(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}

/// Trimmed, lowercased, non-empty value.
pub(crate) fn require_lower(field: &str, value: &str) -> ManagerResult<String> {
    require(field, value).map(|s| s.to_lowercase())
}

/// Trim every entry and drop empties, keeping order and removing duplicates.
pub(crate) fn clean_list(values: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(values.len());
    for v in values {
        let v = v.trim();
        if !v.is_empty() && !out.iter().any(|o| o == v) {
            out.push(v.to_string());
        }
    }
    out
}

/// `*` or exact match.
pub(crate) fn wildcard_eq(pattern: &str, value: &str) -> bool {
    pattern == "*" || pattern == value
}

/// Compare a JSON value against an expected one, treating scalars by their
/// string form (`true` equals `"true"`).
pub(crate) fn loose_eq(actual: &Value, expected: &Value) -> bool {
    fn scalar(v: &Value) -> Option<String> {
        match v {
            Value::String(s) => Some(s.clone()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Number(n) => Some(n.to_string()),
            Value::Null => Some(String::new()),
            _ => None,
        }
    }
    match (scalar(actual), scalar(expected)) {
        (Some(a), Some(e)) => a == e,
        _ => actual == expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_clean_list() {
        let input = vec![" a ".to_string(), "".into(), "b".into(), "a".into()];
        assert_eq!(clean_list(&input), vec!["a", "b"]);
    }

    #[test]
    fn test_loose_eq() {
        assert!(loose_eq(&json!(true), &json!("true")));
        assert!(loose_eq(&json!("1"), &json!(1)));
        assert!(!loose_eq(&json!("false"), &json!("true")));
        assert!(loose_eq(&json!({"a": 1}), &json!({"a": 1})));
    }

    #[test]
    fn test_bounded() {
        assert_eq!(bounded(0, 30, 3600), 30);
        assert_eq!(bounded(-5, 30, 3600), 30);
        assert_eq!(bounded(90, 30, 3600), 90);
        assert_eq!(bounded(i64::MAX, 30, 3600), 3600);
    }

    #[test]
    fn test_require() {
        assert_eq!(require_lower("environment", " Prod ").unwrap(), "prod");
        assert!(matches!(require("name", " "), Err(ManagerError::Invalid(_))));
    }
}
