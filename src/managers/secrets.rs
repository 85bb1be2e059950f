//! Secret integrations, the encrypted secret store and runtime secret sessions.
//!
//! Plaintext only leaves this module through [`SecretsManager::resolve`] and the
//! creation response of a session lease. Everything else is masked with the
//! sentinel for its surface.

use super::{bounded, clean_list, now, require, require_lower, ManagerError, ManagerResult};
use crate::crypto::SecretCipher;
use crate::ids::{new_id, new_token};
use crate::logging::{mask_sensitive, REDACTED_INTEGRATION, REDACTED_VALUE};
use crate::paths::{write_state_json, StateDir};
use crate::store::Collection;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::Path;
use tracing::{debug, info};

pub const DEFAULT_SESSION_TTL_SECONDS: i64 = 3600;
/// Longest session lease (24 hours); renewals reuse the stored TTL.
pub const MAX_SESSION_TTL_SECONDS: i64 = 24 * 3600;

#[derive(Debug, Clone, Serialize)]
pub struct Integration {
    pub id: String,
    pub name: String,
    pub provider: String,
    pub address: String,
    pub token: String,
    pub config: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl Integration {
    fn masked(mut self) -> Self {
        if !self.token.is_empty() {
            self.token = REDACTED_INTEGRATION.to_string();
        }
        let mut config = Value::Object(std::mem::take(&mut self.config));
        mask_sensitive(&mut config, REDACTED_INTEGRATION);
        if let Value::Object(map) = config {
            self.config = map;
        }
        self
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IntegrationInput {
    pub name: String,
    pub provider: String,
    pub address: String,
    pub token: String,
    pub config: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretStatus {
    Active,
    Destroyed,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredSecret {
    pub id: String,
    pub name: String,
    pub description: String,
    pub version: u32,
    /// Always the redaction sentinel.
    pub value: &'static str,
    pub status: SecretStatus,
    pub key_id: String,
    #[serde(skip)]
    envelope: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub destroyed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SecretPutInput {
    pub name: String,
    pub value: String,
    pub description: String,
}

/// Identifies a secret by `id` or, failing that, by `name`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SecretRef {
    pub id: String,
    pub name: String,
    /// New plaintext for rotate.
    pub value: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedSecret {
    pub id: String,
    pub name: String,
    pub version: u32,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Revoked,
}

#[derive(Debug, Clone, Serialize)]
pub struct RuntimeSession {
    pub id: String,
    pub subject: String,
    pub secrets: Vec<String>,
    pub lease_token: String,
    pub ttl_seconds: i64,
    pub status: SessionStatus,
    pub recording_path: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub renewed_at: Option<DateTime<Utc>>,
}

impl RuntimeSession {
    fn masked(mut self) -> Self {
        self.lease_token = REDACTED_VALUE.to_string();
        self
    }

    fn ensure_live(&self) -> ManagerResult<()> {
        if self.status == SessionStatus::Revoked {
            return Err(ManagerError::denied(
                "session revoked",
                json!({ "session_id": self.id }),
            ));
        }
        if self.expires_at <= now() {
            return Err(ManagerError::denied(
                "session expired",
                json!({ "session_id": self.id, "expires_at": self.expires_at }),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SessionInput {
    pub subject: String,
    pub secrets: Vec<String>,
    pub ttl_seconds: i64,
}

identified!(Integration, StoredSecret, RuntimeSession);

pub struct SecretsManager {
    cipher: SecretCipher,
    integrations: Collection<Integration>,
    secrets: Collection<StoredSecret>,
    sessions: Collection<RuntimeSession>,
}

impl SecretsManager {
    pub fn new(cipher: SecretCipher) -> Self {
        Self {
            cipher,
            integrations: Collection::new(),
            secrets: Collection::new(),
            sessions: Collection::new(),
        }
    }

    pub fn create_integration(&self, input: IntegrationInput) -> ManagerResult<Integration> {
        let name = require_lower("name", &input.name)?;
        let provider = require_lower("provider", &input.provider)?;
        let integration = Integration {
            id: new_id("integration"),
            name: name.clone(),
            provider,
            address: input.address.trim().to_string(),
            token: input.token.trim().to_string(),
            config: input.config,
            created_at: now(),
        };
        let stored = self
            .integrations
            .insert_unique(integration, |i| i.name == name, "integration")?;
        Ok(stored.masked())
    }

    pub fn list_integrations(&self, limit: usize) -> Vec<Integration> {
        self.integrations
            .list(limit)
            .into_iter()
            .map(Integration::masked)
            .collect()
    }

    pub fn put(&self, input: SecretPutInput) -> ManagerResult<StoredSecret> {
        let name = require("name", &input.name)?;
        if input.value.is_empty() {
            return Err(ManagerError::invalid("value is required"));
        }
        let envelope = self.cipher.encrypt(&input.value)?;
        let at = now();
        let secret = StoredSecret {
            id: new_id("secret"),
            name: name.clone(),
            description: input.description.trim().to_string(),
            version: 1,
            value: REDACTED_VALUE,
            status: SecretStatus::Active,
            key_id: self.cipher.key_id().to_string(),
            envelope,
            created_at: at,
            updated_at: at,
            destroyed_at: None,
        };
        let stored = self.secrets.insert_unique(
            secret,
            |s| s.name == name && s.status == SecretStatus::Active,
            "secret",
        )?;
        info!(secret_id = %stored.id, name = %stored.name, "secret stored");
        Ok(stored)
    }

    pub fn list(&self, limit: usize) -> Vec<StoredSecret> {
        self.secrets.list(limit)
    }

    /// Active match wins over destroyed records of the same name.
    fn lookup(&self, reference: &SecretRef) -> ManagerResult<StoredSecret> {
        let id = reference.id.trim();
        let name = reference.name.trim();
        if id.is_empty() && name.is_empty() {
            return Err(ManagerError::invalid("id or name is required"));
        }
        let found = if !id.is_empty() {
            self.secrets.get(id)
        } else {
            self.secrets
                .find(|s| s.name == name && s.status == SecretStatus::Active)
                .or_else(|| self.secrets.find(|s| s.name == name))
        };
        let secret = found.ok_or_else(|| ManagerError::not_found("secret not found"))?;
        if secret.status == SecretStatus::Destroyed {
            return Err(ManagerError::denied(
                "secret destroyed",
                json!({ "secret_id": secret.id, "name": secret.name }),
            ));
        }
        Ok(secret)
    }

    pub fn resolve(&self, reference: &SecretRef) -> ManagerResult<ResolvedSecret> {
        let secret = self.lookup(reference)?;
        let value = self.cipher.decrypt(&secret.envelope)?;
        debug!(secret_id = %secret.id, "secret resolved");
        Ok(ResolvedSecret {
            id: secret.id,
            name: secret.name,
            version: secret.version,
            value,
        })
    }

    pub fn rotate(&self, reference: &SecretRef) -> ManagerResult<StoredSecret> {
        let current = self.lookup(reference)?;
        if reference.value.is_empty() {
            return Err(ManagerError::invalid("value is required"));
        }
        let envelope = self.cipher.encrypt(&reference.value)?;
        let key_id = self.cipher.key_id().to_string();
        self.secrets.update(&current.id, "secret", |s| {
            s.version += 1;
            s.envelope = envelope;
            s.key_id = key_id;
            s.updated_at = now();
            Ok(s.clone())
        })
    }

    pub fn destroy(&self, reference: &SecretRef) -> ManagerResult<StoredSecret> {
        let current = self.lookup(reference)?;
        self.secrets.update(&current.id, "secret", |s| {
            let at = now();
            s.status = SecretStatus::Destroyed;
            s.envelope.clear();
            s.updated_at = at;
            s.destroyed_at = Some(at);
            Ok(s.clone())
        })
    }

    /// Open a lease over active secrets; the session record lands in
    /// `.masterchef/sessions/<id>.json` with the token masked. The returned
    /// session carries the only plaintext copy of the lease token.
    pub fn create_session(&self, base_dir: &Path, input: SessionInput) -> ManagerResult<RuntimeSession> {
        let subject = require("subject", &input.subject)?;
        let secrets = clean_list(&input.secrets);
        if secrets.is_empty() {
            return Err(ManagerError::invalid("secrets is required"));
        }
        for name in &secrets {
            self.lookup(&SecretRef {
                name: name.clone(),
                ..Default::default()
            })?;
        }
        let ttl_seconds = bounded(
            input.ttl_seconds,
            DEFAULT_SESSION_TTL_SECONDS,
            MAX_SESSION_TTL_SECONDS,
        );
        let id = new_id("session");
        let at = now();
        let mut session = RuntimeSession {
            id: id.clone(),
            subject,
            secrets,
            lease_token: new_token(),
            ttl_seconds,
            status: SessionStatus::Active,
            recording_path: String::new(),
            created_at: at,
            expires_at: at + Duration::seconds(ttl_seconds),
            renewed_at: None,
        };
        let recording = serde_json::to_value(session.clone().masked())?;
        let path = write_state_json(base_dir, StateDir::Sessions, &id, &recording)?;
        session.recording_path = path.display().to_string();
        self.sessions.insert(session.clone());
        info!(session_id = %id, subject = %session.subject, "runtime session opened");
        Ok(session)
    }

    pub fn list_sessions(&self, limit: usize) -> Vec<RuntimeSession> {
        self.sessions
            .list(limit)
            .into_iter()
            .map(RuntimeSession::masked)
            .collect()
    }

    pub fn session_action(&self, id: &str, action: &str) -> ManagerResult<RuntimeSession> {
        let updated = self.sessions.update(id, "session", |s| {
            s.ensure_live()?;
            match action {
                "renew" => {
                    let at = now();
                    s.expires_at = at + Duration::seconds(s.ttl_seconds);
                    s.renewed_at = Some(at);
                }
                "revoke" => s.status = SessionStatus::Revoked,
                other => {
                    return Err(ManagerError::invalid(format!("unknown session action {other}")))
                }
            }
            Ok(s.clone())
        })?;
        Ok(updated.masked())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SecretsManager {
        SecretsManager::new(SecretCipher::new(None).unwrap())
    }

    fn by_name(name: &str) -> SecretRef {
        SecretRef {
            name: name.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_integration_masking() {
        let sm = manager();
        let mut config = Map::new();
        config.insert("role_id".into(), json!("r-1"));
        config.insert("secret_id".into(), json!("s-1"));
        let out = sm
            .create_integration(IntegrationInput {
                name: "Vault".into(),
                provider: "vault".into(),
                token: "hvs.abc".into(),
                config,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(out.token, REDACTED_INTEGRATION);
        assert_eq!(out.config["secret_id"], REDACTED_INTEGRATION);
        assert_eq!(out.config["role_id"], "r-1");
        assert_eq!(sm.list_integrations(10)[0].token, REDACTED_INTEGRATION);
    }

    #[test]
    fn test_store_lifecycle() {
        let sm = manager();
        let stored = sm
            .put(SecretPutInput {
                name: "db".into(),
                value: "hunter2".into(),
                ..Default::default()
            })
            .unwrap();
        let encoded = serde_json::to_value(&stored).unwrap();
        assert_eq!(encoded["value"], REDACTED_VALUE);
        assert!(encoded.get("envelope").is_none());

        let dup = sm.put(SecretPutInput {
            name: "db".into(),
            value: "x".into(),
            ..Default::default()
        });
        assert!(matches!(dup, Err(ManagerError::Conflict(_))));

        assert_eq!(sm.resolve(&by_name("db")).unwrap().value, "hunter2");
        let mut rotate = by_name("db");
        rotate.value = "hunter3".into();
        assert_eq!(sm.rotate(&rotate).unwrap().version, 2);
        assert_eq!(sm.resolve(&by_name("db")).unwrap().value, "hunter3");

        sm.destroy(&by_name("db")).unwrap();
        assert!(matches!(sm.resolve(&by_name("db")), Err(ManagerError::Denied { .. })));
        assert!(matches!(sm.resolve(&by_name("nope")), Err(ManagerError::NotFound(_))));
    }

    #[test]
    fn test_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let sm = manager();
        sm.put(SecretPutInput {
            name: "api".into(),
            value: "k".into(),
            ..Default::default()
        })
        .unwrap();
        let session = sm
            .create_session(
                dir.path(),
                SessionInput {
                    subject: "deployer".into(),
                    secrets: vec!["api".into()],
                    ttl_seconds: 60,
                },
            )
            .unwrap();
        assert_ne!(session.lease_token, REDACTED_VALUE);
        let on_disk = std::fs::read_to_string(&session.recording_path).unwrap();
        assert!(!on_disk.contains(&session.lease_token));
        assert_eq!(sm.list_sessions(10)[0].lease_token, REDACTED_VALUE);

        sm.session_action(&session.id, "renew").unwrap();
        sm.session_action(&session.id, "revoke").unwrap();
        assert!(matches!(
            sm.session_action(&session.id, "renew"),
            Err(ManagerError::Denied { .. })
        ));
    }
}
