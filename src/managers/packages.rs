//! Package artifacts and their supply-chain gates: signing policy, verification,
//! certification, publication checks, maintainer health and cosign-style signatures.

use super::{clean_list, now, require, require_lower, ManagerError, ManagerResult};
use crate::crypto::Signer;
use crate::ids::new_id;
use crate::store::Collection;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

static SHA256_HEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9a-f]{64}$").expect("static regex"));
static SEMVER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^v?\d+\.\d+\.\d+(-[0-9A-Za-z.-]+)?(\+[0-9A-Za-z.-]+)?$").expect("static regex")
});

#[derive(Debug, Clone, Serialize)]
pub struct Artifact {
    pub id: String,
    pub name: String,
    pub version: String,
    pub checksum: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub signature: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub signer: String,
    pub maintainers: Vec<String>,
    pub license: String,
    pub certified: bool,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ArtifactInput {
    pub name: String,
    pub version: String,
    pub checksum: String,
    pub signature: String,
    pub signer: String,
    pub maintainers: Vec<String>,
    pub license: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningPolicy {
    pub require_signature: bool,
    pub trusted_signers: Vec<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CertificationPolicy {
    pub min_maintainers: usize,
    pub require_signature: bool,
    pub allowed_licenses: Vec<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for CertificationPolicy {
    fn default() -> Self {
        Self {
            min_maintainers: 1,
            require_signature: false,
            allowed_licenses: Vec::new(),
            updated_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VerifyInput {
    pub artifact_id: String,
    pub checksum: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PublicationInput {
    pub artifact_id: String,
    pub channel: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MaintainerActivity {
    pub name: String,
    pub last_activity_days: u32,
    pub open_issues: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MaintainerHealthInput {
    pub package: String,
    pub maintainers: Vec<MaintainerActivity>,
    pub max_inactive_days: Option<u32>,
    pub min_active: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CosignSignature {
    pub id: String,
    pub subject: String,
    pub digest: String,
    pub signature: String,
    pub key_id: String,
    pub signed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CosignInput {
    pub subject: String,
    pub digest: String,
    pub signature: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct CosignClaims {
    sub: String,
    digest: String,
    iat: i64,
}

identified!(Artifact, CosignSignature);

pub struct PackagesManager {
    artifacts: Collection<Artifact>,
    signatures: Collection<CosignSignature>,
    signing_policy: RwLock<SigningPolicy>,
    certification_policy: RwLock<CertificationPolicy>,
}

impl Default for PackagesManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PackagesManager {
    pub fn new() -> Self {
        Self {
            artifacts: Collection::new(),
            signatures: Collection::new(),
            signing_policy: RwLock::new(SigningPolicy::default()),
            certification_policy: RwLock::new(CertificationPolicy::default()),
        }
    }

    pub fn register_artifact(&self, input: ArtifactInput) -> ManagerResult<Artifact> {
        let name = require_lower("name", &input.name)?;
        let version = require("version", &input.version)?;
        let checksum = require("checksum", &input.checksum)?.to_lowercase();
        if !SHA256_HEX.is_match(&checksum) {
            return Err(ManagerError::invalid("checksum must be a sha256 hex digest"));
        }
        let artifact = Artifact {
            id: new_id("artifact"),
            name: name.clone(),
            version: version.clone(),
            checksum,
            signature: input.signature.trim().to_string(),
            signer: input.signer.trim().to_string(),
            maintainers: clean_list(&input.maintainers),
            license: input.license.trim().to_string(),
            certified: false,
            registered_at: now(),
        };
        self.artifacts.insert_unique(
            artifact,
            |a| a.name == name && a.version == version,
            "artifact version",
        )
    }

    pub fn list_artifacts(&self, name: Option<&str>, limit: usize) -> Vec<Artifact> {
        self.artifacts
            .list_filtered(limit, |a| name.is_none_or(|n| a.name == n))
    }

    pub fn get_artifact(&self, id: &str) -> Option<Artifact> {
        self.artifacts.get(id)
    }

    pub fn find_artifact(&self, name: &str, version: &str) -> Option<Artifact> {
        let name = name.trim().to_lowercase();
        let version = version.trim();
        self.artifacts
            .find(|a| a.name == name && a.version == version)
    }

    fn artifact(&self, id: &str) -> ManagerResult<Artifact> {
        let id = require("artifact_id", id)?;
        self.get_artifact(&id)
            .ok_or_else(|| ManagerError::not_found("artifact not found"))
    }

    pub fn signing_policy(&self) -> SigningPolicy {
        self.signing_policy.read().clone()
    }

    pub fn set_signing_policy(&self, mut policy: SigningPolicy) -> SigningPolicy {
        policy.trusted_signers = clean_list(&policy.trusted_signers);
        policy.updated_at = Some(now());
        *self.signing_policy.write() = policy.clone();
        policy
    }

    /// Checksum (when supplied) and signing-policy checks.
    pub fn verify(&self, input: &VerifyInput) -> ManagerResult<Value> {
        let artifact = self.artifact(&input.artifact_id)?;
        let policy = self.signing_policy();
        let mut violations = Vec::new();
        let checksum = input.checksum.trim().to_lowercase();
        if !checksum.is_empty() && checksum != artifact.checksum {
            violations.push("checksum mismatch".to_string());
        }
        if policy.require_signature {
            if artifact.signature.is_empty() {
                violations.push("artifact is unsigned".to_string());
            } else if !policy.trusted_signers.is_empty()
                && !policy.trusted_signers.contains(&artifact.signer)
            {
                violations.push(format!("signer {} is not trusted", artifact.signer));
            }
        }
        outcome(
            "artifact verification failed",
            json!({ "artifact_id": artifact.id, "verified": violations.is_empty() }),
            violations,
        )
    }

    pub fn certification_policy(&self) -> CertificationPolicy {
        self.certification_policy.read().clone()
    }

    pub fn set_certification_policy(&self, mut policy: CertificationPolicy) -> CertificationPolicy {
        policy.allowed_licenses = clean_list(&policy.allowed_licenses);
        policy.updated_at = Some(now());
        *self.certification_policy.write() = policy.clone();
        policy
    }

    /// Mark the artifact certified when it satisfies the certification policy.
    pub fn certify(&self, artifact_id: &str) -> ManagerResult<Value> {
        let artifact = self.artifact(artifact_id)?;
        let policy = self.certification_policy();
        let mut violations = Vec::new();
        if artifact.maintainers.len() < policy.min_maintainers {
            violations.push(format!(
                "{} maintainers, {} required",
                artifact.maintainers.len(),
                policy.min_maintainers
            ));
        }
        if policy.require_signature && artifact.signature.is_empty() {
            violations.push("artifact is unsigned".to_string());
        }
        if !policy.allowed_licenses.is_empty() && !policy.allowed_licenses.contains(&artifact.license) {
            violations.push(format!("license {:?} not allowed", artifact.license));
        }
        if violations.is_empty() {
            self.artifacts.update(&artifact.id, "artifact", |a| {
                a.certified = true;
                Ok(())
            })?;
        }
        outcome(
            "certification failed",
            json!({ "artifact_id": artifact.id, "certified": violations.is_empty() }),
            violations,
        )
    }

    pub fn publication_check(&self, input: &PublicationInput) -> ManagerResult<Value> {
        let artifact = self.artifact(&input.artifact_id)?;
        let channel = match input.channel.trim().to_lowercase() {
            c if c.is_empty() => "stable".to_string(),
            c => c,
        };
        let mut violations = Vec::new();
        if !SEMVER.is_match(&artifact.version) {
            violations.push(format!("version {} is not semver", artifact.version));
        }
        if channel == "stable" {
            if !artifact.certified {
                violations.push("artifact is not certified".to_string());
            }
            if artifact.version.contains('-') {
                violations.push("pre-release versions cannot publish to stable".to_string());
            }
        }
        outcome(
            "publication blocked",
            json!({ "artifact_id": artifact.id, "channel": channel, "publishable": violations.is_empty() }),
            violations,
        )
    }

    pub fn maintainer_health(&self, input: &MaintainerHealthInput) -> ManagerResult<Value> {
        let package = require("package", &input.package)?;
        let max_inactive = input.max_inactive_days.unwrap_or(90);
        let min_active = input.min_active.unwrap_or(1);
        let active: Vec<&str> = input
            .maintainers
            .iter()
            .filter(|m| m.last_activity_days <= max_inactive)
            .map(|m| m.name.as_str())
            .collect();
        let open_issues: u32 = input.maintainers.iter().map(|m| m.open_issues).sum();
        let mut violations = Vec::new();
        if active.len() < min_active {
            violations.push(format!("{} active maintainers, {} required", active.len(), min_active));
        }
        outcome(
            "maintainer health check failed",
            json!({
                "package": package,
                "maintainers": input.maintainers.len(),
                "active": active,
                "open_issues": open_issues,
                "healthy": violations.is_empty(),
            }),
            violations,
        )
    }

    pub fn cosign_sign(&self, signer: &Signer, input: &CosignInput) -> ManagerResult<CosignSignature> {
        let subject = require("subject", &input.subject)?;
        let digest = require("digest", &input.digest)?.to_lowercase();
        let signed_at = now();
        let signature = signer.sign(&CosignClaims {
            sub: subject.clone(),
            digest: digest.clone(),
            iat: signed_at.timestamp(),
        })?;
        let record = CosignSignature {
            id: new_id("cosign"),
            subject,
            digest,
            signature,
            key_id: signer.key_id().to_string(),
            signed_at,
        };
        Ok(self.signatures.insert(record))
    }

    /// A bad signature or a digest/subject mismatch is a denial, not an auth error.
    pub fn cosign_verify(&self, signer: &Signer, input: &CosignInput) -> ManagerResult<Value> {
        let digest = require("digest", &input.digest)?.to_lowercase();
        let signature = require("signature", &input.signature)?;
        let claims: CosignClaims = signer.verify(&signature).map_err(|e| {
            ManagerError::denied("signature verification failed", json!({ "detail": e.to_string() }))
        })?;
        let subject = input.subject.trim();
        let mut violations = Vec::new();
        if claims.digest != digest {
            violations.push("digest mismatch".to_string());
        }
        if !subject.is_empty() && claims.sub != subject {
            violations.push("subject mismatch".to_string());
        }
        outcome(
            "signature verification failed",
            json!({ "subject": claims.sub, "digest": digest, "verified": violations.is_empty() }),
            violations,
        )
    }
}

/// `body` plus `violations`; any violation turns the outcome into a denial.
pub(crate) fn outcome(reason: &str, mut body: Value, violations: Vec<String>) -> ManagerResult<Value> {
    let denied = !violations.is_empty();
    if let Value::Object(map) = &mut body {
        map.insert("violations".into(), json!(violations));
    }
    if denied {
        Err(ManagerError::denied(reason, body))
    } else {
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(pm: &PackagesManager, version: &str) -> Artifact {
        pm.register_artifact(ArtifactInput {
            name: "Agent".into(),
            version: version.into(),
            checksum: "AB".repeat(32),
            maintainers: vec!["ana".into()],
            license: "Apache-2.0".into(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_register_rejects_duplicates_and_bad_checksums() {
        let pm = PackagesManager::new();
        let a = artifact(&pm, "1.0.0");
        assert_eq!(a.name, "agent");
        assert_eq!(a.checksum, "ab".repeat(32));
        assert!(matches!(
            pm.register_artifact(ArtifactInput {
                name: "agent".into(),
                version: "1.0.0".into(),
                checksum: "ab".repeat(32),
                ..Default::default()
            }),
            Err(ManagerError::Conflict(_))
        ));
        assert!(matches!(
            pm.register_artifact(ArtifactInput {
                name: "agent".into(),
                version: "2.0.0".into(),
                checksum: "xyz".into(),
                ..Default::default()
            }),
            Err(ManagerError::Invalid(_))
        ));
        assert!(pm.find_artifact("AGENT", "1.0.0").is_some());
    }

    #[test]
    fn test_verify_honours_signing_policy() {
        let pm = PackagesManager::new();
        let a = artifact(&pm, "1.0.0");
        let input = VerifyInput {
            artifact_id: a.id.clone(),
            checksum: a.checksum.clone(),
        };
        assert!(pm.verify(&input).is_ok());
        pm.set_signing_policy(SigningPolicy {
            require_signature: true,
            ..Default::default()
        });
        assert!(matches!(pm.verify(&input), Err(ManagerError::Denied { .. })));
    }

    #[test]
    fn test_certify_then_publish() {
        let pm = PackagesManager::new();
        let a = artifact(&pm, "1.0.0");
        let publish = PublicationInput {
            artifact_id: a.id.clone(),
            channel: "stable".into(),
        };
        assert!(pm.publication_check(&publish).is_err());
        pm.certify(&a.id).unwrap();
        assert!(pm.publication_check(&publish).is_ok());

        pm.set_certification_policy(CertificationPolicy {
            min_maintainers: 2,
            ..Default::default()
        });
        let b = artifact(&pm, "1.1.0");
        assert!(matches!(pm.certify(&b.id), Err(ManagerError::Denied { .. })));
    }

    #[test]
    fn test_maintainer_health() {
        let pm = PackagesManager::new();
        let stale = MaintainerHealthInput {
            package: "agent".into(),
            maintainers: vec![MaintainerActivity {
                name: "ana".into(),
                last_activity_days: 400,
                open_issues: 3,
            }],
            ..Default::default()
        };
        assert!(pm.maintainer_health(&stale).is_err());
    }

    #[test]
    fn test_cosign_roundtrip_and_mismatch() {
        let pm = PackagesManager::new();
        let signer = Signer::new(Some("cosign-key"));
        let sig = pm
            .cosign_sign(
                &signer,
                &CosignInput {
                    subject: "registry/agent:1.0".into(),
                    digest: "sha256:abc".into(),
                    ..Default::default()
                },
            )
            .unwrap();
        let mut check = CosignInput {
            subject: "registry/agent:1.0".into(),
            digest: "sha256:abc".into(),
            signature: sig.signature.clone(),
        };
        assert!(pm.cosign_verify(&signer, &check).is_ok());
        check.digest = "sha256:def".into();
        assert!(matches!(pm.cosign_verify(&signer, &check), Err(ManagerError::Denied { .. })));
        check.signature = "garbage".into();
        assert!(matches!(pm.cosign_verify(&signer, &check), Err(ManagerError::Denied { .. })));
    }
}
