//! Digests, signatures and envelope encryption.
//!
//! - [`sha256_hex`] / [`canonical_json`]: content digests (canonical form sorts object
//!   keys recursively, so key order never changes the digest).
//! - [`Signer`]: HS256 compact JWS over arbitrary claims, used for plan artifacts,
//!   policy bundles and execution credentials.
//! - [`SecretCipher`]: ChaCha20-Poly1305 envelopes `enc:v1:<key_id>:<nonce>:<ciphertext>`
//!   for the secret store.

use crate::managers::{ManagerError, ManagerResult};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use chacha20poly1305::aead::Aead;
use chacha20poly1305::{ChaCha20Poly1305, KeyInit, Nonce};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

const ENVELOPE_PREFIX: &str = "enc:v1:";

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Compact JSON with object keys sorted at every level.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                if let Some(v) = map.get(*key) {
                    write_canonical(v, out);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// 32 bytes of process-local entropy (two ULIDs folded through SHA-256).
pub fn random_key() -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(ulid::Ulid::new().to_bytes());
    hasher.update(ulid::Ulid::new().to_bytes());
    hasher.update(std::process::id().to_le_bytes());
    let mut key = [0u8; 32];
    key.copy_from_slice(&hasher.finalize()[..32]);
    key
}

/// HS256 signer/verifier.
pub struct Signer {
    key_id: String,
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer").field("key_id", &self.key_id).finish()
    }
}

impl Signer {
    /// Use `secret` when configured, otherwise a per-process random key.
    pub fn new(secret: Option<&str>) -> Self {
        let bytes = match secret.map(str::trim).filter(|s| !s.is_empty()) {
            Some(s) => s.as_bytes().to_vec(),
            None => random_key().to_vec(),
        };
        Self {
            key_id: sha256_hex(&bytes)[..8].to_string(),
            encoding: EncodingKey::from_secret(&bytes),
            decoding: DecodingKey::from_secret(&bytes),
        }
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn sign<T: Serialize>(&self, claims: &T) -> ManagerResult<String> {
        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(self.key_id.clone());
        jsonwebtoken::encode(&header, claims, &self.encoding)
            .map_err(|e| ManagerError::Internal(format!("signing failed: {e}")))
    }

    /// Check the signature and decode the claims. Expiry is the caller's concern.
    pub fn verify<T: DeserializeOwned>(&self, token: &str) -> ManagerResult<T> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        jsonwebtoken::decode::<T>(token.trim(), &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| ManagerError::Unauthorized(format!("invalid signature: {e}")))
    }
}

/// Envelope encryption for stored secret values.
pub struct SecretCipher {
    key_id: String,
    key: [u8; 32],
}

impl fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretCipher")
            .field("key_id", &self.key_id)
            .finish()
    }
}

impl SecretCipher {
    /// `key_b64` must decode (standard or URL-safe base64) to 32 bytes; absent → random.
    pub fn new(key_b64: Option<&str>) -> ManagerResult<Self> {
        let key = match key_b64.map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => {
                let bytes = STANDARD
                    .decode(raw)
                    .or_else(|_| URL_SAFE_NO_PAD.decode(raw))
                    .map_err(|e| ManagerError::Invalid(format!("secret store key: {e}")))?;
                <[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| {
                    ManagerError::Invalid("secret store key must be 32 bytes".to_string())
                })?
            }
            None => random_key(),
        };
        Ok(Self {
            key_id: sha256_hex(&key)[..8].to_string(),
            key,
        })
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn encrypt(&self, plaintext: &str) -> ManagerResult<String> {
        let nonce_source = ulid::Ulid::new().to_bytes();
        let nonce = Nonce::from_slice(&nonce_source[..12]);
        let aead = ChaCha20Poly1305::new_from_slice(&self.key)
            .map_err(|e| ManagerError::Internal(format!("cipher init failed: {e}")))?;
        let ciphertext = aead
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| ManagerError::Internal(format!("encryption failed: {e}")))?;
        Ok(format!(
            "{ENVELOPE_PREFIX}{}:{}:{}",
            self.key_id,
            URL_SAFE_NO_PAD.encode(&nonce_source[..12]),
            URL_SAFE_NO_PAD.encode(ciphertext)
        ))
    }

    pub fn decrypt(&self, envelope: &str) -> ManagerResult<String> {
        let rest = envelope
            .strip_prefix(ENVELOPE_PREFIX)
            .ok_or_else(|| ManagerError::Internal("secret envelope is invalid".to_string()))?;
        let mut parts = rest.split(':');
        let (Some(key_id), Some(nonce_b64), Some(ct_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(ManagerError::Internal("secret envelope is invalid".to_string()));
        };
        if key_id != self.key_id {
            return Err(ManagerError::Internal(format!(
                "secret key id {key_id} is not configured"
            )));
        }
        let nonce_raw = URL_SAFE_NO_PAD
            .decode(nonce_b64)
            .map_err(|e| ManagerError::Internal(format!("secret nonce: {e}")))?;
        if nonce_raw.len() != 12 {
            return Err(ManagerError::Internal("secret nonce length is invalid".to_string()));
        }
        let ciphertext = URL_SAFE_NO_PAD
            .decode(ct_b64)
            .map_err(|e| ManagerError::Internal(format!("secret payload: {e}")))?;
        let aead = ChaCha20Poly1305::new_from_slice(&self.key)
            .map_err(|e| ManagerError::Internal(format!("cipher init failed: {e}")))?;
        let plain = aead
            .decrypt(Nonce::from_slice(&nonce_raw), ciphertext.as_ref())
            .map_err(|e| ManagerError::Internal(format!("decryption failed: {e}")))?;
        String::from_utf8(plain)
            .map_err(|e| ManagerError::Internal(format!("secret plaintext is not utf8: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_canonical_json_ignores_key_order() {
        let a: Value = serde_json::from_str(r#"{"b":1,"a":{"y":[1,{"d":2,"c":3}],"x":"s"}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a":{"x":"s","y":[1,{"c":3,"d":2}]},"b":1}"#).unwrap();
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(canonical_json(&a), r#"{"a":{"x":"s","y":[1,{"c":3,"d":2}]},"b":1}"#);
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Claims {
        sub: String,
        digest: String,
    }

    #[test]
    fn test_signer_roundtrip_and_tamper() {
        let signer = Signer::new(Some("test-signing-key"));
        let claims = Claims {
            sub: "plan".into(),
            digest: sha256_hex(b"plan body"),
        };
        let token = signer.sign(&claims).unwrap();
        assert_eq!(signer.verify::<Claims>(&token).unwrap(), claims);

        let other = Signer::new(Some("other-key"));
        assert!(matches!(
            other.verify::<Claims>(&token).unwrap_err(),
            ManagerError::Unauthorized(_)
        ));
        assert!(signer.verify::<Claims>("not.a.token").is_err());
    }

    #[test]
    fn test_cipher_roundtrip() {
        let key = STANDARD.encode([7u8; 32]);
        let cipher = SecretCipher::new(Some(&key)).unwrap();
        let envelope = cipher.encrypt("hunter2").unwrap();
        assert!(envelope.starts_with("enc:v1:"));
        assert!(!envelope.contains("hunter2"));
        assert_eq!(cipher.decrypt(&envelope).unwrap(), "hunter2");
    }

    #[test]
    fn test_cipher_rejects_foreign_key_and_short_key() {
        let a = SecretCipher::new(None).unwrap();
        let b = SecretCipher::new(None).unwrap();
        let envelope = a.encrypt("x").unwrap();
        assert!(b.decrypt(&envelope).is_err());
        assert!(SecretCipher::new(Some(&STANDARD.encode([1u8; 8]))).is_err());
    }
}
