//! Identifiers: ULID-backed request ids and prefixed entity ids.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Strongly typed request identifier backed by ULID.
///
/// Echoed back on every response as `X-Request-ID`.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub struct RequestId(pub ulid::Ulid);

impl RequestId {
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }

    /// Reuse a caller-supplied id when it parses as a ULID, otherwise mint one.
    pub fn from_header_or_new(header_value: Option<&str>) -> Self {
        header_value
            .and_then(|s| s.trim().parse::<RequestId>().ok())
            .unwrap_or_default()
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RequestId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = ulid::Ulid::from_string(s)?;
        Ok(RequestId(id))
    }
}

impl Serialize for RequestId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for RequestId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse::<RequestId>()
            .map_err(|_| serde::de::Error::custom("invalid request id"))
    }
}

/// New entity id of the form `<prefix>-<ulid>` (lowercase).
///
/// ULIDs sort by creation time, so ids minted by one manager list in insertion order.
pub fn new_id(prefix: &str) -> String {
    format!("{}-{}", prefix, ulid::Ulid::new().to_string().to_lowercase())
}

/// Opaque random token (hex, 32 chars) for one-time grants and session leases.
pub fn new_token() -> String {
    let a = ulid::Ulid::new().0;
    let b = ulid::Ulid::new().0;
    format!("{:016x}{:016x}", (a as u64) ^ ((b >> 64) as u64), (b as u64) ^ ((a >> 64) as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_roundtrip_through_header() {
        let id = RequestId::new();
        let parsed = RequestId::from_header_or_new(Some(&id.to_string()));
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_request_id_invalid_header_mints_new() {
        let a = RequestId::from_header_or_new(Some("not-a-ulid"));
        let b = RequestId::from_header_or_new(None);
        assert_ne!(a, b);
    }

    #[test]
    fn test_new_id_prefix_and_uniqueness() {
        let a = new_id("job");
        let b = new_id("job");
        assert!(a.starts_with("job-"));
        assert_eq!(a.len(), 4 + 26);
        assert_ne!(a, b);
        assert_eq!(a, a.to_lowercase());
    }

    #[test]
    fn test_new_token_shape() {
        let t = new_token();
        assert_eq!(t.len(), 32);
        assert!(t.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
