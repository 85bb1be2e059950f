//! Request body decoding and query-string conventions.
//!
//! Two decode policies exist:
//!
//! - [`decode_json`] (strict): empty body, EOF or malformed JSON → 400 `invalid json body`.
//! - [`decode_json_or_default`]: empty (or whitespace-only) body decodes to the zero
//!   record; malformed JSON is still 400.
//!
//! Unknown fields are ignored by every input record.

use crate::error::{ApiError, ApiResult};
use serde::de::DeserializeOwned;

pub const INVALID_JSON_BODY: &str = "invalid json body";

/// Default and fallback for the `limit` query parameter.
pub const DEFAULT_LIMIT: usize = 100;

pub fn decode_json<T: DeserializeOwned>(body: &[u8]) -> ApiResult<T> {
    if is_blank(body) {
        return Err(ApiError::bad_request(INVALID_JSON_BODY));
    }
    serde_json::from_slice(body).map_err(|_| ApiError::bad_request(INVALID_JSON_BODY))
}

pub fn decode_json_or_default<T: DeserializeOwned + Default>(body: &[u8]) -> ApiResult<T> {
    if is_blank(body) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|_| ApiError::bad_request(INVALID_JSON_BODY))
}

fn is_blank(body: &[u8]) -> bool {
    body.iter().all(u8::is_ascii_whitespace)
}

/// `limit` absent, non-numeric or ≤ 0 → [`DEFAULT_LIMIT`].
pub fn parse_limit(raw: Option<&str>) -> usize {
    raw.and_then(|s| s.trim().parse::<i64>().ok())
        .filter(|n| *n > 0)
        .map(|n| usize::try_from(n).unwrap_or(usize::MAX))
        .unwrap_or(DEFAULT_LIMIT)
}

/// Trimmed value, or `<field> is required` when empty.
pub fn required(field: &str, value: &str) -> ApiResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ApiError::bad_request(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}

/// Trimmed and lowercased, or `<field> is required` when empty.
pub fn required_lower(field: &str, value: &str) -> ApiResult<String> {
    required(field, value).map(|s| s.to_lowercase())
}

/// Trimmed copy.
pub fn trim(value: &str) -> String {
    value.trim().to_string()
}

/// Trimmed filter; empty means "no filter".
pub fn filter(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

/// Lowercased filter; empty means "no filter".
pub fn filter_lower(value: Option<&str>) -> Option<String> {
    filter(value).map(|s| s.to_lowercase())
}

/// Parse an optional boolean query value (`true`/`false`/`1`/`0`).
pub fn parse_bool(value: Option<&str>) -> Option<bool> {
    match value.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        Some("true") | Some("1") | Some("yes") => Some(true),
        Some("false") | Some("0") | Some("no") => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    #[serde(default)]
    struct Input {
        name: String,
        priority: i64,
    }

    #[test]
    fn test_strict_rejects_empty_and_garbage() {
        for body in [&b""[..], b"   \n", b"not json", b"{\"name\":"] {
            let err = decode_json::<Input>(body).unwrap_err();
            assert_eq!(err.status(), 400);
            assert_eq!(err.to_string(), INVALID_JSON_BODY);
        }
    }

    #[test]
    fn test_strict_accepts_trailing_whitespace_and_unknown_fields() {
        let input: Input = decode_json(b"{\"name\":\"a\",\"extra\":1}\n\n").unwrap();
        assert_eq!(input.name, "a");
    }

    #[test]
    fn test_strict_rejects_wrong_types() {
        assert!(decode_json::<Input>(b"{\"priority\":\"high\"}").is_err());
    }

    #[test]
    fn test_empty_allowed_policy() {
        let input: Input = decode_json_or_default(b"").unwrap();
        assert_eq!(input, Input::default());
        assert!(decode_json_or_default::<Input>(b"{oops").is_err());
    }

    #[test]
    fn test_parse_limit() {
        assert_eq!(parse_limit(None), 100);
        assert_eq!(parse_limit(Some("0")), 100);
        assert_eq!(parse_limit(Some("-5")), 100);
        assert_eq!(parse_limit(Some("abc")), 100);
        assert_eq!(parse_limit(Some("25")), 25);
        assert_eq!(parse_limit(Some(" 7 ")), 7);
    }

    #[test]
    fn test_required_trims() {
        assert_eq!(required("name", "  web  ").unwrap(), "web");
        assert_eq!(
            required("name", "   ").unwrap_err().to_string(),
            "name is required"
        );
        assert_eq!(required_lower("environment", " Prod ").unwrap(), "prod");
    }

    #[test]
    fn test_filters() {
        assert_eq!(filter(Some("  ")), None);
        assert_eq!(filter(Some(" x ")), Some("x".to_string()));
        assert_eq!(filter_lower(Some("PENDING")), Some("pending".to_string()));
        assert_eq!(parse_bool(Some("TRUE")), Some(true));
        assert_eq!(parse_bool(Some("maybe")), None);
    }
}
