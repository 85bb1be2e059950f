//! HTTP-facing error type and the canonical status mapping.
//!
//! | Outcome | Status |
//! |---|---|
//! | Bad JSON / invalid field | 400 |
//! | Token invalid or expired | 401 |
//! | Not authorized by policy | 403 |
//! | Entity or route not found | 404 |
//! | Method not allowed | 405 (empty body) |
//! | Domain denial | 409 (denial object) |
//! | Checksum mismatch | 422 |
//! | Dependency unavailable | 503 |
//! | Internal fault | 500 |

use crate::dispatcher::HandlerResponse;
use crate::managers::ManagerError;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    /// Body is the enriched authorization decision
    #[error("forbidden")]
    Forbidden(Value),
    #[error("{0}")]
    NotFound(String),
    #[error("method not allowed")]
    MethodNotAllowed,
    /// Domain denial; body is the denial object
    #[error("denied")]
    Denied(Value),
    /// Checksum mismatch on replayed commands
    #[error("unprocessable")]
    Unprocessable(Value),
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// 409 carrying `detail` with an `error` key set to `reason` unless present.
    pub fn denied(reason: &str, detail: Value) -> Self {
        Self::Denied(with_error(reason, detail))
    }

    /// 403 carrying `detail` with an `error` key.
    pub fn forbidden(reason: &str, detail: Value) -> Self {
        Self::Forbidden(with_error(reason, detail))
    }

    pub fn status(&self) -> u16 {
        match self {
            ApiError::BadRequest(_) => 400,
            ApiError::Unauthorized(_) => 401,
            ApiError::Forbidden(_) => 403,
            ApiError::NotFound(_) => 404,
            ApiError::MethodNotAllowed => 405,
            ApiError::Denied(_) => 409,
            ApiError::Unprocessable(_) => 422,
            ApiError::Unavailable(_) => 503,
            ApiError::Internal(_) => 500,
        }
    }

    pub fn into_response(self) -> HandlerResponse {
        let status = self.status();
        match self {
            ApiError::MethodNotAllowed => HandlerResponse::empty(status),
            ApiError::Forbidden(body) | ApiError::Denied(body) | ApiError::Unprocessable(body) => {
                HandlerResponse::json(status, body)
            }
            ApiError::Internal(msg) => {
                error!(error = %msg, "internal error");
                HandlerResponse::error(status, &msg)
            }
            ApiError::BadRequest(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::NotFound(msg)
            | ApiError::Unavailable(msg) => HandlerResponse::error(status, &msg),
        }
    }
}

fn with_error(reason: &str, detail: Value) -> Value {
    match detail {
        Value::Object(mut map) => {
            map.entry("error")
                .or_insert_with(|| Value::String(reason.to_string()));
            Value::Object(map)
        }
        Value::Null => json!({ "error": reason }),
        other => json!({ "error": reason, "detail": other }),
    }
}

impl From<ManagerError> for ApiError {
    fn from(err: ManagerError) -> Self {
        match err {
            ManagerError::Invalid(msg) => ApiError::BadRequest(msg),
            ManagerError::NotFound(msg) => ApiError::NotFound(msg),
            ManagerError::Denied { reason, detail } => ApiError::denied(&reason, detail),
            ManagerError::Conflict(msg) => ApiError::denied(&msg, Value::Null),
            ManagerError::Unauthorized(msg) => ApiError::Unauthorized(msg),
            ManagerError::Forbidden(msg) => ApiError::forbidden(&msg, Value::Null),
            ManagerError::Io(e) => ApiError::Internal(e.to_string()),
            ManagerError::Internal(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Internal(format!("encoding failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::ResponseBody;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::bad_request("x").status(), 400);
        assert_eq!(ApiError::Unauthorized("x".into()).status(), 401);
        assert_eq!(ApiError::forbidden("x", Value::Null).status(), 403);
        assert_eq!(ApiError::not_found("x").status(), 404);
        assert_eq!(ApiError::MethodNotAllowed.status(), 405);
        assert_eq!(ApiError::denied("x", Value::Null).status(), 409);
        assert_eq!(ApiError::Unprocessable(Value::Null).status(), 422);
        assert_eq!(ApiError::Unavailable("x".into()).status(), 503);
        assert_eq!(ApiError::Internal("x".into()).status(), 500);
    }

    #[test]
    fn test_denial_keeps_object_and_adds_error() {
        let resp = ApiError::denied("change freeze active", json!({"freeze": {"enabled": true}}))
            .into_response();
        assert_eq!(resp.status, 409);
        let body = resp.body_json().unwrap();
        assert_eq!(body["error"], "change freeze active");
        assert_eq!(body["freeze"]["enabled"], true);
    }

    #[test]
    fn test_denial_does_not_override_existing_error() {
        let err = ApiError::denied("fallback", json!({"error": "specific"}));
        assert_eq!(err.into_response().body_json().unwrap()["error"], "specific");
    }

    #[test]
    fn test_method_not_allowed_has_empty_body() {
        let resp = ApiError::MethodNotAllowed.into_response();
        assert_eq!(resp.status, 405);
        assert!(matches!(resp.body, ResponseBody::Empty));
    }

    #[test]
    fn test_manager_error_mapping() {
        let cases = [
            (ManagerError::Invalid("bad".into()), 400),
            (ManagerError::NotFound("gone".into()), 404),
            (ManagerError::Conflict("dup".into()), 409),
            (ManagerError::Unauthorized("expired".into()), 401),
            (ManagerError::Forbidden("scope".into()), 403),
            (
                ManagerError::Io(std::io::Error::other("disk")),
                500,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }
}
