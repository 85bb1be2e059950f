//! Single-write response encoding.
//!
//! [`write_response`] consumes the transport request, so a second write for the
//! same request cannot be expressed.

use crate::dispatcher::{HandlerResponse, ResponseBody};
use std::io;
use tracing::{debug, warn};

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Wire form of a [`HandlerResponse`].
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl EncodedResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Encode status, headers and body. JSON bodies get `application/json`; blobs
/// carry their own content type; empty bodies carry none.
pub fn encode(response: &HandlerResponse) -> EncodedResponse {
    let mut headers: Vec<(String, String)> = Vec::with_capacity(response.headers.len() + 1);
    let body = match &response.body {
        ResponseBody::Empty => Vec::new(),
        ResponseBody::Json(value) => {
            headers.push(("Content-Type".to_string(), JSON_CONTENT_TYPE.to_string()));
            match serde_json::to_vec(value) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(error = %e, "Failed to encode response body");
                    br#"{"error":"encoding failed"}"#.to_vec()
                }
            }
        }
        ResponseBody::Blob {
            content_type,
            bytes,
        } => {
            headers.push(("Content-Type".to_string(), content_type.clone()));
            bytes.clone()
        }
    };
    for (name, value) in &response.headers {
        if name.eq_ignore_ascii_case("content-type") {
            continue;
        }
        headers.push((name.to_string(), value.clone()));
    }
    EncodedResponse {
        status: response.status,
        headers,
        body,
    }
}

/// Write the response and complete the request.
pub fn write_response(request: tiny_http::Request, response: &HandlerResponse) -> io::Result<()> {
    let encoded = encode(response);
    let mut out = tiny_http::Response::from_data(encoded.body)
        .with_status_code(tiny_http::StatusCode(encoded.status));
    for (name, value) in &encoded.headers {
        match tiny_http::Header::from_bytes(name.as_bytes(), value.as_bytes()) {
            Ok(header) => out.add_header(header),
            Err(()) => warn!(header = %name, "Dropping invalid response header"),
        }
    }
    debug!(status = encoded.status, "Response written");
    request.respond(out)
}
