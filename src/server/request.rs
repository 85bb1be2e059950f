use crate::dispatcher::{HeaderVec, RequestContext};
use crate::router::ParamVec;
use std::io::Read;
use std::sync::Arc;
use tracing::{debug, warn};

/// Request bodies larger than this are truncated and fail JSON decoding.
pub const MAX_BODY_BYTES: u64 = 8 * 1024 * 1024;

/// Transport-independent request envelope.
#[derive(Debug, Clone, Default)]
pub struct ParsedRequest {
    pub method: String,
    /// Path without the query string
    pub path: String,
    pub query_params: ParamVec,
    pub headers: HeaderVec,
    /// Raw body; decoding is deferred to the adapter
    pub body: Vec<u8>,
    pub context: RequestContext,
}

impl ParsedRequest {
    /// Build from a request target such as `/v1/jobs?limit=5`.
    pub fn new(method: &str, target: &str) -> Self {
        let (path, query) = split_target(target);
        Self {
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
            query_params: parse_query_params(query),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((Arc::from(name.to_ascii_lowercase()), value.to_string()));
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// `(path, query)`; the query is empty when absent.
pub fn split_target(target: &str) -> (&str, &str) {
    match target.split_once('?') {
        Some((path, query)) => (path, query),
        None => (target, ""),
    }
}

/// Decode `a=1&b=x%20y` into ordered pairs.
pub fn parse_query_params(query: &str) -> ParamVec {
    url::form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (Arc::from(k.as_ref()), v.into_owned()))
        .collect()
}

/// Read a tiny_http request into a [`ParsedRequest`].
pub fn parse_request(req: &mut tiny_http::Request) -> ParsedRequest {
    let mut parsed = ParsedRequest::new(req.method().as_str(), req.url());

    for header in req.headers() {
        parsed.headers.push((
            Arc::from(header.field.as_str().as_str().to_ascii_lowercase()),
            header.value.as_str().to_string(),
        ));
    }

    let mut body = Vec::new();
    if let Err(e) = Read::take(req.as_reader(), MAX_BODY_BYTES).read_to_end(&mut body) {
        warn!(error = %e, path = %parsed.path, "Failed to read request body");
        body.clear();
    }
    parsed.body = body;

    debug!(
        method = %parsed.method,
        path = %parsed.path,
        headers = parsed.headers.len(),
        body_bytes = parsed.body.len(),
        "Request parsed"
    );
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_target() {
        assert_eq!(split_target("/v1/jobs?limit=5"), ("/v1/jobs", "limit=5"));
        assert_eq!(split_target("/v1/jobs"), ("/v1/jobs", ""));
    }

    #[test]
    fn test_parse_query_params_decodes() {
        let params = parse_query_params("status=pending&name=web%2001&limit=");
        assert_eq!(params.len(), 3);
        assert_eq!(params[1].1, "web 01");
        assert_eq!(params[2].1, "");
    }

    #[test]
    fn test_new_uppercases_method() {
        let req = ParsedRequest::new("post", "/v1/jobs?x=1").with_header("X-Force-Apply", "true");
        assert_eq!(req.method, "POST");
        assert_eq!(req.path, "/v1/jobs");
        assert_eq!(req.get_header("x-force-apply"), Some("true"));
    }
}
