//! Platform endpoints: metrics, the route listing, document canonicalization and the
//! cross-manager query surface.

use super::{route_table, Deps, Table};
use crate::crypto::{canonical_json, sha256_hex};
use crate::dispatcher::{HandlerRequest, HandlerResponse};
use crate::error::{ApiError, ApiResult};
use crate::managers::loose_eq;
use crate::planner::{parse_value, DocumentFormat};
use serde::Deserialize;
use serde_json::{json, Map, Value};

pub(super) fn register(t: &mut Table) {
    t.get("/v1/metrics", "metrics", metrics);
    t.get("/v1/routes", "list_routes", list_routes);
    t.post("/v1/format/canonicalize", "canonicalize", canonicalize);
    t.get("/v1/query", "query_get", query_get);
    t.post("/v1/query", "query", query);
}

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

fn metrics(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    if req.filter_lower("format").as_deref() == Some("prometheus") {
        let text = deps.metrics.render_prometheus();
        return Ok(HandlerResponse::blob(200, PROMETHEUS_CONTENT_TYPE, text.into_bytes()));
    }
    HandlerResponse::ok(&json!({
        "http": deps.metrics.snapshot(),
        "events": {
            "published": deps.events.published(),
            "dropped": deps.events.dropped(),
            "retained": deps.events.len(),
            "capacity": deps.events.capacity(),
        },
        "queue": deps.queue.snapshot(),
    }))
}

fn list_routes(_deps: &Deps, _req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let items: Vec<Value> = route_table()
        .iter()
        .map(|r| json!({ "method": r.method.as_str(), "path": r.pattern }))
        .collect();
    HandlerResponse::list(&items)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CanonicalizeInput {
    document: Option<Value>,
    content: String,
    format: String,
}

fn canonicalize(_deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: CanonicalizeInput = req.json()?;
    let (document, format) = match input.document {
        Some(doc) if !doc.is_null() => (doc, DocumentFormat::Json),
        _ => {
            if input.content.trim().is_empty() {
                return Err(ApiError::bad_request("document or content is required"));
            }
            let format = DocumentFormat::parse(&input.format)?;
            (parse_value(&input.content, format)?, format)
        }
    };
    let canonical = canonical_json(&document);
    HandlerResponse::ok(&json!({
        "canonical_sha256": sha256_hex(canonical.as_bytes()),
        "canonical": canonical,
        "format": format,
    }))
}

const QUERY_KINDS: [&str; 4] = ["jobs", "nodes", "events", "runs"];

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct QueryInput {
    kind: String,
    filter: Map<String, Value>,
    limit: i64,
}

fn query_get(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let mut filter = Map::new();
    if let Some(status) = req.filter_lower("status") {
        filter.insert("status".to_string(), Value::String(status));
    }
    let kind = req.filter_lower("kind").unwrap_or_default();
    run_query(deps, &kind, filter, req.limit())
}

fn query(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: QueryInput = req.json()?;
    let limit = crate::codec::parse_limit(Some(&input.limit.to_string()));
    run_query(deps, &input.kind.trim().to_lowercase(), input.filter, limit)
}

fn run_query(deps: &Deps, kind: &str, filter: Map<String, Value>, limit: usize) -> ApiResult<HandlerResponse> {
    let records: Vec<Value> = match kind {
        "jobs" => to_values(deps.queue.all_jobs())?,
        "runs" => to_values(deps.queue.all_runs())?,
        "nodes" => to_values(deps.inventory.all())?,
        "events" => to_values(deps.events.recent(None, usize::MAX))?,
        _ => {
            return Err(ApiError::bad_request(format!(
                "kind must be one of {}",
                QUERY_KINDS.join(", ")
            )))
        }
    };
    let matching: Vec<Value> = records
        .into_iter()
        .filter(|record| {
            filter
                .iter()
                .all(|(k, expected)| record.get(k).is_some_and(|actual| loose_eq(actual, expected)))
        })
        .collect();
    let skip = matching.len().saturating_sub(limit);
    let items: Vec<Value> = matching.into_iter().skip(skip).collect();
    HandlerResponse::ok(&json!({
        "count": items.len(),
        "items": items,
        "query": { "kind": kind, "filter": filter, "limit": limit },
    }))
}

fn to_values<T: serde::Serialize>(records: Vec<T>) -> ApiResult<Vec<Value>> {
    records
        .iter()
        .map(|r| serde_json::to_value(r).map_err(ApiError::from))
        .collect()
}
