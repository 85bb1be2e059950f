//! Surface-wide properties of the routing table and adapters
//!
//! Every route is exercised generically: unsupported methods, malformed bodies,
//! read-only GETs. The gate, pagination and checksum properties use the job
//! endpoints as their subject.

mod common;

use common::test_app::{concrete_path, TestApp};
use masterchef::api::route_table;
use masterchef::managers::commands::command_checksum;
use serde_json::json;

const BODYLESS_POSTS: [&str; 1] = ["/v1/control/preflight"];

#[test]
fn test_undeclared_method_is_405_with_empty_body() {
    let app = TestApp::new();
    for route in route_table() {
        let path = concrete_path(route.pattern);
        for method in ["PUT", "PATCH"] {
            let reply = app.send(masterchef::server::ParsedRequest::new(method, &path));
            assert_eq!(reply.status, 405, "{method} {path}");
            assert!(reply.raw.is_empty(), "{method} {path} carried a body");
        }
    }
    assert_eq!(app.events(), 0);
}

#[test]
fn test_delete_on_post_only_endpoint_is_405() {
    let app = TestApp::new();
    let reply = app.send(masterchef::server::ParsedRequest::new("DELETE", "/v1/jobs"));
    assert_eq!(reply.status, 405);
    assert!(reply.raw.is_empty());
}

#[test]
fn test_malformed_body_is_400_and_emits_nothing() {
    let app = TestApp::new();
    for route in route_table().iter().filter(|r| r.method == http::Method::POST) {
        if route.pattern.contains('{') || BODYLESS_POSTS.contains(&route.pattern) {
            continue;
        }
        let reply = app.post_raw(route.pattern, "{not json");
        assert_eq!(reply.status, 400, "POST {}", route.pattern);
        assert_eq!(reply.error(), "invalid json body", "POST {}", route.pattern);
    }
    assert_eq!(app.events(), 0);
}

#[test]
fn test_parameterized_posts_with_bad_body_never_emit() {
    let app = TestApp::new();
    for route in route_table().iter().filter(|r| r.method == http::Method::POST) {
        if !route.pattern.contains('{') {
            continue;
        }
        let path = concrete_path(route.pattern);
        let reply = app.post_raw(&path, "{not json");
        assert!(
            (400..500).contains(&reply.status),
            "POST {path} answered {}",
            reply.status
        );
    }
    assert_eq!(app.events(), 0);
}

#[test]
fn test_get_routes_never_emit() {
    let app = TestApp::new();
    for route in route_table().iter().filter(|r| r.method == http::Method::GET) {
        let path = concrete_path(route.pattern);
        let reply = app.get(&path);
        assert!(reply.status < 500, "GET {path} answered {}", reply.status);
    }
    assert_eq!(app.events(), 0);
}

#[test]
fn test_every_response_carries_request_id() {
    let app = TestApp::new();
    for reply in [
        app.get("/healthz"),
        app.get("/v1/jobs"),
        app.get("/v1/nope"),
        app.post_raw("/v1/jobs", "oops"),
    ] {
        assert!(reply.header("x-request-id").is_some_and(|v| !v.is_empty()));
    }
}

#[test]
fn test_inbound_request_id_is_echoed() {
    let app = TestApp::new();
    let reply = app.send(
        masterchef::server::ParsedRequest::new("GET", "/v1/jobs")
            .with_header("X-Request-ID", "01J0000000000000000000TEST"),
    );
    assert_eq!(reply.header("x-request-id"), Some("01J0000000000000000000TEST"));
}

#[test]
fn test_healthz() {
    let app = TestApp::new();
    let reply = app.get("/healthz");
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body["status"], "ok");
    assert_eq!(app.send(masterchef::server::ParsedRequest::new("POST", "/healthz")).status, 405);
}

#[test]
fn test_limit_defaults_and_coercion() {
    let app = TestApp::new();
    for i in 0..105 {
        let reply = app.post("/v1/views", json!({ "name": format!("view-{i:03}") }));
        assert_eq!(reply.status, 201);
    }
    for target in [
        "/v1/views",
        "/v1/views?limit=0",
        "/v1/views?limit=abc",
        "/v1/views?limit=-4",
        "/v1/views?limit=",
    ] {
        let reply = app.get(target);
        assert_eq!(reply.status, 200, "{target}");
        assert_eq!(reply.body["count"], 100, "{target}");
    }
    assert_eq!(app.get("/v1/views?limit=2").body["count"], 2);
    assert_eq!(app.get("/v1/views?limit=500").body["count"], 105);
}

#[test]
fn test_mutating_success_emits_exactly_one_event() {
    let app = TestApp::new();
    let reply = app.post("/v1/jobs", json!({ "config_path": "site.yaml", "priority": "high" }));
    assert_eq!(reply.status, 202);
    assert_eq!(reply.body["priority"], "high");
    assert_eq!(app.events(), 1);
    assert_eq!(app.count("queue.job.enqueued"), 1);

    let id = reply.body["id"].as_str().unwrap().to_string();
    let cancel = app.post(&format!("/v1/jobs/{id}/cancel"), json!({}));
    assert_eq!(cancel.status, 200);
    assert_eq!(app.events(), 2);
    assert_eq!(app.count("queue.job.canceled"), 1);
}

#[test]
fn test_failed_mutation_emits_nothing() {
    let app = TestApp::new();
    let missing = app.post("/v1/jobs", json!({ "config_path": "absent.yaml" }));
    assert_eq!(missing.status, 400);
    assert!(missing.error().contains("config_path"));

    let bad_priority = app.post("/v1/jobs", json!({ "config_path": "site.yaml", "priority": "urgent" }));
    assert_eq!(bad_priority.status, 400);

    let unknown = app.post("/v1/jobs/job-missing/cancel", json!({}));
    assert_eq!(unknown.status, 404);
    assert_eq!(app.events(), 0);
}

#[test]
fn test_parameterized_route_outcomes() {
    let app = TestApp::new();
    let unknown = app.post("/v1/jobs/job-1/explode", json!({}));
    assert_eq!(unknown.status, 400);
    assert_eq!(unknown.error(), "unknown job action");

    let wrong_method = app.get("/v1/jobs/job-1/cancel");
    assert_eq!(wrong_method.status, 405);
    assert!(wrong_method.raw.is_empty());

    assert_eq!(app.post("/v1/jobz/job-1/cancel", json!({})).status, 404);
    assert_eq!(app.post("/v1/jobs/job-1/cancel/extra", json!({})).status, 404);
    assert_eq!(app.get("/v2/jobs").status, 404);

    let node = app.post("/v1/inventory/nodes/web-01/reboot", json!({}));
    assert_eq!(node.status, 400);
    assert_eq!(node.error(), "unknown node action");
    assert_eq!(app.events(), 0);
}

#[test]
fn test_checksum_is_pure() {
    let a = command_checksum("apply", "site.yaml", "high", "evt-1");
    let b = command_checksum(" apply ", "site.yaml ", "high", " evt-1");
    assert_eq!(a, b);
    assert_eq!(a.len(), 64);
    assert_ne!(a, command_checksum("apply", "site.yaml", "high", "evt-2"));
}

#[test]
fn test_command_ingest_checksum_match_and_mismatch() {
    let app = TestApp::new();
    let good = json!({
        "action": "apply",
        "config_path": "site.yaml",
        "priority": "high",
        "idempotency_key": "evt-1",
        "checksum": command_checksum("apply", "site.yaml", "high", "evt-1"),
    });
    let accepted = app.post("/v1/commands/ingest", good.clone());
    assert_eq!(accepted.status, 202);
    assert_eq!(accepted.body["source"], "command:apply");
    assert_eq!(app.count("commands.ingested"), 1);

    let replay = app.post("/v1/commands/ingest", good);
    assert_eq!(replay.status, 202);
    assert_eq!(replay.body["id"], accepted.body["id"]);
    assert_eq!(app.count("commands.ingested"), 1);

    let rejected = app.post(
        "/v1/commands/ingest",
        json!({
            "action": "apply",
            "config_path": "site.yaml",
            "priority": "high",
            "idempotency_key": "evt-2",
            "checksum": "deadbeef",
        }),
    );
    assert_eq!(rejected.status, 422);
    assert_eq!(rejected.error(), "checksum mismatch");

    let letters = app.get("/v1/commands/dead-letters");
    assert_eq!(letters.status, 200);
    assert_eq!(letters.body["count"], 1);
    assert_eq!(letters.body["items"][0]["idempotency_key"], "evt-2");
    assert_eq!(app.events(), 1);
}

#[test]
fn test_freeze_gate_yields_to_force_header() {
    let app = TestApp::new();
    let freeze = app.post("/v1/control/freeze", json!({ "enabled": true, "reason": "release week" }));
    assert_eq!(freeze.status, 200);

    let blocked = app.post("/v1/jobs", json!({ "config_path": "site.yaml" }));
    assert_eq!(blocked.status, 409);
    assert_eq!(blocked.error(), "change freeze active");

    let forced = app.post_forced("/v1/jobs", json!({ "config_path": "site.yaml" }));
    assert_eq!(forced.status, 202);
    assert_eq!(forced.body["force"], true);
    assert_eq!(app.count("queue.job.enqueued"), 1);
}

#[test]
fn test_emergency_stop_ignores_force_header() {
    let app = TestApp::new();
    let stop = app.post("/v1/control/emergency-stop", json!({ "enabled": true, "reason": "incident" }));
    assert_eq!(stop.status, 200);

    assert_eq!(app.post("/v1/jobs", json!({ "config_path": "site.yaml" })).status, 409);
    assert_eq!(app.post_forced("/v1/jobs", json!({ "config_path": "site.yaml" })).status, 409);

    app.post("/v1/control/emergency-stop", json!({ "enabled": false }));
    assert_eq!(app.post("/v1/jobs", json!({ "config_path": "site.yaml" })).status, 202);
}
