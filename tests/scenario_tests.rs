//! End-to-end scenarios through the full adapter stack
//!
//! Each test drives one workflow with literal request bodies and checks the
//! status split, the response shape and the audit trail.

mod common;

use common::test_app::TestApp;
use serde_json::json;

#[test]
fn test_abac_deny_then_allow() {
    let app = TestApp::new();
    let created = app.post(
        "/v1/access/abac/policies",
        json!({
            "name": "deny-freeze",
            "effect": "deny",
            "subject": "sre:oncall",
            "resource": "run",
            "action": "apply",
            "conditions": { "freeze_active": "true" },
            "priority": 100
        }),
    );
    assert_eq!(created.status, 201);
    assert_eq!(app.count("access.abac.policy.created"), 1);

    let denied = app.post(
        "/v1/access/abac/check",
        json!({
            "subject": "sre:oncall",
            "resource": "run",
            "action": "apply",
            "context": { "freeze_active": "true" }
        }),
    );
    assert_eq!(denied.status, 403);
    assert_eq!(denied.body["allowed"], false);

    let allow = app.post(
        "/v1/access/abac/policies",
        json!({
            "name": "allow-apply",
            "effect": "allow",
            "subject": "sre:oncall",
            "resource": "run",
            "action": "apply",
            "priority": 10
        }),
    );
    assert_eq!(allow.status, 201);

    let allowed = app.post(
        "/v1/access/abac/check",
        json!({
            "subject": "sre:oncall",
            "resource": "run",
            "action": "apply",
            "context": { "freeze_active": "false" }
        }),
    );
    assert_eq!(allowed.status, 200);
    assert_eq!(allowed.body["allowed"], true);
    assert_eq!(allowed.body["policy"], "allow-apply");
    assert_eq!(app.events(), 2);
}

#[test]
fn test_canonicalize_is_key_order_independent() {
    let app = TestApp::new();
    let first = app.post(
        "/v1/format/canonicalize",
        json!({ "document": { "b": 1, "a": { "d": [1, 2], "c": "x" } } }),
    );
    let second = app.post(
        "/v1/format/canonicalize",
        json!({ "document": { "a": { "c": "x", "d": [1, 2] }, "b": 1 } }),
    );
    assert_eq!(first.status, 200);
    assert_eq!(second.status, 200);
    assert_eq!(first.body["canonical_sha256"], second.body["canonical_sha256"]);
    assert_eq!(first.body["canonical"], r#"{"a":{"c":"x","d":[1,2]},"b":1}"#);

    let yaml = app.post(
        "/v1/format/canonicalize",
        json!({ "format": "yaml", "content": "b: 1\na:\n  c: x\n  d: [1, 2]\n" }),
    );
    assert_eq!(yaml.status, 200);
    assert_eq!(yaml.body["canonical_sha256"], first.body["canonical_sha256"]);
    assert_eq!(app.events(), 0);
}

#[test]
fn test_tenant_admission_limits() {
    let app = TestApp::new();
    let policy = app.post(
        "/v1/control/tenants/policies",
        json!({
            "tenant": "Acme",
            "requests_per_minute": 120,
            "max_concurrent_runs": 10,
            "max_queue_share_percent": 40
        }),
    );
    assert_eq!(policy.status, 201);
    assert_eq!(policy.body["tenant"], "acme");

    let admitted = app.post(
        "/v1/control/tenants/admit-check",
        json!({ "tenant": "acme", "tenant_queued": 20 }),
    );
    assert_eq!(admitted.status, 200);
    assert_eq!(admitted.body["admitted"], true);

    let denied = app.post(
        "/v1/control/tenants/admit-check",
        json!({ "tenant": "acme", "tenant_queued": 70 }),
    );
    assert_eq!(denied.status, 409);
    assert_eq!(denied.body["admitted"], false);
    assert!(denied.body["violations"][0].as_str().unwrap().contains("queue share"));

    let unknown = app.post(
        "/v1/control/tenants/admit-check",
        json!({ "tenant": "globex", "tenant_queued": 1 }),
    );
    assert_eq!(unknown.status, 404);
    assert_eq!(app.events(), 1);
}

#[cfg(unix)]
#[test]
fn test_adhoc_command_timeout() {
    let app = TestApp::new();
    let reply = app.post(
        "/v1/execution/adhoc",
        json!({ "command": "sleep 60", "timeout_seconds": 1 }),
    );
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body["status"], "failed");
    assert_eq!(reply.body["exit_code"], 124);
    assert!(reply.body["output"].as_str().unwrap().contains("command timed out"));
    assert_eq!(app.count("execution.adhoc.completed"), 1);
}

#[cfg(unix)]
#[test]
fn test_adhoc_command_success_and_block() {
    let app = TestApp::new();
    let ok = app.post("/v1/execution/adhoc", json!({ "command": "echo hello" }));
    assert_eq!(ok.status, 200);
    assert_eq!(ok.body["status"], "succeeded");
    assert_eq!(ok.body["exit_code"], 0);
    assert!(ok.body["output"].as_str().unwrap().contains("hello"));

    let blocked = app.post("/v1/execution/adhoc", json!({ "command": "rm -rf /" }));
    assert_eq!(blocked.status, 409);
    assert_eq!(app.count("execution.adhoc.completed"), 1);
}

#[test]
fn test_canary_creation_and_health() {
    let app = TestApp::new();
    let created = app.post(
        "/v1/canaries",
        json!({ "name": "checkout", "target": "https://checkout.internal/healthz" }),
    );
    assert_eq!(created.status, 201);
    assert_eq!(created.body["canary"]["health"], "healthy");

    let list = app.get("/v1/canaries");
    assert_eq!(list.status, 200);
    assert!(list.body["count"].as_u64().unwrap() >= 1);

    let health = app.get("/v1/control/canary-health");
    assert_eq!(health.status, 200);
    assert!(health.body["total"].as_u64().unwrap() >= 1);
    assert_eq!(health.body["healthy"], 1);

    let missing_target = app.post("/v1/canaries", json!({ "name": "search" }));
    assert_eq!(missing_target.status, 400);
    assert_eq!(app.events(), 1);
}

#[test]
fn test_release_readiness_split() {
    let app = TestApp::new();
    let blocked = app.post(
        "/v1/release/readiness",
        json!({
            "release": "v1.4.0",
            "test_pass_rate": 0.80,
            "open_blockers": 3,
            "error_budget_remaining": 0.02,
            "canary_success_rate": 0.90
        }),
    );
    assert_eq!(blocked.status, 409);
    assert_eq!(blocked.body["ready"], false);
    assert_eq!(app.count("release.readiness.passed"), 0);

    let ready = app.post(
        "/v1/release/readiness",
        json!({
            "release": "v1.4.0",
            "test_pass_rate": 0.99,
            "open_blockers": 0,
            "error_budget_remaining": 0.5,
            "canary_success_rate": 0.999
        }),
    );
    assert_eq!(ready.status, 200);
    assert_eq!(ready.body["ready"], true);
    assert_eq!(app.count("release.readiness.passed"), 1);
}

#[test]
fn test_secret_values_never_reach_events_or_lists() {
    let app = TestApp::new();
    let stored = app.post(
        "/v1/secrets/store",
        json!({ "name": "db-password", "value": "hunter2-very-secret" }),
    );
    assert_eq!(stored.status, 201);
    assert_eq!(stored.body["value"], "<redacted>");
    assert!(stored.body.get("envelope").is_none());

    let resolved = app.post("/v1/secrets/resolve", json!({ "name": "db-password" }));
    assert_eq!(resolved.status, 200);
    assert_eq!(resolved.body["value"], "hunter2-very-secret");

    let integration = app.post(
        "/v1/secrets/integrations",
        json!({ "name": "vault", "provider": "vault", "address": "https://vault:8200", "token": "s.abcdef" }),
    );
    assert_eq!(integration.status, 201);
    assert_eq!(integration.body["token"], "***REDACTED***");

    let listed = app.get("/v1/secrets/store");
    assert!(!listed.raw.windows(7).any(|w| w == b"hunter2"));

    let events = serde_json::to_string(&app.deps.events.recent(None, 100)).unwrap();
    assert!(!events.contains("hunter2"));
    assert!(!events.contains("s.abcdef"));
    assert_eq!(app.events(), 3);
}

#[test]
fn test_gitops_materialize_writes_state_file() {
    let app = TestApp::new();
    let env = app.post(
        "/v1/gitops/environments",
        json!({ "name": "Staging", "repository": "git@example.com:ops/site.git", "config_path": "site.yaml" }),
    );
    assert_eq!(env.status, 201);

    let materialized = app.post(
        "/v1/gitops/environments/materialize",
        json!({ "environment": "staging" }),
    );
    assert_eq!(materialized.status, 201);
    assert_eq!(materialized.body["steps"], 2);

    let path = app.path(".masterchef/materialized/staging.json");
    assert_eq!(materialized.body["path"], path.display().to_string());
    let written: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(written["plan"][0]["resource_id"], "pkg");
    assert_eq!(written["plan"][1]["resource_id"], "svc");

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o644);
        let dir_mode = std::fs::metadata(path.parent().unwrap()).unwrap().permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o755);
    }
    assert_eq!(app.count("gitops.environment.materialized"), 1);
}

#[test]
fn test_node_lifecycle_actions() {
    let app = TestApp::new();
    let enrolled = app.post(
        "/v1/inventory/nodes",
        json!({ "hostname": "Web-01", "address": "10.0.0.5", "role": "web", "environment": "Prod" }),
    );
    assert_eq!(enrolled.status, 201);
    assert_eq!(enrolled.body["id"], "web-01");
    assert_eq!(enrolled.body["environment"], "prod");
    let id = enrolled.body["id"].as_str().unwrap().to_string();

    let quarantined = app.post(&format!("/v1/inventory/nodes/{id}/quarantine"), json!({}));
    assert_eq!(quarantined.status, 200);
    assert_eq!(quarantined.body["status"], "quarantined");
    assert_eq!(app.count("inventory.node.quarantine"), 1);

    let decommissioned = app.post(&format!("/v1/inventory/nodes/{id}/decommission"), json!({}));
    assert_eq!(decommissioned.status, 200);
    let denied = app.post(&format!("/v1/inventory/nodes/{id}/activate"), json!({}));
    assert_eq!(denied.status, 409);
    assert_eq!(denied.error(), "node is decommissioned");

    let missing = app.post("/v1/inventory/nodes/node-missing/activate", json!({}));
    assert_eq!(missing.status, 404);
    assert_eq!(app.events(), 3);
}

/// Seconds from now until the RFC 3339 timestamp in `value`.
fn seconds_until(value: &serde_json::Value) -> i64 {
    let at = chrono::DateTime::parse_from_rfc3339(value.as_str().unwrap()).unwrap();
    (at.with_timezone(&chrono::Utc) - chrono::Utc::now()).num_seconds()
}

#[test]
fn test_oversized_durations_are_capped() {
    let app = TestApp::new();
    let huge = i64::MAX;

    let lock = app.post(
        "/v1/execution/locks",
        json!({ "resource": "db-primary", "holder": "deployer", "ttl_seconds": huge }),
    );
    assert_eq!(lock.status, 201);
    assert!(seconds_until(&lock.body["expires_at"]) <= 24 * 3600);

    let recovered = app.post("/v1/control/recover-stuck", json!({ "max_age_seconds": huge }));
    assert_eq!(recovered.status, 200);
    assert_eq!(recovered.body["max_age_seconds"], 30 * 24 * 3600);

    let credential = app.post(
        "/v1/execution/credentials",
        json!({ "subject": "agent-1", "scopes": ["run:apply"], "ttl_seconds": huge }),
    );
    assert_eq!(credential.status, 201);
    assert!(seconds_until(&credential.body["expires_at"]) <= 7 * 24 * 3600);

    assert_eq!(
        app.post("/v1/secrets/store", json!({ "name": "db-password", "value": "pw" })).status,
        201
    );
    let session = app.post(
        "/v1/secrets/sessions",
        json!({ "subject": "agent-1", "secrets": ["db-password"], "ttl_seconds": huge }),
    );
    assert_eq!(session.status, 201);
    assert_eq!(session.body["ttl_seconds"], 24 * 3600);
    let id = session.body["id"].as_str().unwrap().to_string();
    assert_eq!(app.post(&format!("/v1/secrets/sessions/{id}/renew"), json!({})).status, 200);

    let preview = app.post("/v1/gitops/previews", json!({ "branch": "feature/x", "ttl_hours": huge }));
    assert_eq!(preview.status, 201);
    assert!(seconds_until(&preview.body["expires_at"]) <= 30 * 24 * 3600);

    let flake = app.post(
        "/v1/release/tests/flake-quarantine",
        json!({ "test_name": "checkout_e2e", "failure_rate": 0.2, "days": huge }),
    );
    assert_eq!(flake.status, 201);
    assert!(seconds_until(&flake.body["expires_at"]) <= 365 * 24 * 3600);

    let ephemeral = app.post(
        "/v1/release/tests/ephemeral-environments",
        json!({ "branch": "feature/x", "ttl_hours": huge }),
    );
    assert_eq!(ephemeral.status, 201);
    assert!(seconds_until(&ephemeral.body["expires_at"]) <= 7 * 24 * 3600);

    #[cfg(unix)]
    {
        let adhoc = app.post("/v1/execution/adhoc", json!({ "command": "echo ok", "timeout_seconds": huge }));
        assert_eq!(adhoc.status, 200);
        assert_eq!(adhoc.body["exit_code"], 0);
    }
}
