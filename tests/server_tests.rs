//! Socket-level tests for `HttpServer`
//!
//! Starts the full service on an ephemeral port and talks raw HTTP/1.1 to it.

mod common;

use common::http::send_request;
use common::test_app::TestApp;
use common::test_server::setup_may_runtime;
use masterchef::server::{HttpServer, ServerHandle};
use masterchef::worker_pool::WorkerPoolConfig;
use serde_json::Value;

/// Running server plus the app state behind it; stops on drop.
struct ServerFixture {
    app: TestApp,
    handle: Option<ServerHandle>,
}

impl ServerFixture {
    fn start() -> Self {
        setup_may_runtime();
        let app = TestApp::new();
        let handle = HttpServer(app.service.clone())
            .start(
                "127.0.0.1:0",
                WorkerPoolConfig {
                    num_workers: 4,
                    stack_size: 0x40000,
                },
            )
            .unwrap();
        handle.wait_ready().unwrap();
        Self {
            app,
            handle: Some(handle),
        }
    }

    fn addr(&self) -> std::net::SocketAddr {
        self.handle.as_ref().unwrap().addr()
    }
}

impl Drop for ServerFixture {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.stop();
        }
    }
}

fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
}

#[test]
fn test_healthz_over_socket() {
    let server = ServerFixture::start();
    let (status, headers, body) = send_request(server.addr(), "GET", "/healthz", &[], "");
    assert_eq!(status, 200);
    assert!(header(&headers, "x-request-id").is_some());
    assert_eq!(header(&headers, "content-type"), Some("application/json"));
    let v: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(v["status"], "ok");
}

#[test]
fn test_job_enqueue_over_socket() {
    let server = ServerFixture::start();
    let (status, headers, body) = send_request(
        server.addr(),
        "POST",
        "/v1/jobs",
        &[("Content-Type", "application/json")],
        r#"{"config_path":"site.yaml","priority":"low"}"#,
    );
    assert_eq!(status, 202);
    assert!(header(&headers, "x-request-id").is_some());
    let job: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(job["priority"], "low");
    assert_eq!(server.app.count("queue.job.enqueued"), 1);

    let (status, _, body) = send_request(server.addr(), "GET", "/v1/jobs?limit=0", &[], "");
    assert_eq!(status, 200);
    let list: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(list["count"], 1);
}

#[test]
fn test_method_not_allowed_over_socket() {
    let server = ServerFixture::start();
    let (status, headers, body) = send_request(server.addr(), "PUT", "/v1/jobs", &[], "");
    assert_eq!(status, 405);
    assert!(body.is_empty());
    assert!(header(&headers, "x-request-id").is_some());
}

#[test]
fn test_unknown_evidence_is_json_404() {
    let server = ServerFixture::start();
    let (status, _, body) = send_request(
        server.addr(),
        "GET",
        "/v1/compliance/evidence/missing/export",
        &[],
        "",
    );
    assert_eq!(status, 404);
    let v: Value = serde_json::from_str(&body).unwrap();
    assert!(v["error"].is_string());
}

#[test]
fn test_concurrent_requests_are_served() {
    let server = ServerFixture::start();
    let addr = server.addr();
    let threads: Vec<_> = (0..8)
        .map(|i| {
            std::thread::spawn(move || {
                let body = format!(r#"{{"config_path":"site.yaml","idempotency_key":"c-{i}"}}"#);
                send_request(addr, "POST", "/v1/jobs", &[], &body).0
            })
        })
        .collect();
    for t in threads {
        assert_eq!(t.join().unwrap(), 202);
    }
    assert_eq!(server.app.count("queue.job.enqueued"), 8);
}

#[cfg(unix)]
#[test]
fn test_stop_cancels_running_adhoc_command() {
    let mut server = ServerFixture::start();
    let addr = server.addr();
    let client = std::thread::spawn(move || {
        send_request(
            addr,
            "POST",
            "/v1/execution/adhoc",
            &[("Content-Type", "application/json")],
            r#"{"command":"sleep 60","timeout_seconds":120}"#,
        )
    });

    let handle = server.handle.take().unwrap();
    let waiting = std::time::Instant::now();
    while handle.in_flight() == 0 {
        assert!(waiting.elapsed() < std::time::Duration::from_secs(10), "request never started");
        std::thread::sleep(std::time::Duration::from_millis(10));
    }
    // let the child spawn before cancelling
    std::thread::sleep(std::time::Duration::from_millis(200));

    let stopping = std::time::Instant::now();
    handle.stop();
    assert!(stopping.elapsed() < std::time::Duration::from_secs(10));

    let (status, _, body) = client.join().unwrap();
    assert_eq!(status, 200);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["exit_code"], 124);
    assert!(body["output"].as_str().unwrap().contains("command timed out"));
    assert_eq!(server.app.count("execution.adhoc.completed"), 1);
}
