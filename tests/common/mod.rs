#![allow(dead_code)]

pub mod fixtures {
    /// Two-resource document with one dependency edge.
    pub const SITE_YAML: &str = "version: \"1\"\nresources:\n  - id: pkg\n    type: package\n    name: nginx\n  - id: svc\n    type: service\n    name: nginx\n    depends_on: [pkg]\n";
}

pub mod test_app {
    use masterchef::api::{self, Deps};
    use masterchef::managers::notify::Deliverer;
    use masterchef::runtime_config::ServerConfig;
    use masterchef::server::{encode, AppService, ParsedRequest};
    use parking_lot::Mutex;
    use serde_json::Value;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    use super::fixtures::SITE_YAML;

    /// Records outbound deliveries instead of sending them, after an optional delay.
    #[derive(Default)]
    pub struct RecordingDeliverer {
        pub sent: Mutex<Vec<(String, Value)>>,
        pub delay_ms: AtomicU64,
    }

    impl Deliverer for RecordingDeliverer {
        fn deliver(&self, url: &str, payload: &Value) -> Result<u16, String> {
            std::thread::sleep(Duration::from_millis(self.delay_ms.load(Ordering::SeqCst)));
            self.sent.lock().push((url.to_string(), payload.clone()));
            Ok(200)
        }
    }

    /// Decoded response: status, body (`Null` when empty) and headers.
    #[derive(Debug)]
    pub struct Reply {
        pub status: u16,
        pub body: Value,
        pub raw: Vec<u8>,
        pub headers: Vec<(String, String)>,
    }

    impl Reply {
        pub fn header(&self, name: &str) -> Option<&str> {
            self.headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str())
        }

        pub fn error(&self) -> &str {
            self.body["error"].as_str().unwrap_or_default()
        }
    }

    /// In-process control plane over a scratch base directory containing `site.yaml`.
    ///
    /// Requests go straight through [`AppService::handle`]; no socket is opened.
    pub struct TestApp {
        pub dir: TempDir,
        pub deps: Arc<Deps>,
        pub service: AppService,
        pub deliverer: Arc<RecordingDeliverer>,
    }

    impl TestApp {
        pub fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            std::fs::write(dir.path().join("site.yaml"), SITE_YAML).unwrap();
            let config = ServerConfig {
                base_dir: dir.path().to_path_buf(),
                signing_key: Some("test-signing-key".to_string()),
                ..ServerConfig::default()
            };
            let deliverer = Arc::new(RecordingDeliverer::default());
            let deps = Arc::new(
                Deps::with_deliverer(config, Arc::clone(&deliverer) as Arc<dyn Deliverer>).unwrap(),
            );
            let service = api::service(Arc::clone(&deps));
            Self {
                dir,
                deps,
                service,
                deliverer,
            }
        }

        pub fn base_dir(&self) -> &Path {
            self.dir.path()
        }

        pub fn path(&self, relative: &str) -> PathBuf {
            self.dir.path().join(relative)
        }

        pub fn send(&self, req: ParsedRequest) -> Reply {
            let encoded = encode(&self.service.handle(req));
            let body = if encoded.body.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&encoded.body).unwrap_or(Value::Null)
            };
            Reply {
                status: encoded.status,
                body,
                raw: encoded.body,
                headers: encoded.headers,
            }
        }

        pub fn get(&self, target: &str) -> Reply {
            self.send(ParsedRequest::new("GET", target))
        }

        pub fn post(&self, target: &str, body: Value) -> Reply {
            self.send(ParsedRequest::new("POST", target).with_body(body.to_string()))
        }

        pub fn post_raw(&self, target: &str, body: &str) -> Reply {
            self.send(ParsedRequest::new("POST", target).with_body(body))
        }

        pub fn post_forced(&self, target: &str, body: Value) -> Reply {
            self.send(
                ParsedRequest::new("POST", target)
                    .with_header("X-Force-Apply", "true")
                    .with_body(body.to_string()),
            )
        }

        /// Block until queued webhook and target deliveries are recorded.
        pub fn settle(&self) {
            assert!(
                self.deps.notify.wait_idle(Duration::from_secs(30)),
                "deliveries still pending"
            );
        }

        /// Total events published so far, retained or not.
        pub fn events(&self) -> u64 {
            self.deps.events.published()
        }

        pub fn count(&self, kind: &str) -> usize {
            self.deps.events.count_kind(kind)
        }
    }

    /// Concrete request path for a route pattern: `{id}` → `x`, `{kind:a|b}` → `a`.
    pub fn concrete_path(pattern: &str) -> String {
        pattern
            .split('/')
            .map(|seg| {
                if let Some(inner) = seg.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                    match inner.split_once(':') {
                        Some((_, actions)) => actions.split('|').next().unwrap_or("x").to_string(),
                        None => "x".to_string(),
                    }
                } else {
                    seg.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join("/")
    }
}

pub mod test_server {
    use std::sync::Once;

    static MAY_INIT: Once = Once::new();

    /// Configure `may` once per test binary.
    pub fn setup_may_runtime() {
        MAY_INIT.call_once(|| {
            may::config().set_stack_size(0x40000);
        });
    }
}

pub mod http {
    use std::io::{Read, Write};
    use std::net::{SocketAddr, TcpStream};
    use std::time::Duration;

    /// Raw HTTP/1.1 exchange with `Connection: close`.
    /// Returns status, lower-cased headers and body.
    pub fn send_request(
        addr: SocketAddr,
        method: &str,
        target: &str,
        headers: &[(&str, &str)],
        body: &str,
    ) -> (u16, Vec<(String, String)>, String) {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut request = format!(
            "{method} {target} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\nContent-Length: {}\r\n",
            body.len()
        );
        for (name, value) in headers {
            request.push_str(&format!("{name}: {value}\r\n"));
        }
        request.push_str("\r\n");
        request.push_str(body);
        stream.write_all(request.as_bytes()).unwrap();

        let mut raw = Vec::new();
        stream.read_to_end(&mut raw).unwrap();
        let text = String::from_utf8_lossy(&raw).into_owned();
        let (head, body) = text.split_once("\r\n\r\n").unwrap_or((text.as_str(), ""));
        let mut lines = head.lines();
        let status = lines
            .next()
            .and_then(|l| l.split_whitespace().nth(1))
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let headers = lines
            .filter_map(|l| l.split_once(':'))
            .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
            .collect();
        (status, headers, body.to_string())
    }
}
