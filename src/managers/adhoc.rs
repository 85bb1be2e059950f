//! Ad-hoc shell commands with a deadline, output capping and a deny list.
//!
//! The child runs as `<shell> -c <command>` with stdout and stderr merged into one
//! buffer. When the request context is cancelled or its deadline passes the child is
//! killed and the result is reported as exit code 124 with `command timed out`
//! appended to whatever output was captured.

use super::{bounded, now, require, ManagerError, ManagerResult};
use crate::dispatcher::RequestContext;
use crate::ids::new_id;
use crate::store::Collection;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub const DEFAULT_TIMEOUT_SECONDS: i64 = 30;
/// Longest deadline a caller may request (1 hour).
pub const MAX_TIMEOUT_SECONDS: i64 = 3600;
pub const MAX_OUTPUT_BYTES: usize = 4096;
pub const TRUNCATION_MARKER: &str = "\n...truncated...";
pub const TIMEOUT_EXIT_CODE: i32 = 124;
pub const TIMEOUT_MESSAGE: &str = "command timed out";

const POLL_INTERVAL: Duration = Duration::from_millis(20);

const BLOCKED_PATTERNS: &[&str] = &[
    "rm -rf /",
    "rm -rf /*",
    "mkfs",
    ":(){",
    "dd if=/dev/zero of=/dev/",
    "> /dev/sda",
    "chmod -r 777 /",
];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AdhocRequest {
    pub command: String,
    pub timeout_seconds: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdhocResult {
    pub id: String,
    pub command: String,
    pub status: String,
    pub exit_code: i32,
    pub output: String,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
}

identified!(AdhocResult);

pub struct AdhocExecutor {
    shell: String,
    history: Collection<AdhocResult>,
}

impl AdhocExecutor {
    pub fn new(shell: &str) -> Self {
        let shell = shell.trim();
        Self {
            shell: if shell.is_empty() { "/bin/sh".to_string() } else { shell.to_string() },
            history: Collection::new(),
        }
    }

    pub fn list(&self, limit: usize) -> Vec<AdhocResult> {
        self.history.list(limit)
    }

    /// Run `req.command` under `ctx`, tightened to `timeout_seconds` (≤ 0 → 30, capped at
    /// [`MAX_TIMEOUT_SECONDS`]).
    pub fn run(&self, req: &AdhocRequest, ctx: &RequestContext) -> ManagerResult<AdhocResult> {
        let command = require("command", &req.command)?;
        if let Some(pattern) = blocked_pattern(&command) {
            return Err(ManagerError::denied(
                "command blocked by policy",
                json!({ "pattern": pattern }),
            ));
        }
        let timeout = bounded(req.timeout_seconds, DEFAULT_TIMEOUT_SECONDS, MAX_TIMEOUT_SECONDS);
        let ctx = ctx.with_timeout(Duration::from_secs(timeout.unsigned_abs()));

        let started_at = now();
        let start = Instant::now();
        let mut child = Command::new(&self.shell)
            .arg("-c")
            .arg(&command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let buffer = Arc::new(Mutex::new(Vec::new()));
        let mut readers = Vec::with_capacity(2);
        if let Some(out) = child.stdout.take() {
            readers.push(spawn_reader(out, Arc::clone(&buffer))?);
        }
        if let Some(err) = child.stderr.take() {
            readers.push(spawn_reader(err, Arc::clone(&buffer))?);
        }

        let (exit_code, timed_out) = loop {
            if let Some(status) = child.try_wait()? {
                break (status.code().unwrap_or(-1), false);
            }
            if ctx.is_done() {
                if let Err(e) = child.kill() {
                    warn!(error = %e, "failed to kill ad-hoc command");
                }
                // pipes may stay open if the shell forked grandchildren; readers are not joined
                if let Err(e) = child.wait() {
                    warn!(error = %e, "failed to reap ad-hoc command");
                }
                break (TIMEOUT_EXIT_CODE, true);
            }
            pause(POLL_INTERVAL);
        };

        if !timed_out {
            for reader in readers {
                if reader.join().is_err() {
                    warn!("ad-hoc output reader panicked");
                }
            }
        }

        let captured = buffer.lock().clone();
        let mut output = cap_output(&captured);
        if timed_out {
            if !output.is_empty() && !output.ends_with('\n') {
                output.push('\n');
            }
            output.push_str(TIMEOUT_MESSAGE);
        }

        let result = AdhocResult {
            id: new_id("adhoc"),
            command,
            status: if exit_code == 0 { "succeeded" } else { "failed" }.to_string(),
            exit_code,
            output,
            duration_ms: start.elapsed().as_millis() as u64,
            started_at,
        };
        info!(id = %result.id, exit_code, timed_out, duration_ms = result.duration_ms, "ad-hoc command finished");
        Ok(self.history.insert(result))
    }
}

fn spawn_reader<R: Read + Send + 'static>(
    mut source: R,
    sink: Arc<Mutex<Vec<u8>>>,
) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("adhoc-output".to_string())
        .spawn(move || {
            let mut chunk = [0u8; 1024];
            loop {
                match source.read(&mut chunk) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => sink.lock().extend_from_slice(&chunk[..n]),
                }
            }
        })
}

fn pause(interval: Duration) {
    if may::coroutine::is_coroutine() {
        may::coroutine::sleep(interval);
    } else {
        thread::sleep(interval);
    }
}

/// First blocked pattern contained in `command`, compared case-insensitively with
/// runs of whitespace collapsed.
pub fn blocked_pattern(command: &str) -> Option<&'static str> {
    let normalized = command
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase();
    BLOCKED_PATTERNS.iter().copied().find(|p| {
        if *p == "rm -rf /" {
            // only the root itself; `rm -rf /tmp/x` is allowed
            normalized.match_indices(p).any(|(i, _)| {
                normalized[i + p.len()..]
                    .chars()
                    .next()
                    .is_none_or(|c| matches!(c, ' ' | ';' | '&' | '|'))
            })
        } else {
            normalized.contains(p)
        }
    })
}

/// Cap at [`MAX_OUTPUT_BYTES`] and append [`TRUNCATION_MARKER`] when cut.
pub fn cap_output(bytes: &[u8]) -> String {
    if bytes.len() <= MAX_OUTPUT_BYTES {
        return String::from_utf8_lossy(bytes).into_owned();
    }
    let mut out = String::from_utf8_lossy(&bytes[..MAX_OUTPUT_BYTES]).into_owned();
    out.push_str(TRUNCATION_MARKER);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(cmd: &str, timeout: i64) -> ManagerResult<AdhocResult> {
        AdhocExecutor::new("/bin/sh").run(
            &AdhocRequest {
                command: cmd.to_string(),
                timeout_seconds: timeout,
            },
            &RequestContext::new(),
        )
    }

    #[test]
    fn test_echo_succeeds() {
        let result = run("echo hello", 5).unwrap();
        assert_eq!(result.status, "succeeded");
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.output.trim(), "hello");
    }

    #[test]
    fn test_nonzero_exit_is_failed() {
        let result = run("echo oops >&2; exit 3", 5).unwrap();
        assert_eq!(result.status, "failed");
        assert_eq!(result.exit_code, 3);
        assert!(result.output.contains("oops"));
    }

    #[test]
    fn test_timeout_reports_124() {
        let result = run("sleep 60", 1).unwrap();
        assert_eq!(result.status, "failed");
        assert_eq!(result.exit_code, TIMEOUT_EXIT_CODE);
        assert!(result.output.contains(TIMEOUT_MESSAGE));
        assert!(result.duration_ms < 30_000);
    }

    #[test]
    fn test_oversized_timeout_is_capped() {
        let result = run("echo capped", i64::MAX).unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.output.trim(), "capped");
    }

    #[test]
    fn test_parent_cancel_stops_command() {
        let ctx = RequestContext::new();
        let canceller = ctx.clone();
        let trigger = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            canceller.cancel();
        });
        let started = Instant::now();
        let result = AdhocExecutor::new("/bin/sh")
            .run(
                &AdhocRequest {
                    command: "sleep 60".to_string(),
                    timeout_seconds: 0,
                },
                &ctx,
            )
            .unwrap();
        trigger.join().unwrap();
        assert_eq!(result.exit_code, TIMEOUT_EXIT_CODE);
        assert!(result.output.contains(TIMEOUT_MESSAGE));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_blocked_commands() {
        assert!(matches!(run("rm  -rf /", 5), Err(ManagerError::Denied { .. })));
        assert!(matches!(run("mkfs.ext4 /dev/sdb", 5), Err(ManagerError::Denied { .. })));
        assert!(blocked_pattern("rm -rf /tmp/build").is_none());
        assert!(matches!(run("  ", 5), Err(ManagerError::Invalid(_))));
    }

    #[test]
    fn test_output_truncation() {
        let long = vec![b'x'; MAX_OUTPUT_BYTES + 10];
        let capped = cap_output(&long);
        assert!(capped.ends_with(TRUNCATION_MARKER));
        assert_eq!(capped.len(), MAX_OUTPUT_BYTES + TRUNCATION_MARKER.len());
        assert_eq!(cap_output(b"short"), "short");
    }
}
