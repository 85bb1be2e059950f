//! # Runtime Configuration Module
//!
//! Server configuration assembled from, in increasing precedence:
//!
//! 1. built-in defaults
//! 2. an optional YAML (`.yaml`/`.yml`) or TOML (`.toml`) file
//! 3. `MASTERCHEF_*` environment variables
//! 4. command-line flags (applied by the CLI after loading)
//!
//! ## Environment Variables
//!
//! | Variable | Field | Default |
//! |---|---|---|
//! | `MASTERCHEF_ADDR` | `addr` | `0.0.0.0:8080` |
//! | `MASTERCHEF_BASE_DIR` | `base_dir` | current directory |
//! | `MASTERCHEF_WORKERS` | `workers` | `8` |
//! | `MASTERCHEF_STACK_SIZE` | `stack_size` | `0x40000` |
//! | `MASTERCHEF_EVENT_BUS_CAPACITY` | `event_bus_capacity` | `4096` |
//! | `MASTERCHEF_SIGNING_KEY` | `signing_key` | per-process random |
//! | `MASTERCHEF_SECRET_STORE_KEY` | `secret_store_key` | per-process random |
//! | `MASTERCHEF_ADHOC_SHELL` | `adhoc_shell` | `/bin/sh` |
//! | `MASTERCHEF_WEBHOOK_TIMEOUT_MS` | `webhook_timeout_ms` | `2000` |
//!
//! `MASTERCHEF_STACK_SIZE` accepts decimal (`65536`) or hexadecimal (`0x10000`).
//!
//! ```rust
//! use masterchef::runtime_config::ServerConfig;
//!
//! let config = ServerConfig::default();
//! assert_eq!(config.workers, 8);
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

/// Process-wide server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub addr: String,
    /// Root against which relative config paths are resolved
    pub base_dir: PathBuf,
    /// Number of worker coroutines servicing connections
    pub workers: usize,
    /// Coroutine stack size in bytes
    pub stack_size: usize,
    /// Retained audit events before the oldest is evicted
    pub event_bus_capacity: usize,
    /// HS256 secret for plan artifacts, bundles and execution credentials
    pub signing_key: Option<String>,
    /// Base64 32-byte key for the encrypted secret store
    pub secret_store_key: Option<String>,
    /// Shell used by the ad-hoc executor (`<shell> -c <command>`)
    pub adhoc_shell: String,
    /// Outbound webhook timeout
    pub webhook_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8080".to_string(),
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            workers: 8,
            stack_size: 0x40000,
            event_bus_capacity: 4096,
            signing_key: None,
            secret_store_key: None,
            adhoc_shell: "/bin/sh".to_string(),
            webhook_timeout_ms: 2000,
        }
    }
}

impl ServerConfig {
    /// Defaults, then the optional file, then the environment.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut config = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Parse a YAML or TOML config file; the extension selects the format.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let config = match ext.as_str() {
            "yaml" | "yml" => serde_yaml::from_str(&raw)
                .with_context(|| format!("parsing YAML config {}", path.display()))?,
            "toml" => toml::from_str(&raw)
                .with_context(|| format!("parsing TOML config {}", path.display()))?,
            other => bail!("unsupported config format: {other:?}"),
        };
        Ok(config)
    }

    /// Overlay `MASTERCHEF_*` environment variables.
    pub fn apply_env(&mut self) {
        if let Ok(v) = env::var("MASTERCHEF_ADDR") {
            self.addr = v;
        }
        if let Ok(v) = env::var("MASTERCHEF_BASE_DIR") {
            self.base_dir = PathBuf::from(v);
        }
        if let Some(v) = env::var("MASTERCHEF_WORKERS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            self.workers = v;
        }
        if let Some(v) = env::var("MASTERCHEF_STACK_SIZE")
            .ok()
            .and_then(|s| parse_size(&s))
        {
            self.stack_size = v;
        }
        if let Some(v) = env::var("MASTERCHEF_EVENT_BUS_CAPACITY")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            self.event_bus_capacity = v;
        }
        if let Ok(v) = env::var("MASTERCHEF_SIGNING_KEY") {
            self.signing_key = Some(v);
        }
        if let Ok(v) = env::var("MASTERCHEF_SECRET_STORE_KEY") {
            self.secret_store_key = Some(v);
        }
        if let Ok(v) = env::var("MASTERCHEF_ADHOC_SHELL") {
            self.adhoc_shell = v;
        }
        if let Some(v) = env::var("MASTERCHEF_WEBHOOK_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            self.webhook_timeout_ms = v;
        }
    }
}

/// Decimal or `0x`-prefixed hexadecimal byte count.
pub fn parse_size(raw: &str) -> Option<usize> {
    let raw = raw.trim();
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16).ok(),
        None => raw.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("0x10000"), Some(0x10000));
        assert_eq!(parse_size("65536"), Some(65536));
        assert_eq!(parse_size(" 0X8000 "), Some(0x8000));
        assert_eq!(parse_size("big"), None);
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.addr, "0.0.0.0:8080");
        assert_eq!(config.stack_size, 0x40000);
        assert_eq!(config.event_bus_capacity, 4096);
        assert_eq!(config.adhoc_shell, "/bin/sh");
        assert_eq!(config.webhook_timeout_ms, 2000);
    }

    #[test]
    fn test_yaml_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "addr: 127.0.0.1:9000\nworkers: 2").unwrap();
        let config = ServerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.addr, "127.0.0.1:9000");
        assert_eq!(config.workers, 2);
        assert_eq!(config.event_bus_capacity, 4096);
    }

    #[test]
    fn test_toml_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "event_bus_capacity = 16\nadhoc_shell = \"/bin/bash\"").unwrap();
        let config = ServerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.event_bus_capacity, 16);
        assert_eq!(config.adhoc_shell, "/bin/bash");
    }

    #[test]
    fn test_unknown_extension_is_rejected() {
        let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        assert!(ServerConfig::from_file(file.path()).is_err());
    }
}
