//! Structured logging setup and credential masking helpers.
//!
//! Logging goes through `tracing`; [`init_logging`] installs a registry with an
//! `EnvFilter` and a JSON or pretty fmt layer writing through a non-blocking
//! appender. Keep the returned guard alive for the life of the process or buffered
//! lines are lost on exit.

use anyhow::{Context, Result};
use serde_json::Value;
use std::env;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Sentinel used by secret integrations.
pub const REDACTED_INTEGRATION: &str = "***REDACTED***";
/// Sentinel used by the secret store, runtime sessions and JIT grants.
pub const REDACTED_VALUE: &str = "<redacted>";

/// Log format: JSON for production, pretty-print for development
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            _ => LogFormat::Json,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level: trace/debug/info/warn/error
    pub log_level: String,
    /// Log format: json/pretty
    pub format: LogFormat,
    /// Extra comma-separated filter directives
    pub target_filter: Option<String>,
    /// Include file:line location
    pub include_location: bool,
}

impl LogConfig {
    /// Parse configuration from `MASTERCHEF_LOG_*` variables
    pub fn from_env() -> Self {
        Self {
            log_level: env::var("MASTERCHEF_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: LogFormat::parse(
                &env::var("MASTERCHEF_LOG_FORMAT").unwrap_or_else(|_| "json".to_string()),
            ),
            target_filter: env::var("MASTERCHEF_LOG_TARGET_FILTER").ok(),
            include_location: env::var("MASTERCHEF_LOG_INCLUDE_LOCATION")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(false),
        }
    }

    pub fn default_dev() -> Self {
        Self {
            log_level: "debug".to_string(),
            format: LogFormat::Pretty,
            target_filter: None,
            include_location: true,
        }
    }

    fn level(&self) -> Level {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }

    fn env_filter(&self) -> EnvFilter {
        let mut filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.level().as_str()));
        if let Some(target_filter) = &self.target_filter {
            for directive in target_filter.split(',').map(str::trim) {
                if directive.is_empty() {
                    continue;
                }
                match directive.parse() {
                    Ok(d) => filter = filter.add_directive(d),
                    Err(_) => eprintln!("Warning: Invalid log filter directive: {directive}"),
                }
            }
        }
        filter
    }
}

/// Install the global subscriber.
///
/// ```no_run
/// use masterchef::logging::{init_logging, LogConfig};
///
/// let _guard = init_logging(&LogConfig::from_env()).expect("logging");
/// ```
pub fn init_logging(config: &LogConfig) -> Result<WorkerGuard> {
    let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());

    let fmt_layer = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_writer(writer)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .pretty()
            .with_target(true)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_writer(writer)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(config.env_filter())
        .with(fmt_layer)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(guard)
}

/// True for field names that carry credentials.
pub fn is_sensitive_key(field_name: &str) -> bool {
    const PATTERNS: [&str; 13] = [
        "password",
        "passwd",
        "secret",
        "api_key",
        "apikey",
        "token",
        "authorization",
        "credential",
        "private_key",
        "privatekey",
        "value",
        "config",
        "ciphertext",
    ];
    let lower = field_name.to_lowercase();
    PATTERNS.iter().any(|p| lower.contains(p))
}

/// Replace the values of sensitive keys (recursively) with `sentinel`.
pub fn mask_sensitive(value: &mut Value, sentinel: &str) {
    match value {
        Value::Object(map) => {
            for (k, v) in map.iter_mut() {
                if is_sensitive_key(k) && !v.is_null() {
                    *v = Value::String(sentinel.to_string());
                } else {
                    mask_sensitive(v, sentinel);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(|v| mask_sensitive(v, sentinel)),
        _ => {}
    }
}
