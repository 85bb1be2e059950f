//! # CLI Module
//!
//! Command-line entry points for the `masterchef` binary.
//!
//! ## Commands
//!
//! ### `serve`
//!
//! Load configuration (defaults, optional `--config` file, `MASTERCHEF_*` variables,
//! then flags), initialise logging, size the `may` runtime and serve the control plane
//! until SIGINT or SIGTERM:
//!
//! ```bash
//! masterchef serve --addr 127.0.0.1:8080 --base-dir /srv/configs
//! ```
//!
//! ### `routes`
//!
//! Print every registered `(method, pattern)` pair.
//!
//! ### `checksum`
//!
//! Print the checksum `POST /v1/commands/ingest` expects for a command, so external
//! replayers can sign what they send:
//!
//! ```bash
//! masterchef checksum --action apply --config-path site.yaml --priority high
//! ```

mod commands;

#[cfg(test)]
mod tests;

pub use commands::{run_cli, Cli, Commands};
