use crate::api;
use crate::logging::{init_logging, LogConfig};
use crate::managers::commands::command_checksum;
use crate::runtime_config::ServerConfig;
use crate::server::HttpServer;
use crate::worker_pool::WorkerPoolConfig;
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

/// Command-line interface for the masterchef control plane
#[derive(Parser)]
#[command(name = "masterchef")]
#[command(about = "masterchef control-plane API", long_about = None, version)]
pub struct Cli {
    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Serve the HTTP control plane until SIGINT/SIGTERM
    Serve {
        /// Listen address (overrides config file and MASTERCHEF_ADDR)
        #[arg(short, long)]
        addr: Option<String>,

        /// Base directory for configuration documents and `.masterchef/` state
        #[arg(short, long)]
        base_dir: Option<PathBuf>,

        /// YAML or TOML configuration file
        #[arg(short, long, env = "MASTERCHEF_CONFIG")]
        config: Option<PathBuf>,
    },
    /// Print the routing table
    Routes,
    /// Print the command-ingestion checksum for a command
    Checksum {
        #[arg(long)]
        action: String,

        #[arg(long)]
        config_path: String,

        #[arg(long, default_value = "")]
        priority: String,

        #[arg(long, default_value = "")]
        idempotency_key: String,
    },
}

/// Execute a parsed command.
pub fn run_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Serve {
            addr,
            base_dir,
            config,
        } => {
            let mut config = ServerConfig::load(config.as_deref())?;
            if let Some(addr) = addr {
                config.addr = addr;
            }
            if let Some(base_dir) = base_dir {
                config.base_dir = base_dir;
            }
            serve(config)
        }
        Commands::Routes => {
            for route in api::route_table() {
                println!("{:<7} {}", route.method.as_str(), route.pattern);
            }
            Ok(())
        }
        Commands::Checksum {
            action,
            config_path,
            priority,
            idempotency_key,
        } => {
            println!(
                "{}",
                command_checksum(&action, &config_path, &priority, &idempotency_key)
            );
            Ok(())
        }
    }
}

fn serve(config: ServerConfig) -> anyhow::Result<()> {
    let _guard = init_logging(&LogConfig::from_env())?;
    may::config()
        .set_stack_size(config.stack_size)
        .set_workers(config.workers);

    let pool = WorkerPoolConfig {
        num_workers: config.workers,
        stack_size: config.stack_size,
    };
    let addr = config.addr.clone();
    let service = api::build_service(config)?;
    let handle = HttpServer(service)
        .start(addr.as_str(), pool)
        .with_context(|| format!("binding {addr}"))?;
    info!(addr = %handle.addr(), "masterchef control plane ready");

    wait_for_shutdown()?;
    info!("shutdown requested");
    handle.stop();
    Ok(())
}

#[cfg(unix)]
fn wait_for_shutdown() -> anyhow::Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM]).context("installing signal handlers")?;
    if let Some(signal) = signals.forever().next() {
        info!(signal, "signal received");
    }
    Ok(())
}

#[cfg(not(unix))]
fn wait_for_shutdown() -> anyhow::Result<()> {
    loop {
        std::thread::park();
    }
}
