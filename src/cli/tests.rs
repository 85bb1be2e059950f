//! Unit tests for CLI parsing

use crate::cli::{Cli, Commands};
use clap::Parser;

#[test]
fn test_serve_command_defaults() {
    let cli = Cli::try_parse_from(["masterchef", "serve"]).unwrap();

    match cli.command {
        Commands::Serve { addr, base_dir, .. } => {
            assert!(addr.is_none());
            assert!(base_dir.is_none());
        }
        _ => panic!("Expected Serve command"),
    }
}

#[test]
fn test_serve_command_with_flags() {
    let cli = Cli::try_parse_from([
        "masterchef",
        "serve",
        "--addr",
        "127.0.0.1:9000",
        "--base-dir",
        "/srv/configs",
        "--config",
        "masterchef.toml",
    ])
    .unwrap();

    match cli.command {
        Commands::Serve {
            addr,
            base_dir,
            config,
        } => {
            assert_eq!(addr.as_deref(), Some("127.0.0.1:9000"));
            assert_eq!(base_dir.unwrap().to_string_lossy(), "/srv/configs");
            assert_eq!(config.unwrap().to_string_lossy(), "masterchef.toml");
        }
        _ => panic!("Expected Serve command"),
    }
}

#[test]
fn test_routes_command_exists() {
    let cli = Cli::try_parse_from(["masterchef", "routes"]).unwrap();
    assert!(matches!(cli.command, Commands::Routes));
}

#[test]
fn test_checksum_command_defaults_optional_fields() {
    let cli = Cli::try_parse_from([
        "masterchef",
        "checksum",
        "--action",
        "apply",
        "--config-path",
        "site.yaml",
    ])
    .unwrap();

    match cli.command {
        Commands::Checksum {
            action,
            config_path,
            priority,
            idempotency_key,
        } => {
            assert_eq!(action, "apply");
            assert_eq!(config_path, "site.yaml");
            assert_eq!(priority, "");
            assert_eq!(idempotency_key, "");
        }
        _ => panic!("Expected Checksum command"),
    }
}

#[test]
fn test_checksum_requires_action() {
    let result = Cli::try_parse_from(["masterchef", "checksum", "--config-path", "site.yaml"]);
    assert!(result.is_err());
}

#[test]
fn test_unknown_subcommand_rejected() {
    assert!(Cli::try_parse_from(["masterchef", "generate"]).is_err());
}
