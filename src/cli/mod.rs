//! CLI module for echo-sshd
//!
//! This module provides the command-line interface using clap derive macros.

pub mod args;
pub mod commands;
pub mod exit_code;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use args::{CompletionArgs, ConfigArgs, ConnectArgs, KeygenArgs, RunArgs};

/// Authenticated SSH echo server
#[derive(Parser, Debug)]
#[command(name = "echo-sshd")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path
    #[arg(long, global = true, env = "ECHO_SSHD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the server in the foreground
    Run(RunArgs),

    /// Generate a client key pair
    Keygen(KeygenArgs),

    /// Connect to a server and echo stdin lines
    Connect(ConnectArgs),

    /// Show or validate configuration
    Config(ConfigArgs),

    /// Show version information (build details with --verbose)
    Version,

    /// Generate shell completions
    Completion(CompletionArgs),
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_overrides() {
        let cli = Cli::try_parse_from([
            "echo-sshd",
            "run",
            "--port",
            "2200",
            "--policy",
            "deny",
            "--max-connections",
            "2",
        ])
        .unwrap();
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.port, Some(2200));
                assert_eq!(args.policy.as_deref(), Some("deny"));
                assert_eq!(args.max_connections, Some(2));
                assert!(args.address.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_keygen_type() {
        let cli = Cli::try_parse_from(["echo-sshd", "keygen", "--type", "ecdsa-p384"]).unwrap();
        match cli.command {
            Commands::Keygen(args) => {
                assert_eq!(args.key_type, crate::keys::KeyKind::EcdsaP384);
                assert!(!args.force);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        assert!(Cli::try_parse_from(["echo-sshd", "--verbose", "--quiet", "version"]).is_err());
    }

    #[test]
    fn test_connect_requires_identity() {
        assert!(Cli::try_parse_from(["echo-sshd", "connect"]).is_err());
        assert!(Cli::try_parse_from(["echo-sshd", "connect", "-i", "/tmp/id"]).is_ok());
    }
}
