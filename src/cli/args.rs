//! Argument structures for CLI commands

use clap::Args;
use clap_complete::Shell;
use std::path::PathBuf;

use crate::keys::KeyKind;

/// Arguments for the `run` command
///
/// Every flag overrides the corresponding configuration file value.
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Address to bind [default: 0.0.0.0]
    #[arg(short, long)]
    pub address: Option<String>,

    /// Port to bind [default: 2222]
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Server host key; generated if missing
    #[arg(long, value_name = "PATH")]
    pub host_key: Option<PathBuf>,

    /// Auth policy: publickey, insecure-open or deny
    #[arg(long, value_name = "NAME")]
    pub policy: Option<String>,

    /// authorized_keys file valid for every user
    #[arg(long, value_name = "PATH")]
    pub authorized_keys: Option<PathBuf>,

    /// Maximum concurrently served connections
    #[arg(long, value_name = "N")]
    pub max_connections: Option<usize>,

    /// Path to JSONL audit log
    #[arg(long, value_name = "PATH")]
    pub log: Option<PathBuf>,
}

/// Arguments for the `keygen` command
#[derive(Args, Debug, Clone)]
pub struct KeygenArgs {
    /// Key algorithm
    #[arg(short = 't', long = "type", value_enum, default_value = "ed25519")]
    pub key_type: KeyKind,

    /// Private key output path [default: ~/.ssh/id_<type>]
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Key comment
    #[arg(short = 'C', long, default_value = "")]
    pub comment: String,

    /// Overwrite existing key files
    #[arg(short, long)]
    pub force: bool,
}

/// Arguments for the `connect` command
#[derive(Args, Debug, Clone)]
pub struct ConnectArgs {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1")]
    pub address: String,

    /// Server port
    #[arg(short, long, default_value = "2222")]
    pub port: u16,

    /// Username [default: $USER]
    #[arg(short, long, env = "USER")]
    pub user: Option<String>,

    /// Private key used to authenticate
    #[arg(short, long, value_name = "PATH")]
    pub identity: PathBuf,
}

/// Arguments for the `config` command
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Validate configuration only
    #[arg(long)]
    pub validate: bool,

    /// Show example configuration
    #[arg(long)]
    pub example: bool,

    /// Show configuration search paths
    #[arg(long)]
    pub paths: bool,

    /// Output format
    #[arg(short, long, default_value = "toml", value_parser = ["toml", "json"])]
    pub format: String,
}

/// Arguments for the `completion` command
#[derive(Args, Debug, Clone)]
pub struct CompletionArgs {
    /// Target shell
    #[arg(value_enum)]
    pub shell: Shell,
}
