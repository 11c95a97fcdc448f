//! Config command - show or validate configuration

use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::cli::args::ConfigArgs;
use crate::config::{config_search_paths, find_config_file, load_config};
use crate::keys::load_authorized_keys;

/// Example configuration content
fn example_config() -> &'static str {
    r#"# echo-sshd configuration file

# Listen address and port
address = "0.0.0.0"
port = 2222

# Server host key (OpenSSH or PKCS#8 PEM). An Ed25519 key is generated here if missing.
# Supports ~ and $VAR expansion
host_key = "keys/server/id_ed25519"

# Listen backlog for connections the server has not accepted yet
max_connections = 5

# Time allowed for the SSH handshake, for authentication and for opening the session channel
handshake_timeout = "20s"
auth_timeout = "20s"
channel_timeout = "20s"

# Authentication attempts before the connection is closed
max_auth_attempts = 6

# Maximum bytes read per echo iteration
buffer_size = 1024

# JSONL audit log
# log_path = "~/.local/state/echo-sshd/audit.jsonl"

[auth]
# publickey      Accept keys listed below for the user
# insecure-open  Accept any credential (testing only)
# deny           Reject everything
policy = "publickey"

# Keys valid for every user
# authorized_keys = "~/.ssh/authorized_keys"

# Keys valid for one user
# [auth.users.alice]
# keys = ["ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAA... alice@example.com"]
# key_files = ["/home/alice/.ssh/id_ed25519.pub"]
"#
}

/// Execute the config command
pub async fn execute(args: ConfigArgs, config_path: Option<PathBuf>) -> Result<()> {
    // Show search paths
    if args.paths {
        println!("Config search paths (in priority order, after --config / ECHO_SSHD_CONFIG):");
        for (i, cp) in config_search_paths().iter().enumerate() {
            let exists = if cp.path.exists() {
                "\x1b[32m[exists]\x1b[0m"
            } else {
                ""
            };
            println!("  {}. {} {}", i + 1, cp.description, exists);
            println!("     {}", cp.path.display());
        }
        return Ok(());
    }

    if args.example {
        match args.format.as_str() {
            "json" => {
                let config: toml::Value =
                    toml::from_str(example_config()).context("Failed to parse example config")?;
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
            _ => print!("{}", example_config()),
        }
        return Ok(());
    }

    let path = config_path.or_else(find_config_file);

    let Some(path) = path else {
        if args.validate {
            eprintln!("No configuration file found.");
            eprintln!("Searched locations (use --paths for details):");
            for cp in config_search_paths() {
                eprintln!("  - {}", cp.path.display());
            }
            return Err(crate::Error::Config("no configuration file found".to_string()).into());
        }
        println!("# No configuration file found");
        println!("# Use 'config --paths' to see search locations");
        println!();
        println!("# Example configuration (use --example for clean output):");
        println!();
        print!("{}", example_config());
        return Ok(());
    };

    let config_file = load_config(&path)?;

    if args.validate {
        let settings = config_file.config.resolve()?;
        let keys = load_authorized_keys(&settings.auth)?;
        println!("Configuration file is valid: {}", path.display());
        println!("  listen:          {}", settings.listen);
        println!("  policy:          {}", settings.auth.policy);
        println!("  authorized keys: {}", keys.len());
        println!("  listen backlog:  {}", settings.max_connections);
        return Ok(());
    }

    match args.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&config_file.config)?),
        _ => {
            println!("# Configuration from: {}", path.display());
            println!();
            print!("{}", toml::to_string_pretty(&config_file.config)?);
        }
    }

    Ok(())
}
