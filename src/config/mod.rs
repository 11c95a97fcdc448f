//! Configuration module for echo-sshd
//!
//! This module handles loading and parsing of configuration files,
//! including environment variable expansion and path resolution.

mod file;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use crate::auth::PolicyKind;
use crate::session::SessionSettings;

pub use file::{
    ConfigFile, ConfigPath, config_search_paths, find_config_file, load_config,
    load_config_or_default,
};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Host or IP address to bind
    #[serde(default = "default_address")]
    pub address: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Server host key (OpenSSH or PKCS#8 PEM). Generated on first start if missing.
    /// Supports environment variable and tilde expansion
    #[serde(default = "default_host_key")]
    pub host_key: String,

    /// Listen backlog for connections not yet accepted
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Time allowed for the SSH handshake after accept. Format: "20s", "1m", etc.
    #[serde(default = "default_timeout")]
    pub handshake_timeout: String,

    /// Time allowed for authentication
    #[serde(default = "default_timeout")]
    pub auth_timeout: String,

    /// Time allowed between authentication and the session channel open
    #[serde(default = "default_timeout")]
    pub channel_timeout: String,

    #[serde(default = "default_max_auth_attempts")]
    pub max_auth_attempts: u32,

    /// Maximum bytes read per echo iteration
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Path to the JSONL audit log
    /// Supports environment variable and tilde expansion
    #[serde(default)]
    pub log_path: Option<String>,

    #[serde(default)]
    pub auth: AuthConfig,
}

/// `[auth]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// "publickey", "insecure-open" or "deny"
    #[serde(default = "default_policy")]
    pub policy: String,

    /// authorized_keys file whose keys are valid for every user
    #[serde(default)]
    pub authorized_keys: Option<String>,

    /// Per-user key material
    #[serde(default)]
    pub users: BTreeMap<String, UserConfig>,
}

/// `[auth.users.NAME]` section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserConfig {
    /// Inline OpenSSH public keys
    #[serde(default)]
    pub keys: Vec<String>,

    /// authorized_keys style files
    #[serde(default)]
    pub key_files: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            host_key: default_host_key(),
            max_connections: default_max_connections(),
            handshake_timeout: default_timeout(),
            auth_timeout: default_timeout(),
            channel_timeout: default_timeout(),
            max_auth_attempts: default_max_auth_attempts(),
            buffer_size: default_buffer_size(),
            log_path: None,
            auth: AuthConfig::default(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            policy: default_policy(),
            authorized_keys: None,
            users: BTreeMap::new(),
        }
    }
}

fn default_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    2222
}

fn default_host_key() -> String {
    "keys/server/id_ed25519".to_string()
}

fn default_max_connections() -> usize {
    5
}

fn default_timeout() -> String {
    "20s".to_string()
}

fn default_max_auth_attempts() -> u32 {
    6
}

fn default_buffer_size() -> usize {
    1024
}

fn default_policy() -> String {
    PolicyKind::PUBLIC_KEY.to_string()
}

impl Config {
    /// Validate the configuration, expand paths and parse durations
    pub fn resolve(&self) -> crate::Result<ServerSettings> {
        if self.max_connections == 0 {
            return Err(crate::Error::Config(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if self.buffer_size == 0 {
            return Err(crate::Error::Config(
                "buffer_size must be at least 1".to_string(),
            ));
        }
        if self.max_auth_attempts == 0 {
            return Err(crate::Error::Config(
                "max_auth_attempts must be at least 1".to_string(),
            ));
        }

        let listen = resolve_listen_addr(&self.address, self.port)?;

        let mut users = BTreeMap::new();
        for (name, user) in &self.auth.users {
            let key_files = user
                .key_files
                .iter()
                .map(|p| expand_path(p).map(PathBuf::from))
                .collect::<crate::Result<Vec<_>>>()?;
            users.insert(
                name.clone(),
                UserKeys {
                    keys: user.keys.clone(),
                    key_files,
                },
            );
        }

        Ok(ServerSettings {
            listen,
            host_key: PathBuf::from(expand_path(&self.host_key)?),
            max_connections: self.max_connections,
            log_path: self
                .log_path
                .as_ref()
                .map(|p| expand_path(p).map(PathBuf::from))
                .transpose()?,
            session: SessionSettings {
                handshake_timeout: parse_duration(&self.handshake_timeout)?,
                auth_timeout: parse_duration(&self.auth_timeout)?,
                channel_timeout: parse_duration(&self.channel_timeout)?,
                max_auth_attempts: self.max_auth_attempts,
                buffer_size: self.buffer_size,
            },
            auth: AuthSettings {
                policy: PolicyKind::parse(&self.auth.policy),
                authorized_keys: self
                    .auth
                    .authorized_keys
                    .as_ref()
                    .map(|p| expand_path(p).map(PathBuf::from))
                    .transpose()?,
                users,
            },
        })
    }
}

/// Configuration with all paths expanded and durations parsed
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub listen: SocketAddr,
    pub host_key: PathBuf,
    pub max_connections: usize,
    pub log_path: Option<PathBuf>,
    pub session: SessionSettings,
    pub auth: AuthSettings,
}

/// Resolved `[auth]` section
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub policy: PolicyKind,
    pub authorized_keys: Option<PathBuf>,
    pub users: BTreeMap<String, UserKeys>,
}

/// Resolved key sources for one user
#[derive(Debug, Clone, Default)]
pub struct UserKeys {
    pub keys: Vec<String>,
    pub key_files: Vec<PathBuf>,
}

/// Resolve `host:port` to the first matching socket address
pub fn resolve_listen_addr(host: &str, port: u16) -> crate::Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .map_err(|e| crate::Error::Config(format!("Invalid address '{}': {}", host, e)))?
        .next()
        .ok_or_else(|| crate::Error::Config(format!("Address '{}' did not resolve", host)))
}

/// Expand environment variables and tilde in a path string
pub fn expand_path(path: &str) -> crate::Result<String> {
    shellexpand::full(path)
        .map(|s| s.into_owned())
        .map_err(|e| crate::Error::Config(format!("Failed to expand path '{}': {}", path, e)))
}

/// Parse a duration string like "1h", "30m", "10s", "250ms"
pub fn parse_duration(s: &str) -> crate::Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(crate::Error::Config("Empty duration string".to_string()));
    }

    let (num_str, unit) = s
        .char_indices()
        .find(|(_, c)| c.is_alphabetic())
        .map(|(i, _)| (&s[..i], &s[i..]))
        .unwrap_or((s, "s"));

    let num: u64 = num_str.trim().parse().map_err(|e| {
        crate::Error::Config(format!("Invalid duration number '{}': {}", num_str, e))
    })?;

    let duration = match unit.to_lowercase().as_str() {
        "ms" | "msec" | "millis" => Duration::from_millis(num),
        "s" | "sec" | "secs" | "second" | "seconds" => Duration::from_secs(num),
        "m" | "min" | "mins" | "minute" | "minutes" => Duration::from_secs(num * 60),
        "h" | "hr" | "hrs" | "hour" | "hours" => Duration::from_secs(num * 60 * 60),
        _ => {
            return Err(crate::Error::Config(format!(
                "Unknown duration unit '{}' in '{}'",
                unit, s
            )));
        }
    };

    Ok(duration)
}
