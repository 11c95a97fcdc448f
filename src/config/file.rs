//! Config file lookup
//!
//! An explicit `--config` path (or `ECHO_SSHD_CONFIG`) is used as is. Otherwise the first
//! existing file among [`config_search_paths`] wins, and without one the defaults apply.
//! A file is only returned once it parses and resolves, so errors name the offending file.

use std::fmt;
use std::path::{Path, PathBuf};

use super::Config;

/// A configuration and the file it was read from
#[derive(Debug, Clone)]
pub struct ConfigFile {
    /// `None` when no file was found and the defaults are in use
    pub source: Option<PathBuf>,
    pub config: Config,
}

impl ConfigFile {
    fn defaults() -> Self {
        Self {
            source: None,
            config: Config::default(),
        }
    }
}

/// A location searched for the config file
#[derive(Debug, Clone)]
pub struct ConfigPath {
    pub path: PathBuf,
    /// The location as shown to users, e.g. `~/.echo-sshd.toml`
    pub description: &'static str,
}

/// Locations searched when no path is given, highest priority first
pub fn config_search_paths() -> Vec<ConfigPath> {
    let mut paths = Vec::new();
    let mut push = |path: PathBuf, description: &'static str| {
        if !paths.iter().any(|p: &ConfigPath| p.path == path) {
            paths.push(ConfigPath { path, description });
        }
    };

    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        push(
            PathBuf::from(xdg).join("echo-sshd/config.toml"),
            "$XDG_CONFIG_HOME/echo-sshd/config.toml",
        );
    }
    if let Some(home) = dirs::home_dir() {
        push(
            home.join(".config/echo-sshd/config.toml"),
            "~/.config/echo-sshd/config.toml",
        );
        push(home.join(".echo-sshd.toml"), "~/.echo-sshd.toml");
    }
    push(
        PathBuf::from("/etc/echo-sshd/config.toml"),
        "/etc/echo-sshd/config.toml",
    );

    paths
}

/// First existing file among the search paths
pub fn find_config_file() -> Option<PathBuf> {
    let found = config_search_paths()
        .into_iter()
        .map(|candidate| candidate.path)
        .find(|path| path.is_file());
    match &found {
        Some(path) => tracing::debug!(path = %path.display(), "Found configuration file"),
        None => tracing::debug!("No configuration file in the search paths"),
    }
    found
}

/// Read, parse and validate the config file at `path`
pub fn load_config(path: &Path) -> crate::Result<ConfigFile> {
    tracing::debug!(path = %path.display(), "Loading configuration");

    let content = std::fs::read_to_string(path).map_err(|e| file_error(path, "cannot read", e))?;
    let config: Config =
        toml::from_str(&content).map_err(|e| file_error(path, "cannot parse", e))?;
    config
        .resolve()
        .map_err(|e| file_error(path, "invalid", e))?;

    Ok(ConfigFile {
        source: Some(path.to_path_buf()),
        config,
    })
}

/// Load `path` when given, else the first file found, else the defaults
pub fn load_config_or_default(path: Option<&Path>) -> crate::Result<ConfigFile> {
    match path.map(Path::to_path_buf).or_else(find_config_file) {
        Some(path) => load_config(&path),
        None => Ok(ConfigFile::defaults()),
    }
}

fn file_error(path: &Path, what: &str, err: impl fmt::Display) -> crate::Error {
    crate::Error::Config(format!("{} {}: {}", what, path.display(), err))
}
