//! Logging module for echo-sshd
//!
//! - `init` / `init_with_config`: tracing subscriber with an `EnvFilter` and a stderr layer
//! - `AuditLog`: structured audit records, mirrored to tracing and optionally to a JSONL file

pub mod jsonl;

pub use jsonl::{JsonlWriter, LogEvent, LogEventKind};

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Logging configuration
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// Verbosity level adjustment: -1 for quiet, 0 for normal, +1 for verbose
    pub verbosity: i8,
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set verbose mode (+1 verbosity)
    pub fn verbose(mut self) -> Self {
        self.verbosity = 1;
        self
    }

    /// Set quiet mode (-1 verbosity)
    pub fn quiet(mut self) -> Self {
        self.verbosity = -1;
        self
    }

    fn min_level(&self) -> Level {
        match self.verbosity {
            v if v < 0 => Level::WARN,
            0 => Level::INFO,
            _ => Level::DEBUG,
        }
    }
}

/// Initialize the logging subsystem from the global CLI flags
pub fn init(verbose: bool, quiet: bool) {
    let config = LogConfig {
        verbosity: if quiet {
            -1
        } else if verbose {
            1
        } else {
            0
        },
    };
    init_with_config(config)
}

/// Initialize logging with full configuration
///
/// `RUST_LOG` overrides the level derived from `config`.
pub fn init_with_config(config: LogConfig) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(config.min_level().into())
        .from_env_lossy();

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer);

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Warning: tracing subscriber already installed: {}", e);
    }
}

/// Sink for audit records
///
/// Every record is emitted as a tracing event; when a file is configured it is also appended
/// to that file as one JSON line.
#[derive(Default)]
pub struct AuditLog {
    writer: Option<JsonlWriter>,
    path: Option<PathBuf>,
}

impl AuditLog {
    /// Audit log that only emits tracing events
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Audit log that also appends to the JSONL file at `path`
    pub fn open(path: &Path) -> Result<Self> {
        let writer = JsonlWriter::new(path).map_err(|e| {
            Error::Config(format!(
                "Failed to open audit log '{}': {}",
                path.display(),
                e
            ))
        })?;
        Ok(Self {
            writer: Some(writer),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn record(&self, event: &LogEvent) {
        tracing::debug!(
            kind = %event.kind,
            conn_id = ?event.conn_id,
            peer = ?event.peer,
            "audit"
        );

        if let Some(writer) = &self.writer {
            if let Err(e) = writer.write(event) {
                tracing::warn!("Failed to write audit record: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog").field("path", &self.path).finish()
    }
}
