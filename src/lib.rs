//! echo-sshd - multi-client authenticated SSH echo server
//!
//! Clients connect over SSH-2, authenticate against a pluggable policy and open one
//! session channel. The server greets them and echoes every byte back until either side
//! closes. Each connection runs in its own task; a bounded number are served at once.

pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod keys;
pub mod logging;
pub mod session;
pub mod transport;

pub use error::{Error, Result};

/// Package version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name
pub const NAME: &str = env!("CARGO_PKG_NAME");
