//! Error types for echo-sshd

use std::net::SocketAddr;

use thiserror::Error;

use crate::transport::TransportError;

/// Main error type for echo-sshd
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed or unsupported handshake
    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    /// No acceptable credential within the authentication window
    #[error("Authentication timed out")]
    AuthTimeout,

    /// Authentication attempts exhausted or client gave up
    #[error("Authentication rejected after {attempts} attempt(s)")]
    AuthRejected { attempts: u32 },

    /// Channel request of an unsupported kind
    #[error("Channel open denied: {0}")]
    ChannelOpenDenied(String),

    /// No acceptable channel request within the channel window
    #[error("No channel request received")]
    ChannelTimeout,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Key store error: {0}")]
    KeyStore(String),

    #[error("Session registry error: {0}")]
    Registry(String),

    #[error("SSH key error: {0}")]
    SshKey(#[from] ssh_key::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Short machine-friendly label used in audit records
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Negotiation(_) => "negotiation",
            Error::AuthTimeout => "auth_timeout",
            Error::AuthRejected { .. } => "auth_rejected",
            Error::ChannelOpenDenied(_) => "channel_open_denied",
            Error::ChannelTimeout => "channel_timeout",
            Error::Transport(_) => "transport",
            Error::Bind { .. } => "bind",
            Error::Config(_) => "config",
            Error::KeyStore(_) => "key_store",
            Error::Registry(_) => "registry",
            Error::SshKey(_) => "ssh_key",
            Error::TomlParse(_) => "toml",
            Error::Json(_) => "json",
            Error::Other(_) => "other",
        }
    }
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiation_error_display() {
        let err = Error::Negotiation("bad version string".to_string());
        assert_eq!(err.to_string(), "Negotiation failed: bad version string");
        assert_eq!(err.kind(), "negotiation");
    }

    #[test]
    fn test_transport_error_converts() {
        let err: Error = TransportError::Disconnected.into();
        assert!(matches!(err, Error::Transport(TransportError::Disconnected)));
        assert_eq!(err.kind(), "transport");
    }

    #[test]
    fn test_bind_error_keeps_source() {
        let err = Error::Bind {
            addr: "127.0.0.1:2222".parse().unwrap(),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        };
        assert!(err.to_string().contains("127.0.0.1:2222"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
