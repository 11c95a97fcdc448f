//! Connection lifecycle
//!
//! - `Server`: listening socket and accept loop, one task per connection
//! - `ConnectionHandler`: per-connection state machine (handshake, auth, channel, echo)
//! - `ChannelSession`: the echo loop on the session channel
//! - `SessionRegistry`: live connections keyed by remote address

mod channel;
mod connection;
mod registry;
mod server;

pub use channel::{ChannelSession, SessionStats};
pub use connection::{Connection, ConnectionGuard, ConnectionHandler};
pub use registry::{SessionHandle, SessionRegistry};
pub use server::Server;

use crate::auth::AuthPolicy;
use crate::logging::AuditLog;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Per-connection limits
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Time allowed from accept to a completed transport handshake
    pub handshake_timeout: Duration,
    /// Time allowed from the end of the handshake to a successful authentication
    pub auth_timeout: Duration,
    /// Time allowed after authentication for a session channel to be opened
    pub channel_timeout: Duration,
    pub max_auth_attempts: u32,
    /// Maximum bytes read per echo iteration
    pub buffer_size: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(20),
            auth_timeout: Duration::from_secs(20),
            channel_timeout: Duration::from_secs(20),
            max_auth_attempts: 6,
            buffer_size: 1024,
        }
    }
}

/// Lifecycle states of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Accepted,
    Negotiating,
    Authenticating,
    Authenticated,
    SessionActive,
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Accepted => "accepted",
            ConnectionState::Negotiating => "negotiating",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Authenticated => "authenticated",
            ConnectionState::SessionActive => "session_active",
            ConnectionState::Closed => "closed",
        }
    }

    /// Whether `next` is a legal successor of `self`
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Accepted, Negotiating)
                | (Negotiating, Authenticating)
                | (Authenticating, Authenticated)
                | (Authenticated, SessionActive)
                | (Accepted | Negotiating | Authenticating | Authenticated | SessionActive, Closed)
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State shared by every connection handler of one server
pub struct SessionContext {
    pub settings: SessionSettings,
    /// Address announced in the session greeting
    pub local_addr: SocketAddr,
    pub policy: Arc<dyn AuthPolicy>,
    pub registry: Arc<SessionRegistry>,
    pub audit: Arc<AuditLog>,
    next_conn_id: AtomicU64,
}

impl SessionContext {
    pub fn new(
        settings: SessionSettings,
        local_addr: SocketAddr,
        policy: Arc<dyn AuthPolicy>,
        registry: Arc<SessionRegistry>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            settings,
            local_addr,
            policy,
            registry,
            audit,
            next_conn_id: AtomicU64::new(1),
        }
    }

    /// Allocate a process-unique connection id
    pub fn next_conn_id(&self) -> u64 {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }
}
