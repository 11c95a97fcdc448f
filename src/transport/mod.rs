//! Secure transport seam
//!
//! The connection handler drives authentication and channel setup through these traits.
//! Everything below them (key exchange, ciphers, MACs, packet framing, signature checks)
//! belongs to the transport implementation:
//! - `SecureTransport`: turns an accepted socket into an encrypted connection
//! - `TransportConnection`: delivers auth attempts and channel-open requests
//! - `PendingChannel`: a channel-open request awaiting an answer
//! - `SessionChannel`: the byte stream of an accepted channel

pub mod ssh;

use bytes::Bytes;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;

use crate::auth::{AuthVerdict, Credential};

pub use ssh::{RusshTransport, TransportOptions};

/// Errors reported by a transport implementation
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("handshake failed: {0}")]
    Negotiation(String),

    #[error("timed out")]
    Timeout,

    #[error("peer disconnected")]
    Disconnected,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One authentication attempt received from the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthAttempt {
    pub username: String,
    pub credential: Credential,
}

impl AuthAttempt {
    pub fn new(username: impl Into<String>, credential: Credential) -> Self {
        Self {
            username: username.into(),
            credential,
        }
    }
}

/// Channel kind accepted by the server
pub const SESSION_CHANNEL_KIND: &str = "session";

/// Produces an encrypted connection from an accepted socket
pub trait SecureTransport: Send + Sync + 'static {
    type Connection: TransportConnection;

    /// Run the transport handshake on a freshly accepted socket
    fn handshake(
        &self,
        socket: TcpStream,
        peer: SocketAddr,
    ) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;
}

/// An established, encrypted connection
pub trait TransportConnection: Send + 'static {
    type Pending: PendingChannel<Channel = Self::Channel>;
    type Channel: SessionChannel;

    /// Wait for the next authentication attempt
    ///
    /// Returns `TransportError::Timeout` when nothing arrives within `timeout` and
    /// `TransportError::Disconnected` when the peer goes away.
    fn wait_auth_attempt(
        &mut self,
        timeout: Duration,
    ) -> impl Future<Output = Result<AuthAttempt, TransportError>> + Send;

    /// Relay the verdict for the attempt last returned by `wait_auth_attempt`
    fn send_auth_result(
        &mut self,
        verdict: &AuthVerdict,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Wait for the next channel-open request; `None` on timeout or disconnect
    fn accept_channel(
        &mut self,
        timeout: Duration,
    ) -> impl Future<Output = Result<Option<Self::Pending>, TransportError>> + Send;

    /// Whether the transport considers the client authenticated
    fn is_authenticated(&self) -> bool;

    /// Tear down the connection
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// A channel-open request awaiting an answer
pub trait PendingChannel: Send + 'static {
    type Channel: SessionChannel;

    /// Requested channel kind, e.g. "session" or "direct-tcpip"
    fn kind(&self) -> &str;

    fn accept(self) -> impl Future<Output = Result<Self::Channel, TransportError>> + Send;

    /// Refuse the request; the client sees SSH_OPEN_ADMINISTRATIVELY_PROHIBITED
    fn reject(self) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Byte stream of an accepted channel
pub trait SessionChannel: Send + 'static {
    /// Channel id, unique within its connection
    fn id(&self) -> u32;

    /// Receive up to `max` bytes. An empty buffer means the peer closed its write side.
    fn recv(&mut self, max: usize) -> impl Future<Output = Result<Bytes, TransportError>> + Send;

    fn send(&mut self, data: &[u8]) -> impl Future<Output = Result<(), TransportError>> + Send;
}
