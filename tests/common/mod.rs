//! Shared fixtures: a scripted in-memory transport and helpers to build a session context

#![allow(dead_code)]

use bytes::Bytes;
use echo_sshd::auth::{AuthPolicy, AuthVerdict, Credential};
use echo_sshd::logging::{AuditLog, LogEvent, LogEventKind};
use echo_sshd::session::{
    ConnectionHandler, SessionContext, SessionRegistry, SessionSettings, SessionStats,
};
use echo_sshd::transport::{
    AuthAttempt, PendingChannel, SecureTransport, SessionChannel, TransportConnection,
    TransportError,
};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

// Pre-generated test keys
pub const ED25519_KEY_ALICE: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIOMqqnkVzrm0SdG6UOoqKLsabgH5C9okWi0dh2l9GKJl alice@example.com";
pub const ED25519_KEY_BOB: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIHUu2eEV0kRvK3dMRlSFwHxVoNxCfwjKmAZBlhkNjC4i bob@example.com";

pub const LOCAL_ADDR: &str = "127.0.0.1:2222";

/// Wire blob of an OpenSSH public key line
pub fn key_blob(key_str: &str) -> Bytes {
    let public_key: ssh_key::PublicKey = key_str.parse().unwrap();
    Bytes::from(public_key.to_bytes().unwrap())
}

pub fn peer(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

/// Limits short enough that timeout tests finish quickly
pub fn fast_settings() -> SessionSettings {
    SessionSettings {
        handshake_timeout: Duration::from_millis(200),
        auth_timeout: Duration::from_millis(200),
        channel_timeout: Duration::from_millis(200),
        max_auth_attempts: 3,
        buffer_size: 1024,
    }
}

/// Handler wired to a fresh registry and an audit file at `audit_path`
pub fn build_handler(
    policy: Arc<dyn AuthPolicy>,
    settings: SessionSettings,
    audit_path: &Path,
) -> (ConnectionHandler, Arc<SessionRegistry>) {
    let registry = Arc::new(SessionRegistry::new());
    let audit = Arc::new(AuditLog::open(audit_path).unwrap());
    let ctx = SessionContext::new(
        settings,
        LOCAL_ADDR.parse().unwrap(),
        policy,
        Arc::clone(&registry),
        audit,
    );
    (ConnectionHandler::new(Arc::new(ctx)), registry)
}

/// Serve a scripted connection the way the server serves a negotiated one
pub async fn serve_scripted(
    handler: &ConnectionHandler,
    peer: SocketAddr,
    conn: ScriptedConnection,
) -> echo_sshd::Result<SessionStats> {
    let idle = tokio::spawn(std::future::pending::<()>());
    let guard = handler.open(peer, idle.abort_handle())?;
    let result = handler.serve(conn, guard).await;
    idle.abort();
    result
}

/// Both ends of a loopback TCP connection: (accepted, client)
pub async fn socket_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let client = TcpStream::connect(listener.local_addr().unwrap())
        .await
        .unwrap();
    let (accepted, _) = listener.accept().await.unwrap();
    (accepted, client)
}

/// Transport whose handshake never produces a connection
pub enum BrokenTransport {
    /// The handshake fails with this message
    Fails(&'static str),
    /// The client never completes the handshake
    Stalls,
}

impl SecureTransport for BrokenTransport {
    type Connection = ScriptedConnection;

    async fn handshake(
        &self,
        _socket: TcpStream,
        _peer: SocketAddr,
    ) -> Result<ScriptedConnection, TransportError> {
        match self {
            BrokenTransport::Fails(msg) => Err(TransportError::Negotiation(msg.to_string())),
            BrokenTransport::Stalls => std::future::pending().await,
        }
    }
}

/// Every record in a JSONL audit file
pub fn read_audit(path: &Path) -> Vec<LogEvent> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

pub fn audit_kinds(path: &Path) -> Vec<LogEventKind> {
    read_audit(path).iter().map(|e| e.kind).collect()
}

/// What the handler did to a scripted connection
#[derive(Debug, Default)]
pub struct Transcript {
    pub verdicts: Vec<AuthVerdict>,
    pub accepted_kinds: Vec<String>,
    pub rejected: Vec<String>,
    pub sent: Vec<u8>,
    pub recv_sizes: Vec<usize>,
    pub closed: bool,
}

pub type SharedTranscript = Arc<Mutex<Transcript>>;

/// Connection that replays a fixed script of client behaviour
///
/// When the auth script or the channel script runs out, the connection stays silent until the
/// handler's timeout expires.
pub struct ScriptedConnection {
    attempts: VecDeque<Result<AuthAttempt, TransportError>>,
    channels: VecDeque<(String, Vec<Bytes>)>,
    authenticated: bool,
    transcript: SharedTranscript,
}

impl ScriptedConnection {
    pub fn new() -> (Self, SharedTranscript) {
        let transcript = SharedTranscript::default();
        let conn = Self {
            attempts: VecDeque::new(),
            channels: VecDeque::new(),
            authenticated: false,
            transcript: Arc::clone(&transcript),
        };
        (conn, transcript)
    }

    pub fn attempt(mut self, username: &str, credential: Credential) -> Self {
        self.attempts
            .push_back(Ok(AuthAttempt::new(username, credential)));
        self
    }

    pub fn auth_error(mut self, err: TransportError) -> Self {
        self.attempts.push_back(Err(err));
        self
    }

    /// Channel-open request of `kind`; if accepted, the client sends `chunks` then EOF
    pub fn channel(mut self, kind: &str, chunks: &[&[u8]]) -> Self {
        let chunks = chunks.iter().map(|c| Bytes::copy_from_slice(c)).collect();
        self.channels.push_back((kind.to_string(), chunks));
        self
    }
}

impl TransportConnection for ScriptedConnection {
    type Pending = ScriptedPending;
    type Channel = ScriptedChannel;

    async fn wait_auth_attempt(
        &mut self,
        timeout: Duration,
    ) -> Result<AuthAttempt, TransportError> {
        match self.attempts.pop_front() {
            Some(next) => next,
            None => {
                tokio::time::sleep(timeout).await;
                Err(TransportError::Timeout)
            }
        }
    }

    async fn send_auth_result(&mut self, verdict: &AuthVerdict) -> Result<(), TransportError> {
        if verdict.is_accepted() {
            self.authenticated = true;
        }
        self.transcript.lock().unwrap().verdicts.push(*verdict);
        Ok(())
    }

    async fn accept_channel(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<ScriptedPending>, TransportError> {
        match self.channels.pop_front() {
            Some((kind, chunks)) => Ok(Some(ScriptedPending {
                kind,
                chunks,
                transcript: Arc::clone(&self.transcript),
            })),
            None => {
                tokio::time::sleep(timeout).await;
                Ok(None)
            }
        }
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    async fn close(&mut self) {
        self.transcript.lock().unwrap().closed = true;
    }
}

pub struct ScriptedPending {
    kind: String,
    chunks: Vec<Bytes>,
    transcript: SharedTranscript,
}

impl PendingChannel for ScriptedPending {
    type Channel = ScriptedChannel;

    fn kind(&self) -> &str {
        &self.kind
    }

    async fn accept(self) -> Result<ScriptedChannel, TransportError> {
        self.transcript
            .lock()
            .unwrap()
            .accepted_kinds
            .push(self.kind.clone());
        Ok(ScriptedChannel {
            incoming: self.chunks.into(),
            transcript: self.transcript,
        })
    }

    async fn reject(self) -> Result<(), TransportError> {
        self.transcript.lock().unwrap().rejected.push(self.kind);
        Ok(())
    }
}

pub struct ScriptedChannel {
    incoming: VecDeque<Bytes>,
    transcript: SharedTranscript,
}

impl SessionChannel for ScriptedChannel {
    fn id(&self) -> u32 {
        0
    }

    async fn recv(&mut self, max: usize) -> Result<Bytes, TransportError> {
        self.transcript.lock().unwrap().recv_sizes.push(max);
        let Some(mut chunk) = self.incoming.pop_front() else {
            return Ok(Bytes::new());
        };
        if chunk.len() > max {
            let rest = chunk.split_off(max);
            self.incoming.push_front(rest);
        }
        Ok(chunk)
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.transcript.lock().unwrap().sent.extend_from_slice(data);
        Ok(())
    }
}
