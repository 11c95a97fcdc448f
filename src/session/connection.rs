//! Per-connection state machine
//!
//! Accepted → Negotiating → Authenticating → Authenticated → SessionActive → Closed.
//! Every state can end in Closed. `ConnectionGuard` performs the Closed transition
//! (registry removal and the close audit record) on drop, so it runs on every exit path,
//! including panics and task abort.

use crate::auth::{AuthVerdict, Credential};
use crate::error::{Error, Result};
use crate::logging::LogEvent;
use crate::transport::{
    PendingChannel, SESSION_CHANNEL_KIND, SecureTransport, TransportConnection, TransportError,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use super::{ChannelSession, ConnectionState, SessionContext, SessionHandle, SessionStats};

/// What the handler knows about its connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub conn_id: u64,
    pub remote_address: SocketAddr,
    pub authenticated: bool,
    pub username: Option<String>,
}

/// Registry membership and close bookkeeping for one connection
pub struct ConnectionGuard {
    ctx: Arc<SessionContext>,
    connection: Connection,
    state: watch::Sender<ConnectionState>,
    opened_at: Instant,
    stats: SessionStats,
    error: Option<String>,
}

impl ConnectionGuard {
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn conn_id(&self) -> u64 {
        self.connection.conn_id
    }

    pub fn peer(&self) -> SocketAddr {
        self.connection.remote_address
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Move to `next`; illegal transitions are logged and ignored
    fn transition(&self, next: ConnectionState) {
        let current = self.state();
        if !current.can_transition_to(next) {
            warn!(
                conn_id = self.conn_id(),
                from = %current,
                to = %next,
                "Ignoring illegal state transition"
            );
            return;
        }
        debug!(conn_id = self.conn_id(), from = %current, to = %next, "State change");
        self.state.send_replace(next);
    }

    fn authenticated(&mut self, username: &str) {
        self.connection.authenticated = true;
        self.connection.username = Some(username.to_string());
        self.transition(ConnectionState::Authenticated);
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let last = self.state();
        self.state.send_replace(ConnectionState::Closed);

        let conn_id = self.conn_id();
        let peer = self.peer();
        if !self.ctx.registry.unregister(peer, conn_id) {
            warn!(conn_id = conn_id, peer = %peer, "Connection was not registered at close");
        }

        let mut event = LogEvent::connection_close(conn_id, peer, last.as_str())
            .with_bytes_echoed(self.stats.bytes_echoed)
            .with_duration_ms(self.opened_at.elapsed().as_millis() as u64);
        if let Some(user) = &self.connection.username {
            event = event.with_user(user.clone());
        }
        if let Some(error) = &self.error {
            event = event.with_error(error.clone());
        }
        self.ctx.audit.record(&event);

        info!(
            conn_id = conn_id,
            peer = %peer,
            last_state = %last,
            bytes = self.stats.bytes_echoed,
            "Connection closed"
        );
    }
}

/// Drives connections from accept to close
#[derive(Clone)]
pub struct ConnectionHandler {
    ctx: Arc<SessionContext>,
}

impl ConnectionHandler {
    pub fn new(ctx: Arc<SessionContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.ctx
    }

    /// Handle one accepted socket end to end
    ///
    /// `task` is the abort handle of the task running this call; it is stored in the registry.
    pub async fn handle<T: SecureTransport>(
        &self,
        transport: &T,
        socket: TcpStream,
        peer: SocketAddr,
        task: AbortHandle,
    ) -> Result<SessionStats> {
        let mut guard = self.open(peer, task)?;

        guard.transition(ConnectionState::Negotiating);
        let timeout = self.ctx.settings.handshake_timeout;
        let conn = match tokio::time::timeout(timeout, transport.handshake(socket, peer)).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => return Err(self.fail(&mut guard, Error::Negotiation(e.to_string()))),
            Err(_) => {
                let err = Error::Negotiation(format!("no handshake within {:?}", timeout));
                return Err(self.fail(&mut guard, err));
            }
        };

        self.serve(conn, guard).await
    }

    /// Record why the connection is ending; the guard writes it into the close record
    fn fail(&self, guard: &mut ConnectionGuard, err: Error) -> Error {
        debug!(
            conn_id = guard.conn_id(),
            peer = %guard.peer(),
            state = %guard.state(),
            kind = err.kind(),
            error = %err,
            "Connection ended with error"
        );
        self.ctx.audit.record(&LogEvent::connection_error(
            guard.conn_id(),
            guard.peer(),
            err.kind(),
            err.to_string(),
        ));
        guard.error = Some(err.to_string());
        err
    }

    /// Register a new connection in the Accepted state
    pub fn open(&self, peer: SocketAddr, task: AbortHandle) -> Result<ConnectionGuard> {
        let conn_id = self.ctx.next_conn_id();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Accepted);
        self.ctx
            .registry
            .register(SessionHandle::new(conn_id, peer, state_rx, task))?;

        info!(conn_id = conn_id, peer = %peer, "Connection accepted");
        self.ctx.audit.record(&LogEvent::connection_open(conn_id, peer));

        Ok(ConnectionGuard {
            ctx: Arc::clone(&self.ctx),
            connection: Connection {
                conn_id,
                remote_address: peer,
                authenticated: false,
                username: None,
            },
            state: state_tx,
            opened_at: Instant::now(),
            stats: SessionStats::default(),
            error: None,
        })
    }

    /// Run a negotiated connection through authentication, channel open and the echo loop
    ///
    /// The transport is closed and the guard dropped before this returns.
    pub async fn serve<C: TransportConnection>(
        &self,
        mut conn: C,
        mut guard: ConnectionGuard,
    ) -> Result<SessionStats> {
        let result = match self.serve_inner(&mut conn, &mut guard).await {
            Ok(stats) => {
                guard.stats = stats;
                Ok(stats)
            }
            Err(e) => Err(self.fail(&mut guard, e)),
        };
        conn.close().await;
        drop(guard);
        result
    }

    async fn serve_inner<C: TransportConnection>(
        &self,
        conn: &mut C,
        guard: &mut ConnectionGuard,
    ) -> Result<SessionStats> {
        guard.transition(ConnectionState::Authenticating);
        self.authenticate(conn, guard).await?;

        let channel = self.open_session(conn, guard).await?;
        guard.transition(ConnectionState::SessionActive);

        let mut session = ChannelSession::new(channel, self.ctx.settings.buffer_size);
        debug!(conn_id = guard.conn_id(), channel = session.id(), "Session started");
        session.run(self.ctx.local_addr).await
    }

    /// Authentication phase
    ///
    /// Bounded by the auth timeout measured from entering the phase and by the attempt limit.
    async fn authenticate<C: TransportConnection>(
        &self,
        conn: &mut C,
        guard: &mut ConnectionGuard,
    ) -> Result<()> {
        let settings = &self.ctx.settings;
        let deadline = Instant::now() + settings.auth_timeout;
        let mut attempts = 0u32;
        // Last partial success on this connection and the username it was granted to
        let mut partial: Option<(AuthVerdict, String)> = None;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::AuthTimeout);
            }

            let attempt = match conn.wait_auth_attempt(remaining).await {
                Ok(attempt) => attempt,
                Err(TransportError::Timeout) => return Err(Error::AuthTimeout),
                Err(e) => return Err(e.into()),
            };
            attempts += 1;

            let method = attempt.credential.method();
            let verdict = match &partial {
                Some((AuthVerdict::AcceptedPartial(next), user))
                    if !next.contains(method) || *user != attempt.username =>
                {
                    debug!(
                        conn_id = guard.conn_id(),
                        user = %attempt.username,
                        method = %method,
                        expected = %next,
                        "Attempt outside partial-success continuation"
                    );
                    AuthVerdict::Rejected
                }
                _ => self.ctx.policy.decide(
                    &attempt.username,
                    &attempt.credential,
                    partial.as_ref().map(|(v, _)| v),
                ),
            };

            self.record_decision(guard, &attempt.username, &attempt.credential, &verdict);
            conn.send_auth_result(&verdict).await?;

            match verdict {
                AuthVerdict::Accepted => {
                    guard.authenticated(&attempt.username);
                    if !conn.is_authenticated() {
                        warn!(conn_id = guard.conn_id(), "Transport did not confirm authentication");
                    }
                    return Ok(());
                }
                AuthVerdict::AcceptedPartial(_) => {
                    partial = Some((verdict, attempt.username));
                }
                AuthVerdict::Rejected => {}
            }

            if attempts >= settings.max_auth_attempts {
                return Err(Error::AuthRejected { attempts });
            }
        }
    }

    fn record_decision(
        &self,
        guard: &ConnectionGuard,
        username: &str,
        credential: &Credential,
        verdict: &AuthVerdict,
    ) {
        let fingerprint = credential.fingerprint();
        info!(
            conn_id = guard.conn_id(),
            peer = %guard.peer(),
            user = %username,
            method = %credential.method(),
            fingerprint = fingerprint.as_deref().unwrap_or("-"),
            policy = self.ctx.policy.name(),
            verdict = %verdict,
            "Auth decision"
        );

        let mut event = LogEvent::auth_decision(
            guard.conn_id(),
            guard.peer(),
            username,
            credential.method().as_str(),
            verdict.as_str(),
        );
        if let Some(fp) = fingerprint {
            event = event.with_fingerprint(fp);
        }
        self.ctx.audit.record(&event);
    }

    /// Wait for a session channel, refusing every other kind
    async fn open_session<C: TransportConnection>(
        &self,
        conn: &mut C,
        guard: &ConnectionGuard,
    ) -> Result<C::Channel> {
        let deadline = Instant::now() + self.ctx.settings.channel_timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::ChannelTimeout);
            }

            let Some(pending) = conn.accept_channel(remaining).await? else {
                return Err(Error::ChannelTimeout);
            };

            let kind = pending.kind().to_string();
            if kind == SESSION_CHANNEL_KIND {
                let channel = pending.accept().await?;
                info!(conn_id = guard.conn_id(), kind = %kind, "Channel opened");
                self.ctx
                    .audit
                    .record(&LogEvent::channel_open(guard.conn_id(), guard.peer(), &kind));
                return Ok(channel);
            }

            pending.reject().await?;
            let denied = Error::ChannelOpenDenied(kind.clone());
            info!(conn_id = guard.conn_id(), kind = %kind, "{}", denied);
            self.ctx.audit.record(
                &LogEvent::channel_denied(guard.conn_id(), guard.peer(), &kind)
                    .with_reason(denied.to_string()),
            );
        }
    }
}
