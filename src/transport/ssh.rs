//! SSH transport backed by russh
//!
//! russh drives the protocol through callbacks on a `Handler`. `BridgeHandler` forwards the
//! callbacks that need a decision (authentication, channel open) over an mpsc queue to the
//! connection handler and waits for the answer on a oneshot, which turns the callback API into
//! the pull API of [`TransportConnection`].

use bytes::Bytes;
use russh::keys::{PrivateKey, PublicKeyBase64};
use russh::server::{Auth, Msg, Session};
use russh::{Channel, ChannelId, ChannelMsg, MethodKind};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::{
    AuthAttempt, PendingChannel, SESSION_CHANNEL_KIND, SecureTransport,
    SessionChannel, TransportConnection, TransportError,
};
use crate::auth::{AuthMethod, AuthPolicy, AuthVerdict, Credential, MethodSet};

/// Queue depth between the russh session task and the connection handler
const EVENT_QUEUE_DEPTH: usize = 8;

/// How long `close` waits for the disconnect message to be flushed
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// russh-backed [`SecureTransport`]
#[derive(Clone)]
pub struct RusshTransport {
    config: Arc<russh::server::Config>,
    /// Consulted for public key offers, before the client signs
    policy: Arc<dyn AuthPolicy>,
}

/// Settings for [`RusshTransport`]
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Methods advertised before the username is known
    pub methods: MethodSet,
    pub max_auth_attempts: u32,
    /// Delay before answering a rejected authentication attempt
    pub rejection_delay: Duration,
    /// Close a connection that has been silent this long, in any phase
    pub inactivity_timeout: Option<Duration>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            methods: MethodSet::empty().with(AuthMethod::PublicKey),
            max_auth_attempts: 6,
            rejection_delay: Duration::from_secs(1),
            inactivity_timeout: Some(Duration::from_secs(600)),
        }
    }
}

impl RusshTransport {
    /// Create a transport presenting `host_key`
    pub fn new(
        host_key: PrivateKey,
        policy: Arc<dyn AuthPolicy>,
        options: &TransportOptions,
    ) -> Self {
        let mut config = russh::server::Config::default();
        config.keys.push(host_key);
        config.server_id =
            russh::SshId::Standard(format!("SSH-2.0-{}_{}", crate::NAME, crate::VERSION));
        config.methods = to_russh_methods(options.methods);
        config.max_auth_attempts = options.max_auth_attempts as usize;
        config.auth_rejection_time = options.rejection_delay;
        config.auth_rejection_time_initial = Some(Duration::from_secs(0));
        config.inactivity_timeout = options.inactivity_timeout;
        Self {
            config: Arc::new(config),
            policy,
        }
    }

    pub fn config(&self) -> &russh::server::Config {
        &self.config
    }
}

impl SecureTransport for RusshTransport {
    type Connection = RusshConnection;

    async fn handshake(
        &self,
        socket: TcpStream,
        peer: SocketAddr,
    ) -> Result<RusshConnection, TransportError> {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let handler = BridgeHandler {
            peer,
            events: events_tx,
            policy: Arc::clone(&self.policy),
            partial: None,
            session_open: false,
        };

        let running = russh::server::run_stream(self.config.clone(), socket, handler)
            .await
            .map_err(|e| TransportError::Negotiation(e.to_string()))?;

        let handle = running.handle();
        let task = tokio::spawn(async move {
            if let Err(e) = running.await {
                debug!(peer = %peer, error = %e, "SSH session ended with error");
            }
        });

        Ok(RusshConnection {
            peer,
            events: events_rx,
            handle,
            task: Some(task),
            pending_auth: None,
            authenticated: false,
        })
    }
}

/// Decision requests raised by russh callbacks
enum BridgeEvent {
    Auth {
        attempt: AuthAttempt,
        reply: oneshot::Sender<AuthVerdict>,
    },
    ChannelOpen {
        kind: String,
        channel: Channel<Msg>,
        reply: oneshot::Sender<bool>,
    },
}

/// russh handler that defers decisions to the connection handler
struct BridgeHandler {
    peer: SocketAddr,
    events: mpsc::Sender<BridgeEvent>,
    policy: Arc<dyn AuthPolicy>,
    /// Last partial success and the user it was granted to
    partial: Option<(AuthVerdict, String)>,
    /// Set once a session channel was accepted; later opens are refused locally
    session_open: bool,
}

impl BridgeHandler {
    async fn authenticate(&mut self, user: &str, credential: Credential) -> Auth {
        let (reply, verdict) = oneshot::channel();
        let event = BridgeEvent::Auth {
            attempt: AuthAttempt::new(user, credential),
            reply,
        };
        if self.events.send(event).await.is_err() {
            return reject();
        }
        match verdict.await {
            Ok(verdict) => {
                if let AuthVerdict::AcceptedPartial(_) = verdict {
                    self.partial = Some((verdict, user.to_string()));
                }
                to_russh_auth(&verdict)
            }
            Err(_) => reject(),
        }
    }

    async fn open_channel(&mut self, kind: &str, channel: Channel<Msg>) -> bool {
        if self.session_open {
            debug!(peer = %self.peer, kind = %kind, "Refusing extra channel on active connection");
            return false;
        }

        let (reply, decision) = oneshot::channel();
        let event = BridgeEvent::ChannelOpen {
            kind: kind.to_string(),
            channel,
            reply,
        };
        if self.events.send(event).await.is_err() {
            return false;
        }
        let accepted = decision.await.unwrap_or(false);
        if accepted && kind == SESSION_CHANNEL_KIND {
            self.session_open = true;
        }
        accepted
    }
}

impl russh::server::Handler for BridgeHandler {
    type Error = anyhow::Error;

    async fn auth_none(&mut self, user: &str) -> Result<Auth, Self::Error> {
        Ok(self.authenticate(user, Credential::None).await)
    }

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        Ok(self.authenticate(user, Credential::password(password)).await)
    }

    // Key offered without a signature: only keys the policy would accept get to sign
    async fn auth_publickey_offered(
        &mut self,
        user: &str,
        public_key: &russh::keys::PublicKey,
    ) -> Result<Auth, Self::Error> {
        let key_blob = public_key.public_key_bytes();
        if offer_acceptable(self.policy.as_ref(), self.partial.as_ref(), user, &key_blob) {
            Ok(Auth::Accept)
        } else {
            trace!(peer = %self.peer, user = %user, "Declining offered key");
            Ok(reject())
        }
    }

    // Called after russh has verified the client's signature for the offered key.
    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &russh::keys::PublicKey,
    ) -> Result<Auth, Self::Error> {
        let credential = Credential::public_key(public_key.public_key_bytes());
        Ok(self.authenticate(user, credential).await)
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(self.open_channel(SESSION_CHANNEL_KIND, channel).await)
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        trace!(peer = %self.peer, host = %host_to_connect, port = port_to_connect, "direct-tcpip requested");
        Ok(self.open_channel("direct-tcpip", channel).await)
    }

    async fn channel_open_x11(
        &mut self,
        channel: Channel<Msg>,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(self.open_channel("x11", channel).await)
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let _ = session.channel_success(channel);
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        _data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let _ = session.channel_failure(channel);
        Ok(())
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        _term: &str,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(russh::Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let _ = session.channel_failure(channel);
        Ok(())
    }

    async fn subsystem_request(
        &mut self,
        channel: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        debug!(peer = %self.peer, subsystem = %name, "Refusing subsystem request");
        let _ = session.channel_failure(channel);
        Ok(())
    }
}

/// Whether an offered key may proceed to the signature step
fn offer_acceptable(
    policy: &dyn AuthPolicy,
    partial: Option<&(AuthVerdict, String)>,
    user: &str,
    key_blob: &[u8],
) -> bool {
    match partial {
        Some((AuthVerdict::AcceptedPartial(next), partial_user))
            if !next.contains(AuthMethod::PublicKey) || partial_user != user =>
        {
            false
        }
        _ => policy.accepts_key(user, key_blob, partial.map(|(verdict, _)| verdict)),
    }
}

fn reject() -> Auth {
    Auth::Reject {
        proceed_with_methods: None,
        partial_success: false,
    }
}

fn to_russh_auth(verdict: &AuthVerdict) -> Auth {
    match verdict {
        AuthVerdict::Accepted => Auth::Accept,
        AuthVerdict::Rejected => reject(),
        AuthVerdict::AcceptedPartial(next) => Auth::Reject {
            proceed_with_methods: Some(to_russh_methods(next.methods())),
            partial_success: true,
        },
    }
}

fn to_russh_methods(methods: MethodSet) -> russh::MethodSet {
    let kinds: Vec<MethodKind> = methods
        .iter()
        .map(|m| match m {
            AuthMethod::None => MethodKind::None,
            AuthMethod::Password => MethodKind::Password,
            AuthMethod::PublicKey => MethodKind::PublicKey,
        })
        .collect();
    russh::MethodSet::from(kinds.as_slice())
}

/// Connection side of the bridge, owned by one connection handler
pub struct RusshConnection {
    peer: SocketAddr,
    events: mpsc::Receiver<BridgeEvent>,
    handle: russh::server::Handle,
    task: Option<JoinHandle<()>>,
    /// Reply slot for the attempt returned by the last `wait_auth_attempt`
    pending_auth: Option<oneshot::Sender<AuthVerdict>>,
    authenticated: bool,
}

impl RusshConnection {
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl TransportConnection for RusshConnection {
    type Pending = RusshPendingChannel;
    type Channel = RusshChannel;

    async fn wait_auth_attempt(&mut self, timeout: Duration) -> Result<AuthAttempt, TransportError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let event = tokio::time::timeout_at(deadline, self.events.recv())
                .await
                .map_err(|_| TransportError::Timeout)?
                .ok_or(TransportError::Disconnected)?;

            match event {
                BridgeEvent::Auth { attempt, reply } => {
                    self.pending_auth = Some(reply);
                    return Ok(attempt);
                }
                BridgeEvent::ChannelOpen { kind, reply, .. } => {
                    debug!(peer = %self.peer, kind = %kind, "Channel request before authentication");
                    let _ = reply.send(false);
                }
            }
        }
    }

    async fn send_auth_result(&mut self, verdict: &AuthVerdict) -> Result<(), TransportError> {
        let reply = self.pending_auth.take().ok_or_else(|| {
            TransportError::Protocol("no authentication attempt awaiting a verdict".to_string())
        })?;
        reply
            .send(*verdict)
            .map_err(|_| TransportError::Disconnected)?;
        if verdict.is_accepted() {
            self.authenticated = true;
        }
        Ok(())
    }

    async fn accept_channel(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<RusshPendingChannel>, TransportError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let event = match tokio::time::timeout_at(deadline, self.events.recv()).await {
                Ok(Some(event)) => event,
                Ok(None) | Err(_) => return Ok(None),
            };

            match event {
                BridgeEvent::ChannelOpen {
                    kind,
                    channel,
                    reply,
                } => {
                    return Ok(Some(RusshPendingChannel {
                        kind,
                        channel,
                        reply,
                    }));
                }
                BridgeEvent::Auth { reply, .. } => {
                    let _ = reply.send(AuthVerdict::Rejected);
                }
            }
        }
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    async fn close(&mut self) {
        let _ = self
            .handle
            .disconnect(
                russh::Disconnect::ByApplication,
                String::new(),
                "en".to_string(),
            )
            .await;

        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, &mut task)
                .await
                .is_err()
            {
                task.abort();
            }
        }
    }
}

impl Drop for RusshConnection {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// A channel-open request raised by the russh session
pub struct RusshPendingChannel {
    kind: String,
    channel: Channel<Msg>,
    reply: oneshot::Sender<bool>,
}

impl PendingChannel for RusshPendingChannel {
    type Channel = RusshChannel;

    fn kind(&self) -> &str {
        &self.kind
    }

    async fn accept(self) -> Result<RusshChannel, TransportError> {
        self.reply
            .send(true)
            .map_err(|_| TransportError::Disconnected)?;
        Ok(RusshChannel {
            channel: self.channel,
            pending: Bytes::new(),
        })
    }

    // russh answers a refused open with SSH_OPEN_ADMINISTRATIVELY_PROHIBITED
    async fn reject(self) -> Result<(), TransportError> {
        trace!(kind = %self.kind, "Rejecting channel");
        self.reply
            .send(false)
            .map_err(|_| TransportError::Disconnected)
    }
}

/// Byte stream of an accepted russh channel
pub struct RusshChannel {
    channel: Channel<Msg>,
    /// Data received beyond the last `recv` limit
    pending: Bytes,
}

impl SessionChannel for RusshChannel {
    fn id(&self) -> u32 {
        self.channel.id().into()
    }

    async fn recv(&mut self, max: usize) -> Result<Bytes, TransportError> {
        if !self.pending.is_empty() {
            let take = max.min(self.pending.len());
            return Ok(self.pending.split_to(take));
        }

        loop {
            match self.channel.wait().await {
                Some(ChannelMsg::Data { data }) => {
                    let mut data = Bytes::copy_from_slice(&data);
                    if data.is_empty() {
                        continue;
                    }
                    if data.len() > max {
                        self.pending = data.split_off(max);
                    }
                    return Ok(data);
                }
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) => return Ok(Bytes::new()),
                Some(other) => {
                    trace!(msg = ?other, "Ignoring channel message");
                }
                None => return Err(TransportError::Disconnected),
            }
        }
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.channel
            .data(data)
            .await
            .map_err(|e| TransportError::Protocol(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthorizedKey, AuthorizedKeys, NextMethods, Policy, PolicyKind};

    const KEY_ALICE: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIOMqqnkVzrm0SdG6UOoqKLsabgH5C9okWi0dh2l9GKJl alice@example.com";
    const KEY_BOB: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIHUu2eEV0kRvK3dMRlSFwHxVoNxCfwjKmAZBlhkNjC4i bob@example.com";

    fn alice_policy() -> Arc<dyn AuthPolicy> {
        let keys = AuthorizedKeys::new()
            .with_user_key("alice", AuthorizedKey::parse(KEY_ALICE).unwrap());
        Arc::new(Policy::new(PolicyKind::PublicKeyOnly, keys))
    }

    fn blob(key: &str) -> Bytes {
        AuthorizedKey::parse(key).unwrap().key_blob().clone()
    }

    fn host_key() -> PrivateKey {
        PrivateKey::random(
            &mut russh::keys::ssh_key::rand_core::OsRng,
            russh::keys::Algorithm::Ed25519,
        )
        .unwrap()
    }

    #[test]
    fn test_accepted_maps_to_accept() {
        assert!(matches!(to_russh_auth(&AuthVerdict::Accepted), Auth::Accept));
    }

    #[test]
    fn test_rejected_is_not_partial() {
        match to_russh_auth(&AuthVerdict::Rejected) {
            Auth::Reject {
                proceed_with_methods,
                partial_success,
            } => {
                assert!(proceed_with_methods.is_none());
                assert!(!partial_success);
            }
            _ => panic!("expected reject"),
        }
    }

    #[test]
    fn test_partial_advertises_next_methods() {
        let verdict = AuthVerdict::AcceptedPartial(NextMethods::single(AuthMethod::Password));
        match to_russh_auth(&verdict) {
            Auth::Reject {
                proceed_with_methods,
                partial_success,
            } => {
                assert!(partial_success);
                assert!(proceed_with_methods.is_some());
            }
            _ => panic!("expected partial reject"),
        }
    }

    #[test]
    fn test_transport_config() {
        let options = TransportOptions {
            max_auth_attempts: 4,
            rejection_delay: Duration::from_millis(10),
            inactivity_timeout: Some(Duration::from_secs(30)),
            ..TransportOptions::default()
        };
        let transport = RusshTransport::new(host_key(), alice_policy(), &options);
        let config = transport.config();
        assert_eq!(config.keys.len(), 1);
        assert_eq!(config.max_auth_attempts, 4);
        assert_eq!(config.auth_rejection_time, Duration::from_millis(10));
        assert_eq!(config.inactivity_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_default_options_bound_idle_connections() {
        assert!(TransportOptions::default().inactivity_timeout.is_some());
    }

    #[test]
    fn test_only_authorized_keys_may_sign() {
        let policy = alice_policy();
        assert!(offer_acceptable(policy.as_ref(), None, "alice", &blob(KEY_ALICE)));
        assert!(!offer_acceptable(policy.as_ref(), None, "alice", &blob(KEY_BOB)));
        assert!(!offer_acceptable(policy.as_ref(), None, "bob", &blob(KEY_ALICE)));
        assert!(!offer_acceptable(policy.as_ref(), None, "", &blob(KEY_ALICE)));
    }

    #[test]
    fn test_offer_outside_partial_continuation_is_declined() {
        let policy = alice_policy();
        let password_next = (
            AuthVerdict::AcceptedPartial(NextMethods::single(AuthMethod::Password)),
            "alice".to_string(),
        );
        assert!(!offer_acceptable(
            policy.as_ref(),
            Some(&password_next),
            "alice",
            &blob(KEY_ALICE)
        ));

        let key_next = (
            AuthVerdict::AcceptedPartial(NextMethods::single(AuthMethod::PublicKey)),
            "alice".to_string(),
        );
        assert!(offer_acceptable(
            policy.as_ref(),
            Some(&key_next),
            "alice",
            &blob(KEY_ALICE)
        ));
        assert!(!offer_acceptable(
            policy.as_ref(),
            Some(&key_next),
            "bob",
            &blob(KEY_ALICE)
        ));
    }
}
