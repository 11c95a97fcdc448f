//! Authentication policies
//!
//! A policy is pure decision logic: it never touches the network and never performs
//! signature verification (the transport verifies signatures for keys the policy accepts).

use bytes::Bytes;

use super::credential::{AuthMethod, Credential, MethodSet};
use super::keyfile::AuthorizedKeys;
use super::verdict::AuthVerdict;

/// Pluggable authentication decision logic
pub trait AuthPolicy: Send + Sync {
    /// Decide one attempt. `prior` is the verdict of the previous attempt on this connection,
    /// if any. Must be deterministic for identical inputs.
    fn decide(
        &self,
        username: &str,
        credential: &Credential,
        prior: Option<&AuthVerdict>,
    ) -> AuthVerdict;

    /// Whether a public key offered for `username` would be accepted once the client proves
    /// it holds the private half. Asked before the signature exists; must have no side effects.
    fn accepts_key(&self, username: &str, key_blob: &[u8], prior: Option<&AuthVerdict>) -> bool {
        let credential = Credential::public_key(Bytes::copy_from_slice(key_blob));
        self.decide(username, &credential, prior) != AuthVerdict::Rejected
    }

    /// Methods that `decide` can accept for `username`
    fn allowed_auth_methods(&self, username: &str) -> MethodSet;

    /// Methods advertised before a username is known
    fn advertised_methods(&self) -> MethodSet;

    /// Policy name for logs
    fn name(&self) -> &'static str;
}

/// Built-in policy selector as written in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyKind {
    /// `publickey`
    PublicKeyOnly,
    /// `insecure-open`
    OpenAuth,
    /// `deny`
    Denied,
}

impl PolicyKind {
    pub const PUBLIC_KEY: &'static str = "publickey";
    pub const INSECURE_OPEN: &'static str = "insecure-open";
    pub const DENY: &'static str = "deny";

    /// Parse a configured policy name
    ///
    /// Unrecognized names resolve to [`PolicyKind::Denied`].
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            Self::PUBLIC_KEY => PolicyKind::PublicKeyOnly,
            Self::INSECURE_OPEN => PolicyKind::OpenAuth,
            Self::DENY => PolicyKind::Denied,
            other => {
                tracing::warn!(
                    policy = %other,
                    "Unrecognized auth policy, falling back to deny"
                );
                PolicyKind::Denied
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyKind::PublicKeyOnly => Self::PUBLIC_KEY,
            PolicyKind::OpenAuth => Self::INSECURE_OPEN,
            PolicyKind::Denied => Self::DENY,
        }
    }

    pub fn is_insecure(&self) -> bool {
        matches!(self, PolicyKind::OpenAuth)
    }
}

impl std::fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The built-in policies
#[derive(Debug, Clone)]
pub enum Policy {
    /// Accept only public keys authorized for the user
    PublicKeyOnly(AuthorizedKeys),
    /// Accept anything. Test and demo configurations only.
    OpenAuth,
    /// Reject everything
    Denied,
}

impl Policy {
    pub fn new(kind: PolicyKind, keys: AuthorizedKeys) -> Self {
        match kind {
            PolicyKind::PublicKeyOnly => Policy::PublicKeyOnly(keys),
            PolicyKind::OpenAuth => Policy::OpenAuth,
            PolicyKind::Denied => Policy::Denied,
        }
    }

    pub fn kind(&self) -> PolicyKind {
        match self {
            Policy::PublicKeyOnly(_) => PolicyKind::PublicKeyOnly,
            Policy::OpenAuth => PolicyKind::OpenAuth,
            Policy::Denied => PolicyKind::Denied,
        }
    }
}

impl AuthPolicy for Policy {
    fn decide(
        &self,
        username: &str,
        credential: &Credential,
        _prior: Option<&AuthVerdict>,
    ) -> AuthVerdict {
        if username.is_empty() {
            return AuthVerdict::Rejected;
        }

        match (self, credential) {
            (Policy::PublicKeyOnly(keys), Credential::PublicKey { key_blob }) => {
                if keys.is_authorized(username, key_blob) {
                    AuthVerdict::Accepted
                } else {
                    AuthVerdict::Rejected
                }
            }
            (Policy::PublicKeyOnly(_), _) => AuthVerdict::Rejected,
            (Policy::OpenAuth, _) => {
                tracing::warn!(
                    user = %username,
                    method = %credential.method(),
                    "insecure-open policy accepted credential without verification"
                );
                AuthVerdict::Accepted
            }
            (Policy::Denied, _) => AuthVerdict::Rejected,
        }
    }

    fn accepts_key(&self, username: &str, key_blob: &[u8], _prior: Option<&AuthVerdict>) -> bool {
        if username.is_empty() {
            return false;
        }
        match self {
            Policy::PublicKeyOnly(keys) => keys.is_authorized(username, key_blob),
            Policy::OpenAuth => true,
            Policy::Denied => false,
        }
    }

    fn allowed_auth_methods(&self, username: &str) -> MethodSet {
        match self {
            Policy::PublicKeyOnly(keys) if keys.has_keys(username) => {
                MethodSet::empty().with(AuthMethod::PublicKey)
            }
            Policy::PublicKeyOnly(_) => MethodSet::empty(),
            Policy::OpenAuth => MethodSet::all(),
            Policy::Denied => MethodSet::empty(),
        }
    }

    fn advertised_methods(&self) -> MethodSet {
        match self {
            Policy::PublicKeyOnly(_) => MethodSet::empty().with(AuthMethod::PublicKey),
            Policy::OpenAuth => MethodSet::all(),
            Policy::Denied => MethodSet::empty(),
        }
    }

    fn name(&self) -> &'static str {
        self.kind().as_str()
    }
}
