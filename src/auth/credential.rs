//! Authentication methods and presented credentials

use bytes::Bytes;
use ssh_key::{HashAlg, PublicKey};
use std::fmt;

/// Authentication method names as advertised on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AuthMethod {
    None,
    Password,
    PublicKey,
}

impl AuthMethod {
    /// All methods, in advertisement order
    pub const ALL: [AuthMethod; 3] = [AuthMethod::PublicKey, AuthMethod::Password, AuthMethod::None];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::None => "none",
            AuthMethod::Password => "password",
            AuthMethod::PublicKey => "publickey",
        }
    }

    /// Parse a wire method name
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "none" => Some(AuthMethod::None),
            "password" => Some(AuthMethod::Password),
            "publickey" => Some(AuthMethod::PublicKey),
            _ => None,
        }
    }

    fn bit(&self) -> u8 {
        match self {
            AuthMethod::None => 0b001,
            AuthMethod::Password => 0b010,
            AuthMethod::PublicKey => 0b100,
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A set of authentication methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MethodSet(u8);

impl MethodSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn all() -> Self {
        Self::from_methods(AuthMethod::ALL)
    }

    pub fn from_methods<I: IntoIterator<Item = AuthMethod>>(methods: I) -> Self {
        methods.into_iter().fold(Self::empty(), |set, m| set.with(m))
    }

    /// Return a copy of this set that includes `method`
    pub fn with(self, method: AuthMethod) -> Self {
        Self(self.0 | method.bit())
    }

    pub fn contains(&self, method: AuthMethod) -> bool {
        self.0 & method.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn union(self, other: MethodSet) -> Self {
        Self(self.0 | other.0)
    }

    /// Iterate members in advertisement order
    pub fn iter(&self) -> impl Iterator<Item = AuthMethod> + '_ {
        AuthMethod::ALL.into_iter().filter(|m| self.contains(*m))
    }
}

impl fmt::Display for MethodSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(|m| m.as_str()).collect();
        f.write_str(&names.join(","))
    }
}

impl FromIterator<AuthMethod> for MethodSet {
    fn from_iter<I: IntoIterator<Item = AuthMethod>>(iter: I) -> Self {
        Self::from_methods(iter)
    }
}

/// A credential presented in one authentication attempt
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    None,
    Password { value: String },
    PublicKey { key_blob: Bytes },
}

impl Credential {
    /// Build a public key credential from an SSH wire-format key blob
    pub fn public_key(key_blob: impl Into<Bytes>) -> Self {
        Credential::PublicKey {
            key_blob: key_blob.into(),
        }
    }

    pub fn password(value: impl Into<String>) -> Self {
        Credential::Password {
            value: value.into(),
        }
    }

    /// The method this credential authenticates with
    pub fn method(&self) -> AuthMethod {
        match self {
            Credential::None => AuthMethod::None,
            Credential::Password { .. } => AuthMethod::Password,
            Credential::PublicKey { .. } => AuthMethod::PublicKey,
        }
    }

    /// SHA256 fingerprint of the presented key, if this is a parseable public key
    pub fn fingerprint(&self) -> Option<String> {
        match self {
            Credential::PublicKey { key_blob } => PublicKey::from_bytes(key_blob)
                .ok()
                .map(|k| k.fingerprint(HashAlg::Sha256).to_string()),
            _ => None,
        }
    }

    /// Key algorithm name (e.g. "ssh-ed25519"), if this is a parseable public key
    pub fn key_type(&self) -> Option<String> {
        match self {
            Credential::PublicKey { key_blob } => PublicKey::from_bytes(key_blob)
                .ok()
                .map(|k| k.algorithm().as_str().to_string()),
            _ => None,
        }
    }
}

// Password values must never reach logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::None => f.write_str("None"),
            Credential::Password { .. } => f.write_str("Password { value: <redacted> }"),
            Credential::PublicKey { key_blob } => f
                .debug_struct("PublicKey")
                .field("len", &key_blob.len())
                .field("fingerprint", &self.fingerprint())
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ED25519_KEY: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIOMqqnkVzrm0SdG6UOoqKLsabgH5C9okWi0dh2l9GKJl test@example.com";

    fn key_blob() -> Bytes {
        let key = PublicKey::from_openssh(ED25519_KEY).unwrap();
        Bytes::from(key.to_bytes().unwrap())
    }

    #[test]
    fn test_method_names_round_trip() {
        for method in AuthMethod::ALL {
            assert_eq!(AuthMethod::parse(method.as_str()), Some(method));
        }
        assert_eq!(AuthMethod::parse("keyboard-interactive"), None);
    }

    #[test]
    fn test_method_set_membership() {
        let set = MethodSet::empty().with(AuthMethod::PublicKey);
        assert!(set.contains(AuthMethod::PublicKey));
        assert!(!set.contains(AuthMethod::Password));
        assert_eq!(set.len(), 1);
        assert!(MethodSet::empty().is_empty());
        assert_eq!(MethodSet::all().len(), 3);
    }

    #[test]
    fn test_method_set_display_order() {
        let set: MethodSet = [AuthMethod::None, AuthMethod::PublicKey].into_iter().collect();
        assert_eq!(set.to_string(), "publickey,none");
    }

    #[test]
    fn test_credential_method() {
        assert_eq!(Credential::None.method(), AuthMethod::None);
        assert_eq!(Credential::password("x").method(), AuthMethod::Password);
        assert_eq!(Credential::public_key(key_blob()).method(), AuthMethod::PublicKey);
    }

    #[test]
    fn test_public_key_fingerprint() {
        let cred = Credential::public_key(key_blob());
        let fp = cred.fingerprint().unwrap();
        assert!(fp.starts_with("SHA256:"));
        assert_eq!(cred.key_type().as_deref(), Some("ssh-ed25519"));
    }

    #[test]
    fn test_garbage_key_has_no_fingerprint() {
        let cred = Credential::public_key(Bytes::from_static(b"not a key"));
        assert!(cred.fingerprint().is_none());
    }

    #[test]
    fn test_password_is_redacted_in_debug() {
        let cred = Credential::password("hunter2");
        let debug = format!("{:?}", cred);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("redacted"));
    }
}
