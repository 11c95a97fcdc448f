//! Authorized key material (OpenSSH / authorized_keys format)

use crate::error::{Error, Result};
use bytes::Bytes;
use ssh_key::{HashAlg, PublicKey};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// A single authorized public key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedKey {
    /// SSH wire-format key blob
    key_blob: Bytes,
    /// Comment from the key line (may be empty)
    comment: String,
}

impl AuthorizedKey {
    /// Parse an OpenSSH format key string
    ///
    /// Accepts format: `ssh-ed25519 AAAA... [comment]`
    pub fn parse(key_str: &str) -> Result<Self> {
        let key = PublicKey::from_openssh(key_str.trim())
            .map_err(|e| Error::KeyStore(format!("Invalid public key: {}", e)))?;

        let key_blob = key
            .to_bytes()
            .map_err(|e| Error::KeyStore(format!("Failed to encode key: {}", e)))?;

        Ok(Self {
            key_blob: Bytes::from(key_blob),
            comment: key.comment().to_string(),
        })
    }

    pub fn from_blob(key_blob: Bytes) -> Self {
        Self {
            key_blob,
            comment: String::new(),
        }
    }

    pub fn key_blob(&self) -> &Bytes {
        &self.key_blob
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    pub fn fingerprint(&self) -> Option<String> {
        PublicKey::from_bytes(&self.key_blob)
            .ok()
            .map(|k| k.fingerprint(HashAlg::Sha256).to_string())
    }

    pub fn matches(&self, key_blob: &[u8]) -> bool {
        self.key_blob.as_ref() == key_blob
    }
}

/// Load keys from an authorized_keys style file
///
/// Blank lines and `#` comments are skipped; unparseable lines are logged and skipped.
pub fn load_keyfile(path: &Path) -> Result<Vec<AuthorizedKey>> {
    let content = fs::read_to_string(path).map_err(|e| {
        Error::KeyStore(format!(
            "Failed to read keyfile '{}': {}",
            path.display(),
            e
        ))
    })?;

    let mut keys = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(key_part) = extract_key_part(line) {
            match AuthorizedKey::parse(key_part) {
                Ok(k) => keys.push(k),
                Err(e) => {
                    tracing::warn!("Skipping invalid key in {}: {}", path.display(), e);
                }
            }
        }
    }

    Ok(keys)
}

/// Extract the key part from an authorized_keys line, dropping any options prefix
fn extract_key_part(line: &str) -> Option<&str> {
    let key_prefixes = [
        "ssh-ed25519",
        "ssh-rsa",
        "ssh-dss",
        "ecdsa-sha2-",
        "sk-ssh-ed25519",
        "sk-ecdsa-sha2-",
    ];

    key_prefixes
        .iter()
        .filter_map(|prefix| line.find(prefix))
        .min()
        .map(|pos| &line[pos..])
        .or(Some(line))
}

/// Per-user authorized keys plus keys authorized for every user
#[derive(Debug, Clone, Default)]
pub struct AuthorizedKeys {
    global: Vec<AuthorizedKey>,
    users: HashMap<String, Vec<AuthorizedKey>>,
}

impl AuthorizedKeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Authorize `key` for every username
    pub fn add_global(&mut self, key: AuthorizedKey) {
        self.global.push(key);
    }

    pub fn add_user_key(&mut self, username: impl Into<String>, key: AuthorizedKey) {
        self.users.entry(username.into()).or_default().push(key);
    }

    pub fn with_user_key(mut self, username: impl Into<String>, key: AuthorizedKey) -> Self {
        self.add_user_key(username, key);
        self
    }

    /// Whether any key could authenticate `username`
    pub fn has_keys(&self, username: &str) -> bool {
        !self.global.is_empty() || self.users.get(username).is_some_and(|k| !k.is_empty())
    }

    /// Find the authorized key entry matching `key_blob` for `username`
    pub fn find(&self, username: &str, key_blob: &[u8]) -> Option<&AuthorizedKey> {
        self.users
            .get(username)
            .into_iter()
            .flatten()
            .chain(self.global.iter())
            .find(|k| k.matches(key_blob))
    }

    pub fn is_authorized(&self, username: &str, key_blob: &[u8]) -> bool {
        self.find(username, key_blob).is_some()
    }

    /// Total number of key entries
    pub fn len(&self) -> usize {
        self.global.len() + self.users.values().map(Vec::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
