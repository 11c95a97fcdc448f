//! Key material: server host key, authorized client keys, client key generation
//!
//! Host keys are handled with `russh::keys` (the types russh presents during key exchange).
//! Authorized keys and generated client keys use `ssh-key` directly.

use crate::auth::{AuthorizedKey, AuthorizedKeys, load_keyfile};
use crate::config::AuthSettings;
use crate::error::{Error, Result};
use russh::keys::PrivateKey as HostKey;
use russh::keys::ssh_key::rand_core::OsRng;
use ssh_key::{Algorithm, EcdsaCurve, HashAlg, LineEnding, PrivateKey};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Load the host key at `path`, generating an Ed25519 key there if it does not exist
pub fn load_or_generate_host_key(path: &Path) -> Result<HostKey> {
    if path.exists() {
        load_host_key(path)
    } else {
        let key = generate_host_key()?;
        save_host_key(&key, path)?;
        info!(
            path = %path.display(),
            fingerprint = %key.public_key().fingerprint(russh::keys::ssh_key::HashAlg::Sha256),
            "Generated new host key"
        );
        Ok(key)
    }
}

/// Load an existing host key (OpenSSH or PKCS#8 PEM)
pub fn load_host_key(path: &Path) -> Result<HostKey> {
    let key = russh::keys::load_secret_key(path, None).map_err(|e| {
        Error::KeyStore(format!(
            "Failed to load host key '{}': {}",
            path.display(),
            e
        ))
    })?;
    debug!(path = %path.display(), algorithm = %key.algorithm(), "Loaded host key");
    Ok(key)
}

fn generate_host_key() -> Result<HostKey> {
    HostKey::random(&mut OsRng, russh::keys::Algorithm::Ed25519)
        .map_err(|e| Error::KeyStore(format!("Ed25519 key generation failed: {}", e)))
}

fn save_host_key(key: &HostKey, path: &Path) -> Result<()> {
    let pem = key
        .to_openssh(russh::keys::ssh_key::LineEnding::LF)
        .map_err(|e| Error::KeyStore(format!("Failed to encode host key: {}", e)))?;
    write_private(path, pem.as_bytes())
}

/// Write secret material with 0600 permissions from the start
fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    ensure_parent(path)?;

    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .map_err(|e| key_io_error("create", path, e))?;
        file.write_all(contents)
            .map_err(|e| key_io_error("write", path, e))?;
    }

    #[cfg(not(unix))]
    {
        std::fs::write(path, contents).map_err(|e| key_io_error("write", path, e))?;
    }

    Ok(())
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)
                .map_err(|e| key_io_error("create directory for", path, e))?;
        }
    }
    Ok(())
}

fn key_io_error(action: &str, path: &Path, e: std::io::Error) -> Error {
    Error::KeyStore(format!("Failed to {} '{}': {}", action, path.display(), e))
}

/// Collect every authorized key named by the `[auth]` settings
///
/// A configured file that cannot be read is an error; individual bad lines inside a file are
/// skipped with a warning. Inline keys must all parse.
pub fn load_authorized_keys(settings: &AuthSettings) -> Result<AuthorizedKeys> {
    let mut keys = AuthorizedKeys::new();

    if let Some(path) = &settings.authorized_keys {
        for key in load_keyfile(path)? {
            keys.add_global(key);
        }
    }

    for (user, sources) in &settings.users {
        for line in &sources.keys {
            let key = AuthorizedKey::parse(line).map_err(|e| {
                Error::KeyStore(format!("Invalid key for user '{}': {}", user, e))
            })?;
            keys.add_user_key(user.clone(), key);
        }
        for path in &sources.key_files {
            let loaded = load_keyfile(path)?;
            if loaded.is_empty() {
                warn!(user = %user, path = %path.display(), "Key file contains no usable keys");
            }
            for key in loaded {
                keys.add_user_key(user.clone(), key);
            }
        }
    }

    debug!(count = keys.len(), "Loaded authorized keys");
    Ok(keys)
}

/// Client key algorithms supported by `keygen`
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum KeyKind {
    Ed25519,
    EcdsaP256,
    EcdsaP384,
    EcdsaP521,
}

impl KeyKind {
    pub fn algorithm(&self) -> Algorithm {
        match self {
            KeyKind::Ed25519 => Algorithm::Ed25519,
            KeyKind::EcdsaP256 => Algorithm::Ecdsa {
                curve: EcdsaCurve::NistP256,
            },
            KeyKind::EcdsaP384 => Algorithm::Ecdsa {
                curve: EcdsaCurve::NistP384,
            },
            KeyKind::EcdsaP521 => Algorithm::Ecdsa {
                curve: EcdsaCurve::NistP521,
            },
        }
    }

    /// Conventional file name under `~/.ssh`
    pub fn default_file_name(&self) -> &'static str {
        match self {
            KeyKind::Ed25519 => "id_ed25519",
            KeyKind::EcdsaP256 | KeyKind::EcdsaP384 | KeyKind::EcdsaP521 => "id_ecdsa",
        }
    }
}

/// Generate a new client key pair
pub fn generate_key_pair(kind: KeyKind, comment: &str) -> Result<PrivateKey> {
    let mut key = PrivateKey::random(&mut rand::rngs::OsRng, kind.algorithm())?;
    key.set_comment(comment);
    Ok(key)
}

/// Paths written by [`write_key_pair`]
#[derive(Debug, Clone)]
pub struct KeyPairPaths {
    pub private: PathBuf,
    pub public: PathBuf,
    pub fingerprint: String,
}

/// Write `key` as an OpenSSH private key at `path` and its public half at `path.pub`
///
/// Existing files are only replaced when `force` is set.
pub fn write_key_pair(key: &PrivateKey, path: &Path, force: bool) -> Result<KeyPairPaths> {
    let public_path = public_key_path(path);
    if !force {
        for existing in [path, public_path.as_path()] {
            if existing.exists() {
                return Err(Error::KeyStore(format!(
                    "'{}' already exists (use --force to overwrite)",
                    existing.display()
                )));
            }
        }
    }

    let private = key.to_openssh(LineEnding::LF)?;
    write_private(path, private.as_bytes())?;

    let public = key.public_key().to_openssh()?;
    std::fs::write(&public_path, format!("{}\n", public))
        .map_err(|e| key_io_error("write", &public_path, e))?;

    Ok(KeyPairPaths {
        private: path.to_path_buf(),
        public: public_path,
        fingerprint: key.public_key().fingerprint(HashAlg::Sha256).to_string(),
    })
}

/// Load a client private key for the `connect` command
pub fn load_client_key(path: &Path) -> Result<HostKey> {
    russh::keys::load_secret_key(path, None).map_err(|e| {
        Error::KeyStore(format!(
            "Failed to load private key '{}': {}",
            path.display(),
            e
        ))
    })
}

fn public_key_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".pub");
    PathBuf::from(name)
}
