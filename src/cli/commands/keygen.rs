//! Keygen command - create a client key pair for `connect` and authorized_keys

use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::cli::args::KeygenArgs;
use crate::keys::{KeyKind, generate_key_pair, write_key_pair};

/// Execute the keygen command
pub async fn execute(args: KeygenArgs) -> Result<()> {
    let path = match args.output {
        Some(path) => path,
        None => default_key_path(args.key_type)?,
    };

    let key = generate_key_pair(args.key_type, &args.comment)?;
    let written = write_key_pair(&key, &path, args.force)?;

    println!("Private key: {}", written.private.display());
    println!("Public key:  {}", written.public.display());
    println!("Fingerprint: {}", written.fingerprint);
    println!();
    println!("Add the public key to the server's authorized_keys or [auth.users] section.");

    Ok(())
}

fn default_key_path(kind: KeyKind) -> Result<PathBuf> {
    let home = dirs::home_dir().context("Cannot determine home directory, use --output")?;
    Ok(home.join(".ssh").join(kind.default_file_name()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_keygen_writes_pair() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("id_test");

        execute(KeygenArgs {
            key_type: KeyKind::Ed25519,
            output: Some(path.clone()),
            comment: "test@example.com".to_string(),
            force: false,
        })
        .await
        .unwrap();

        assert!(path.exists());
        let public = std::fs::read_to_string(dir.path().join("id_test.pub")).unwrap();
        assert!(public.starts_with("ssh-ed25519 "));
        assert!(public.trim_end().ends_with("test@example.com"));
    }

    #[tokio::test]
    async fn test_keygen_refuses_overwrite_without_force() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("id_test");
        std::fs::write(&path, "existing").unwrap();

        let args = KeygenArgs {
            key_type: KeyKind::EcdsaP256,
            output: Some(path.clone()),
            comment: String::new(),
            force: false,
        };
        assert!(execute(args.clone()).await.is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "existing");

        execute(KeygenArgs { force: true, ..args }).await.unwrap();
        assert_ne!(std::fs::read_to_string(&path).unwrap(), "existing");
    }

    #[test]
    fn test_default_key_path_uses_ssh_dir() {
        if let Ok(path) = default_key_path(KeyKind::EcdsaP384) {
            assert!(path.ends_with(".ssh/id_ecdsa"));
        }
    }
}
