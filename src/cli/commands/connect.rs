//! Connect command - interactive line client for an echo server
//!
//! Authenticates with a private key, opens a session channel, sends every input line and
//! prints whatever the server sends back. [`run_session`] does the work over any reader and
//! writer; the command wires it to stdin and stdout.

use anyhow::{Context, Result, bail};
use russh::keys::{PrivateKey, PrivateKeyWithHashAlg};
use russh::keys::ssh_key::HashAlg;
use russh::{ChannelMsg, Disconnect};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info};

use crate::cli::args::ConnectArgs;
use crate::keys::load_client_key;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client callbacks; the server host key is logged and accepted
struct EchoClient;

impl russh::client::Handler for EchoClient {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        info!(
            algorithm = %server_public_key.algorithm(),
            fingerprint = %server_public_key.fingerprint(HashAlg::Sha256),
            "Server host key"
        );
        Ok(true)
    }
}

/// Execute the connect command
pub async fn execute(args: ConnectArgs) -> Result<()> {
    let user = args
        .user
        .clone()
        .filter(|u| !u.is_empty())
        .context("No username given. Use --user or set USER")?;
    let key = load_client_key(&args.identity)?;
    let addr = format!("{}:{}", args.address, args.port);

    let stdin = BufReader::new(tokio::io::stdin());
    run_session(&addr, &user, key, stdin, tokio::io::stdout())
        .await
        .with_context(|| format!("Session with {} using {}", addr, args.identity.display()))
}

/// Log in to `addr` as `user` and relay `input` line by line
///
/// Everything the server sends on the session channel is copied to `output`. Returns once
/// the server closes the channel, which it does after echoing the EOF that follows `input`.
pub async fn run_session<R, W>(
    addr: &str,
    user: &str,
    key: PrivateKey,
    input: R,
    mut output: W,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let config = Arc::new(russh::client::Config::default());
    let mut handle =
        tokio::time::timeout(CONNECT_TIMEOUT, russh::client::connect(config, addr, EchoClient))
            .await
            .with_context(|| format!("Timed out connecting to {}", addr))?
            .with_context(|| format!("Failed to connect to {}", addr))?;

    let fingerprint = key.public_key().fingerprint(HashAlg::Sha256);
    let auth = handle
        .authenticate_publickey(user, PrivateKeyWithHashAlg::new(Arc::new(key), None))
        .await
        .context("Authentication failed")?;
    if !auth.success() {
        bail!("Server rejected key {} for user '{}'", fingerprint, user);
    }
    info!(user = %user, server = %addr, "Authenticated");

    let mut channel = handle
        .channel_open_session()
        .await
        .context("Failed to open session channel")?;
    channel
        .request_shell(true)
        .await
        .context("Shell request failed")?;

    let mut lines = input.lines();
    let mut input_open = true;

    loop {
        tokio::select! {
            line = lines.next_line(), if input_open => {
                match line.context("Failed to read input")? {
                    Some(line) => {
                        let payload = format!("{}\n", line);
                        channel
                            .data(payload.as_bytes())
                            .await
                            .context("Failed to send data")?;
                    }
                    None => {
                        // Server ends the session once it sees EOF
                        input_open = false;
                        channel.eof().await.context("Failed to send EOF")?;
                    }
                }
            }

            msg = channel.wait() => {
                match msg {
                    Some(ChannelMsg::Data { data }) => {
                        output.write_all(&data).await?;
                        output.flush().await?;
                    }
                    Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => break,
                    Some(other) => debug!(msg = ?other, "Channel message"),
                }
            }
        }
    }

    let _ = handle
        .disconnect(Disconnect::ByApplication, "", "en")
        .await;
    Ok(())
}
