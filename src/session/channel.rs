//! Echo loop for one session channel

use crate::error::Result;
use crate::transport::SessionChannel;
use std::net::SocketAddr;
use tracing::trace;

/// Counters reported when a channel session ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Bytes received and sent back, excluding the greeting
    pub bytes_echoed: u64,
    /// Number of non-empty receives
    pub chunks: u64,
}

/// One open session channel
pub struct ChannelSession<C> {
    channel: C,
    buffer_size: usize,
    open: bool,
}

impl<C: SessionChannel> ChannelSession<C> {
    pub fn new(channel: C, buffer_size: usize) -> Self {
        Self {
            channel,
            buffer_size: buffer_size.max(1),
            open: true,
        }
    }

    pub fn id(&self) -> u32 {
        self.channel.id()
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Greeting sent once when the session starts
    pub fn greeting(local_addr: SocketAddr) -> String {
        format!("Connected to SSH server on {}\n", local_addr)
    }

    /// Send the greeting, then echo every received chunk until the peer sends EOF
    ///
    /// Receive and send errors are returned as-is; nothing is retried.
    pub async fn run(&mut self, local_addr: SocketAddr) -> Result<SessionStats> {
        let mut stats = SessionStats::default();
        let result = self.echo(local_addr, &mut stats).await;
        self.open = false;
        result.map(|_| stats)
    }

    async fn echo(&mut self, local_addr: SocketAddr, stats: &mut SessionStats) -> Result<()> {
        self.channel
            .send(Self::greeting(local_addr).as_bytes())
            .await?;

        loop {
            let data = self.channel.recv(self.buffer_size).await?;
            if data.is_empty() {
                trace!(channel = self.channel.id(), "EOF from client");
                return Ok(());
            }

            self.channel.send(&data).await?;
            stats.bytes_echoed += data.len() as u64;
            stats.chunks += 1;
        }
    }

    pub fn into_inner(self) -> C {
        self.channel
    }
}
