//! TCP server for the echo service
//!
//! This module owns the listening socket, accepts client connections and spawns
//! one connection handler task per socket.

use crate::error::{Error, Result};
use crate::logging::LogEvent;
use crate::transport::SecureTransport;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::{oneshot, watch};
use tokio::task::AbortHandle;
use tracing::{debug, error, info, trace};

use super::ConnectionHandler;

/// Listening server
///
/// `max_connections` sizes the kernel listen backlog. The accept loop itself never waits
/// on a connection, so a client stalled in the handshake or in authentication only costs
/// its own task.
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    max_connections: usize,
}

impl Server {
    /// Bind `addr` with a listen backlog of `max_connections`
    pub async fn bind(addr: SocketAddr, max_connections: usize) -> Result<Self> {
        let max_connections = max_connections.max(1);
        let bind_err = |source| Error::Bind { addr, source };

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(bind_err)?;
        socket.set_reuseaddr(true).map_err(bind_err)?;
        socket.bind(addr).map_err(bind_err)?;

        let backlog = u32::try_from(max_connections).unwrap_or(u32::MAX);
        let listener = socket.listen(backlog).map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;

        info!(addr = %local_addr, max_connections = max_connections, "Server listening");
        Ok(Self {
            listener,
            local_addr,
            max_connections,
        })
    }

    /// Address actually bound (resolves port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Accept connections until `shutdown_rx` turns true
    ///
    /// Every accepted socket is handed to its own task straight away. Connections still
    /// running when this returns keep running; drain them through the session registry.
    pub async fn run<T: SecureTransport>(
        &self,
        transport: Arc<T>,
        handler: ConnectionHandler,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<()> {
        let audit = Arc::clone(&handler.context().audit);
        audit.record(&LogEvent::server_start(self.local_addr));

        loop {
            let (socket, peer) = tokio::select! {
                biased;

                _ = shutdown_requested(&mut shutdown_rx) => {
                    info!("Received shutdown signal, stopping server");
                    break;
                }

                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                            continue;
                        }
                    }
                }
            };

            trace!(peer = %peer, "Accepted new client connection");
            let transport = Arc::clone(&transport);
            let handler = handler.clone();
            let (abort_tx, abort_rx) = oneshot::channel::<AbortHandle>();

            let task = tokio::spawn(async move {
                let Ok(abort) = abort_rx.await else {
                    return;
                };
                if let Err(e) = handler.handle(transport.as_ref(), socket, peer, abort).await {
                    // Per-connection failures are expected (bad credentials, disconnects)
                    debug!(peer = %peer, error = %e, "Connection handler error");
                }
            });
            let _ = abort_tx.send(task.abort_handle());
        }

        audit.record(&LogEvent::server_stop(self.local_addr));
        Ok(())
    }
}

/// Resolves once shutdown is requested or the sender is gone
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let server = Server::bind("127.0.0.1:0".parse().unwrap(), 3).await.unwrap();
        assert_ne!(server.local_addr().port(), 0);
        assert_eq!(server.max_connections(), 3);
    }

    #[tokio::test]
    async fn test_bind_conflict_is_bind_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        // reuseaddr does not allow two listening sockets on the same port
        match Server::bind(addr, 1).await {
            Err(Error::Bind { addr: failed, .. }) => assert_eq!(failed, addr),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("bind should fail while the port is in use"),
        }
    }

    #[tokio::test]
    async fn test_zero_max_connections_still_serves_one() {
        let server = Server::bind("127.0.0.1:0".parse().unwrap(), 0).await.unwrap();
        assert_eq!(server.max_connections(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_requested_on_sender_drop() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        tokio::time::timeout(Duration::from_millis(100), shutdown_requested(&mut rx))
            .await
            .unwrap();
    }
}
