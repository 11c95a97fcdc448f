//! Process-wide table of live connections

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::{Notify, watch};
use tokio::task::AbortHandle;
use tracing::{trace, warn};

use super::ConnectionState;

/// Handle to a running connection task
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub conn_id: u64,
    pub peer: SocketAddr,
    pub opened_at: Instant,
    state: watch::Receiver<ConnectionState>,
    task: AbortHandle,
}

impl SessionHandle {
    pub fn new(
        conn_id: u64,
        peer: SocketAddr,
        state: watch::Receiver<ConnectionState>,
        task: AbortHandle,
    ) -> Self {
        Self {
            conn_id,
            peer,
            opened_at: Instant::now(),
            state,
            task,
        }
    }

    /// Current state of the connection
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Abort the connection task. Its cleanup guard still unregisters it.
    pub fn abort(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Active connections keyed by remote address
#[derive(Debug, Default)]
pub struct SessionRegistry {
    entries: Mutex<HashMap<SocketAddr, SessionHandle>>,
    emptied: Notify,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SocketAddr, SessionHandle>> {
        // Entries stay consistent even if a holder panicked; every critical section is a
        // single map operation.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a connection. Fails if `peer` already has a live entry.
    pub fn register(&self, handle: SessionHandle) -> Result<()> {
        let mut entries = self.lock();
        if let Some(existing) = entries.get(&handle.peer) {
            if !existing.is_finished() {
                return Err(Error::Registry(format!(
                    "{} is already registered (connection {})",
                    handle.peer, existing.conn_id
                )));
            }
            warn!(peer = %handle.peer, conn_id = existing.conn_id, "Replacing stale registry entry");
        }
        trace!(peer = %handle.peer, conn_id = handle.conn_id, "Registered connection");
        entries.insert(handle.peer, handle);
        Ok(())
    }

    /// Remove the entry for `peer` if it belongs to `conn_id`
    ///
    /// Returns whether an entry was removed.
    pub fn unregister(&self, peer: SocketAddr, conn_id: u64) -> bool {
        let mut entries = self.lock();
        let removed = match entries.get(&peer) {
            Some(handle) if handle.conn_id == conn_id => entries.remove(&peer).is_some(),
            _ => false,
        };
        let empty = entries.is_empty();
        drop(entries);

        if removed {
            trace!(peer = %peer, conn_id = conn_id, "Unregistered connection");
        }
        if empty {
            self.emptied.notify_waiters();
        }
        removed
    }

    pub fn get(&self, peer: &SocketAddr) -> Option<SessionHandle> {
        self.lock().get(peer).cloned()
    }

    pub fn contains(&self, peer: &SocketAddr) -> bool {
        self.lock().contains_key(peer)
    }

    /// Copy of the address-to-handle table taken under one lock
    ///
    /// Membership is fixed at the time of the call; each handle still reports the live state
    /// of its connection and can abort it.
    pub fn snapshot(&self) -> HashMap<SocketAddr, SessionHandle> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Abort every registered connection task
    pub fn abort_all(&self) {
        for handle in self.lock().values() {
            handle.abort();
        }
    }

    /// Wait until no connection is registered
    pub async fn wait_empty(&self) {
        loop {
            let notified = self.emptied.notified();
            tokio::pin!(notified);
            // Register interest before checking so a concurrent unregister is not missed.
            notified.as_mut().enable();
            if self.is_empty() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    /// Spawn a task that stays alive until aborted and build a handle for it
    fn live_handle(conn_id: u64, peer: SocketAddr) -> (SessionHandle, watch::Sender<ConnectionState>) {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Accepted);
        let task = tokio::spawn(std::future::pending::<()>());
        (
            SessionHandle::new(conn_id, peer, state_rx, task.abort_handle()),
            state_tx,
        )
    }

    #[tokio::test]
    async fn test_register_and_unregister() {
        let registry = SessionRegistry::new();
        let (handle, _state) = live_handle(1, addr(4001));

        registry.register(handle).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(&addr(4001)));

        assert!(registry.unregister(addr(4001), 1));
        assert!(registry.is_empty());
        assert!(!registry.unregister(addr(4001), 1));
    }

    #[tokio::test]
    async fn test_duplicate_live_address_rejected() {
        let registry = SessionRegistry::new();
        let (first, _s1) = live_handle(1, addr(4002));
        let (second, _s2) = live_handle(2, addr(4002));

        registry.register(first).unwrap();
        let err = registry.register(second).unwrap_err();
        assert!(matches!(err, Error::Registry(_)));
        assert_eq!(registry.get(&addr(4002)).unwrap().conn_id, 1);
        registry.abort_all();
    }

    #[tokio::test]
    async fn test_unregister_ignores_other_connection_id() {
        let registry = SessionRegistry::new();
        let (handle, _state) = live_handle(5, addr(4003));
        registry.register(handle).unwrap();

        assert!(!registry.unregister(addr(4003), 6));
        assert_eq!(registry.len(), 1);
        assert!(registry.unregister(addr(4003), 5));
    }

    #[tokio::test]
    async fn test_snapshot_reflects_state() {
        let registry = SessionRegistry::new();
        let (h1, s1) = live_handle(1, addr(4004));
        let (h2, _s2) = live_handle(2, addr(4005));
        registry.register(h2).unwrap();
        registry.register(h1).unwrap();

        s1.send(ConnectionState::SessionActive).unwrap();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[&addr(4004)].conn_id, 1);
        assert_eq!(snapshot[&addr(4004)].state(), ConnectionState::SessionActive);
        assert_eq!(snapshot[&addr(4005)].state(), ConnectionState::Accepted);

        // Membership is a copy
        registry.unregister(addr(4004), 1);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(registry.len(), 1);

        // Handles stay live
        snapshot[&addr(4005)].abort();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(registry.get(&addr(4005)).unwrap().is_finished());
        registry.abort_all();
    }

    #[tokio::test]
    async fn test_wait_empty_wakes_after_last_unregister() {
        let registry = Arc::new(SessionRegistry::new());
        let (handle, _state) = live_handle(1, addr(4006));
        registry.register(handle).unwrap();

        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.wait_empty().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        registry.unregister(addr(4006), 1);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("wait_empty should return")
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_empty_returns_immediately_when_empty() {
        let registry = SessionRegistry::new();
        tokio::time::timeout(Duration::from_millis(100), registry.wait_empty())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_register_unregister() {
        let registry = Arc::new(SessionRegistry::new());
        let mut tasks = Vec::new();

        for i in 0..64u16 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                let peer = addr(5000 + i);
                let (state_tx, state_rx) = watch::channel(ConnectionState::Accepted);
                let task = tokio::spawn(std::future::pending::<()>());
                let handle = SessionHandle::new(i as u64, peer, state_rx, task.abort_handle());
                registry.register(handle).unwrap();
                tokio::task::yield_now().await;
                let _ = state_tx.send(ConnectionState::Closed);
                assert!(registry.unregister(peer, i as u64));
                task.abort();
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }
        assert!(registry.is_empty());
    }
}
