//! Address-keyed connection reuse.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tracing::debug;

use super::config::TransportConfig;
use super::connection::ConnectionHandle;
use super::connector::Connector;
use super::error::TransportError;
use super::exchange::exchange;
use super::websocket::WebSocketConnector;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// At most one live connection per address.
///
/// A connection that reached a terminal state is replaced on the next
/// [`acquire`](Self::acquire) for its address; a live one is shared by every
/// caller.
#[derive(Debug)]
pub struct ConnectionPool<C = WebSocketConnector> {
    connector: Arc<C>,
    config: TransportConfig,
    connections: Mutex<HashMap<String, ConnectionHandle>>,
}

impl ConnectionPool<WebSocketConnector> {
    /// Pool of WebSocket connections.
    #[must_use]
    pub fn websocket(config: TransportConfig) -> Self {
        let connector = WebSocketConnector::new(&config);
        Self::with_config(connector, config)
    }
}

impl Default for ConnectionPool<WebSocketConnector> {
    fn default() -> Self {
        Self::websocket(TransportConfig::default())
    }
}

impl<C: Connector> ConnectionPool<C> {
    /// Pool over `connector` with default settings.
    pub fn new(connector: C) -> Self {
        Self::with_config(connector, TransportConfig::default())
    }

    /// Pool over `connector` with explicit settings.
    pub fn with_config(connector: C, config: TransportConfig) -> Self {
        Self {
            connector: Arc::new(connector),
            config,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// The live connection for `address`, opening one if there is none.
    ///
    /// Opening happens in the background, so this never waits; frames sent
    /// before the connection is up are queued. Must be called from within a
    /// Tokio runtime.
    pub fn acquire(&self, address: &str) -> ConnectionHandle {
        let mut connections = self.lock();
        if let Some(existing) = connections.get(address) {
            if !existing.is_terminal() {
                return existing.clone();
            }
            debug!(address, id = existing.id(), state = %existing.state(), "replacing connection");
        }

        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        let handle = ConnectionHandle::open(id, address, Arc::clone(&self.connector), &self.config);
        debug!(address, id, "opening connection");
        connections.insert(address.to_owned(), handle.clone());
        handle
    }

    /// [`acquire`](Self::acquire) followed by [`exchange`].
    pub async fn request(&self, address: &str, frame: Bytes) -> Result<Bytes, TransportError> {
        let handle = self.acquire(address);
        exchange(&handle, frame).await
    }

    /// The tracked connection for `address`, live or not.
    #[must_use]
    pub fn get(&self, address: &str) -> Option<ConnectionHandle> {
        self.lock().get(address).cloned()
    }

    /// Number of tracked addresses.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no address is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Forget connections that reached a terminal state. Returns how many.
    pub fn prune(&self) -> usize {
        let mut connections = self.lock();
        let before = connections.len();
        connections.retain(|_, handle| !handle.is_terminal());
        before - connections.len()
    }

    /// Close every connection and forget them.
    pub fn close_all(&self) {
        let drained: Vec<_> = self.lock().drain().map(|(_, handle)| handle).collect();
        for handle in drained {
            handle.close();
        }
    }

    /// Connector used to open new connections.
    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Settings applied to new connections.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ConnectionHandle>> {
        // Nothing panics while holding the lock, but a poisoned map is still consistent.
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
