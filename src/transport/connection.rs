//! Per-address connection and the task that drives it.
//!
//! A [`ConnectionHandle`] is a cheap clone around a bounded queue feeding a
//! single driver task. The driver owns the socket: it writes queued frames,
//! reads replies, and hands each reply to the oldest exchange still waiting.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::{Notify, mpsc, oneshot, watch};
use tracing::{Instrument, debug, debug_span, trace, warn};

use super::config::TransportConfig;
use super::connector::{Channel, Connector};
use super::error::TransportError;
use super::metrics::{FrameDirection, Metrics};

pub(crate) type ReplySender = oneshot::Sender<Result<Bytes, TransportError>>;

/// Lifecycle of a pooled connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Connector is still establishing the channel; frames queue meanwhile.
    Connecting,
    /// Channel established.
    Open,
    /// Shutdown requested; the channel is being closed.
    Closing,
    /// Closed by either side.
    Closed,
    /// Connect failed or the channel reported an error.
    Errored,
}

impl ConnectionState {
    /// No further frames will be carried in this state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closing | Self::Closed | Self::Errored)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// A frame on its way out together with the slot its reply goes to.
#[derive(Debug)]
pub(crate) struct PendingExchange {
    pub(crate) frame: Bytes,
    pub(crate) reply: ReplySender,
}

#[derive(Debug)]
pub(crate) struct Shared {
    address: String,
    id: u64,
    state: watch::Sender<ConnectionState>,
    shutdown: Notify,
    in_flight: AtomicUsize,
}

/// Handle to one connection. Clones share the same underlying channel.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    shared: Arc<Shared>,
    outbound: mpsc::Sender<PendingExchange>,
}

impl ConnectionHandle {
    /// Start connecting to `address` in the background.
    ///
    /// Must be called from within a Tokio runtime.
    pub(crate) fn open<C: Connector>(
        id: u64,
        address: &str,
        connector: Arc<C>,
        config: &TransportConfig,
    ) -> Self {
        let (outbound, queued) = mpsc::channel(config.outbound_capacity.max(1));
        let (state, _) = watch::channel(ConnectionState::Connecting);
        let shared = Arc::new(Shared {
            address: address.to_owned(),
            id,
            state,
            shutdown: Notify::new(),
            in_flight: AtomicUsize::new(0),
        });

        let driver = Driver {
            shared: Arc::clone(&shared),
            queued,
            pending: VecDeque::new(),
        };
        let span = debug_span!("connection", id, address = %shared.address);
        tokio::spawn(driver.run(connector, config.connect_timeout).instrument(span));
        Metrics::record_connection_open();

        Self { shared, outbound }
    }

    /// Address this connection was opened for.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.shared.address
    }

    /// Pool-assigned identifier, unique per process.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Whether the connection can no longer carry frames.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Exchanges submitted through this connection and not yet resolved.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    /// Wait until the channel is established.
    ///
    /// Returns `Err(Closed)` if the connection ended first; the specific
    /// connect failure is delivered to queued exchanges instead.
    pub async fn opened(&self) -> Result<(), TransportError> {
        let state = self.wait_for(|state| state == ConnectionState::Open || state.is_terminal()).await;
        if state == ConnectionState::Open {
            Ok(())
        } else {
            Err(TransportError::Closed)
        }
    }

    /// Wait until the connection reaches `Closed` or `Errored`.
    pub async fn closed(&self) -> ConnectionState {
        self.wait_for(|state| matches!(state, ConnectionState::Closed | ConnectionState::Errored))
            .await
    }

    /// Ask the driver to close the channel. Waiting exchanges fail with
    /// [`TransportError::Closed`].
    pub fn close(&self) {
        self.shared.state.send_if_modified(|state| {
            if state.is_terminal() {
                return false;
            }
            *state = ConnectionState::Closing;
            true
        });
        self.shared.shutdown.notify_one();
    }

    async fn wait_for(&self, done: impl Fn(ConnectionState) -> bool) -> ConnectionState {
        let mut states = self.shared.state.subscribe();
        match states.wait_for(|state| done(*state)).await {
            Ok(state) => *state,
            // The sender lives in `Shared`, which this handle keeps alive.
            Err(_) => ConnectionState::Closed,
        }
    }

    pub(crate) async fn submit(&self, exchange: PendingExchange) -> Result<(), TransportError> {
        if self.is_terminal() {
            return Err(TransportError::Closed);
        }
        self.outbound
            .send(exchange)
            .await
            .map_err(|_| TransportError::Closed)
    }

    pub(crate) fn track(&self) -> InFlight {
        self.shared.in_flight.fetch_add(1, Ordering::AcqRel);
        InFlight {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Decrements the in-flight count when the exchange resolves or is abandoned.
pub(crate) struct InFlight {
    shared: Arc<Shared>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.shared.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

struct Driver {
    shared: Arc<Shared>,
    queued: mpsc::Receiver<PendingExchange>,
    /// Exchanges whose frame has been written, oldest first.
    pending: VecDeque<ReplySender>,
}

impl Driver {
    async fn run<C: Connector>(mut self, connector: Arc<C>, connect_timeout: Option<Duration>) {
        let connected = tokio::select! {
            result = connect(connector.as_ref(), &self.shared.address, connect_timeout) => result,
            () = self.shared.shutdown.notified() => Err(TransportError::Closed),
        };

        let (state, error) = match connected {
            Ok(channel) => {
                self.set_state(ConnectionState::Open);
                debug!("connection open");
                self.pump(channel).await
            }
            Err(TransportError::Closed) => (ConnectionState::Closed, TransportError::Closed),
            Err(err) => (ConnectionState::Errored, err),
        };

        if state == ConnectionState::Errored {
            Metrics::record_error();
            warn!(error = %error, pending = self.pending.len(), "connection failed");
        } else {
            debug!(pending = self.pending.len(), "connection closed");
        }
        self.set_state(state);
        self.fail_all(&error);
        Metrics::record_connection_close();
    }

    async fn pump(&mut self, channel: Channel) -> (ConnectionState, TransportError) {
        let (mut sink, mut stream) = channel.into_parts();

        loop {
            tokio::select! {
                () = self.shared.shutdown.notified() => {
                    self.set_state(ConnectionState::Closing);
                    if let Err(err) = sink.close().await {
                        debug!(error = %err, "close handshake failed");
                    }
                    return (ConnectionState::Closed, TransportError::Closed);
                }
                next = self.queued.recv() => {
                    let Some(PendingExchange { frame, reply }) = next else {
                        // Every handle is gone; nobody can submit or wait any more.
                        self.set_state(ConnectionState::Closing);
                        let _ = sink.close().await;
                        return (ConnectionState::Closed, TransportError::Closed);
                    };
                    trace!(len = frame.len(), "sending frame");
                    if let Err(err) = sink.send(frame).await {
                        let _ = reply.send(Err(err.clone()));
                        return (ConnectionState::Errored, err);
                    }
                    Metrics::record_frame(FrameDirection::Sent);
                    self.pending.push_back(reply);
                }
                incoming = stream.next() => match incoming {
                    Some(Ok(frame)) => self.deliver(frame),
                    Some(Err(err)) => return (ConnectionState::Errored, err),
                    None => return (ConnectionState::Closed, TransportError::Closed),
                },
            }
        }
    }

    fn deliver(&mut self, frame: Bytes) {
        let Some(reply) = self.pending.pop_front() else {
            Metrics::record_frame(FrameDirection::Unsolicited);
            warn!(len = frame.len(), "dropping frame with no exchange waiting");
            return;
        };
        Metrics::record_frame(FrameDirection::Received);
        if reply.send(Ok(frame)).is_err() {
            debug!("exchange abandoned before its reply arrived");
        }
    }

    fn fail_all(&mut self, error: &TransportError) {
        for reply in self.pending.drain(..) {
            let _ = reply.send(Err(error.clone()));
        }
        self.queued.close();
        while let Ok(PendingExchange { reply, .. }) = self.queued.try_recv() {
            let _ = reply.send(Err(error.clone()));
        }
    }

    /// Terminal states are never left for a live one.
    fn set_state(&self, next: ConnectionState) {
        self.shared.state.send_if_modified(|current| {
            if *current == next || (current.is_terminal() && !next.is_terminal()) {
                return false;
            }
            *current = next;
            true
        });
    }
}

async fn connect<C: Connector>(
    connector: &C,
    address: &str,
    connect_timeout: Option<Duration>,
) -> Result<Channel, TransportError> {
    let Some(after) = connect_timeout else {
        return connector.connect(address).await;
    };
    match tokio::time::timeout(after, connector.connect(address)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::ConnectTimeout {
            address: address.to_owned(),
            after,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!ConnectionState::Connecting.is_terminal());
        assert!(!ConnectionState::Open.is_terminal());
        assert!(ConnectionState::Closing.is_terminal());
        assert!(ConnectionState::Closed.is_terminal());
        assert!(ConnectionState::Errored.is_terminal());
    }

    #[test]
    fn state_display() {
        assert_eq!(ConnectionState::Errored.to_string(), "errored");
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
    }
}
