//! In-process connector for tests and demos.
//!
//! Every successful `connect` hands a [`MemoryPeer`] to the paired
//! [`MemoryListener`]; the peer sees the frames the client writes and
//! decides what to answer, when, and whether to fail or hang up.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use bytes::Bytes;
use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};
use futures::{SinkExt, StreamExt};
use tracing::trace;

use super::connector::{Channel, Connector};
use super::error::TransportError;

/// Connector whose connections end inside the same process.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    peers: UnboundedSender<MemoryPeer>,
    attempts: AtomicUsize,
    refusing: AtomicBool,
}

/// Accepts the server side of each in-memory connection.
#[derive(Debug)]
pub struct MemoryListener {
    peers: UnboundedReceiver<MemoryPeer>,
}

/// Server side of one in-memory connection.
#[derive(Debug)]
pub struct MemoryPeer {
    address: String,
    inbound: UnboundedReceiver<Bytes>,
    outbound: UnboundedSender<Result<Bytes, TransportError>>,
}

impl MemoryConnector {
    /// New connector and the listener receiving its peers.
    #[must_use]
    pub fn pair() -> (Self, MemoryListener) {
        let (peers, accepted) = unbounded();
        let connector = Self {
            inner: Arc::new(Inner {
                peers,
                attempts: AtomicUsize::new(0),
                refusing: AtomicBool::new(false),
            }),
        };
        (connector, MemoryListener { peers: accepted })
    }

    /// Connect attempts made so far, refused ones included.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.inner.attempts.load(Ordering::Acquire)
    }

    /// Make subsequent connects fail with [`TransportError::Refused`].
    pub fn set_refusing(&self, refusing: bool) {
        self.inner.refusing.store(refusing, Ordering::Release);
    }
}

impl Connector for MemoryConnector {
    async fn connect(&self, address: &str) -> Result<Channel, TransportError> {
        self.inner.attempts.fetch_add(1, Ordering::AcqRel);
        let refused = || TransportError::Refused {
            address: address.to_owned(),
        };
        if self.inner.refusing.load(Ordering::Acquire) {
            return Err(refused());
        }

        let (to_peer, inbound) = unbounded::<Bytes>();
        let (outbound, from_peer) = unbounded::<Result<Bytes, TransportError>>();
        let peer = MemoryPeer {
            address: address.to_owned(),
            inbound,
            outbound,
        };
        // No listener left means nobody would ever answer.
        self.inner.peers.unbounded_send(peer).map_err(|_| refused())?;
        trace!(address, "memory connection established");

        let sink = to_peer.sink_map_err(|_| TransportError::Closed);
        Ok(Channel::new(sink, from_peer))
    }
}

impl MemoryListener {
    /// Next connection opened through the paired connector.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.peers.next().await
    }
}

impl MemoryPeer {
    /// Address the client dialled.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Next frame written by the client; `None` once the client side is gone.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.inbound.next().await
    }

    /// Send `frame` to the client. Returns `false` if the client side is gone.
    pub fn reply(&self, frame: impl Into<Bytes>) -> bool {
        self.outbound.unbounded_send(Ok(frame.into())).is_ok()
    }

    /// Make the client's connection fail with `error`.
    pub fn fail(&self, error: TransportError) {
        let _ = self.outbound.unbounded_send(Err(error));
    }

    /// Hang up; the client sees a clean close.
    pub fn close(self) {
        drop(self);
    }

    /// Answer every frame with `respond` until either side goes away.
    /// A `None` answer leaves that request unanswered.
    pub async fn serve<F>(mut self, mut respond: F)
    where
        F: FnMut(Bytes) -> Option<Bytes>,
    {
        while let Some(frame) = self.recv().await {
            if let Some(reply) = respond(frame) {
                if !self.reply(reply) {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_cross_in_both_directions() {
        let (connector, mut listener) = MemoryConnector::pair();
        let (mut sink, mut stream) = connector.connect("mem://a").await.unwrap().into_parts();
        let mut peer = listener.accept().await.unwrap();
        assert_eq!(peer.address(), "mem://a");

        sink.send(Bytes::from_static(b"ping")).await.unwrap();
        assert_eq!(peer.recv().await.unwrap(), Bytes::from_static(b"ping"));

        assert!(peer.reply(Bytes::from_static(b"pong")));
        assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from_static(b"pong"));

        peer.close();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn refusing_counts_attempts() {
        let (connector, _listener) = MemoryConnector::pair();
        connector.set_refusing(true);
        let err = connector.connect("mem://b").await.unwrap_err();
        assert!(matches!(err, TransportError::Refused { .. }));
        assert_eq!(connector.attempts(), 1);
    }
}
