//! The seam between connection management and the byte transport underneath it.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures::{Sink, Stream};

use super::TransportError;

/// Outbound half of an established connection: one item per frame.
pub type FrameSink = Pin<Box<dyn Sink<Bytes, Error = TransportError> + Send>>;

/// Inbound half of an established connection: one item per frame.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// A full-duplex, message-oriented channel to one peer.
///
/// The stream ending means the peer closed cleanly; an `Err` item means the
/// connection failed.
pub struct Channel {
    sink: FrameSink,
    stream: FrameStream,
}

impl Channel {
    /// Wrap a sink/stream pair
    pub fn new<Si, St>(sink: Si, stream: St) -> Self
    where
        Si: Sink<Bytes, Error = TransportError> + Send + 'static,
        St: Stream<Item = Result<Bytes, TransportError>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }

    /// Split into the outbound and inbound halves
    #[must_use]
    pub fn into_parts(self) -> (FrameSink, FrameStream) {
        (self.sink, self.stream)
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel").finish_non_exhaustive()
    }
}

/// Opens channels to addresses.
///
/// [`ConnectionPool`](super::ConnectionPool) calls this lazily, once per
/// connection it creates.
pub trait Connector: Send + Sync + 'static {
    /// Establish a channel to `address`
    fn connect(&self, address: &str) -> impl Future<Output = Result<Channel, TransportError>> + Send;
}
