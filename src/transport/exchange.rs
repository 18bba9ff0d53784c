//! One request frame out, one reply frame back.

use std::time::Instant;

use bytes::Bytes;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::trace;

use super::connection::{ConnectionHandle, PendingExchange};
use super::error::TransportError;
use super::metrics::Metrics;

/// Send `frame` on `handle` and wait for the reply.
///
/// Replies are matched to requests in the order the requests were written,
/// so concurrent exchanges on one connection each get the frame the peer
/// sent in answer to theirs. Resolves with an error if the connection fails
/// or closes first. There is no reply timeout; wrap the call in
/// [`tokio::time::timeout`] if one is needed.
pub async fn exchange(handle: &ConnectionHandle, frame: Bytes) -> Result<Bytes, TransportError> {
    let _in_flight = handle.track();
    let started = Instant::now();
    let (reply, response) = oneshot::channel();

    handle.submit(PendingExchange { frame, reply }).await?;

    // A dropped sender means the driver went away without resolving us.
    let frame = response.await.unwrap_or(Err(TransportError::Closed))?;
    let elapsed = started.elapsed();
    Metrics::record_exchange(elapsed);
    trace!(address = handle.address(), ?elapsed, len = frame.len(), "exchange complete");
    Ok(frame)
}

/// Callback flavour of [`exchange`].
///
/// Exactly one of `on_reply` and `on_error` runs, once, on a spawned task.
pub fn dispatch<R, E>(handle: &ConnectionHandle, frame: Bytes, on_reply: R, on_error: E) -> JoinHandle<()>
where
    R: FnOnce(Bytes) + Send + 'static,
    E: FnOnce(TransportError) + Send + 'static,
{
    let handle = handle.clone();
    tokio::spawn(async move {
        match exchange(&handle, frame).await {
            Ok(reply) => on_reply(reply),
            Err(err) => on_error(err),
        }
    })
}
