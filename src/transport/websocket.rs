//! WebSocket connector over `tokio-tungstenite`.
//!
//! Each request or reply is one binary WebSocket message. Text messages are
//! not part of the protocol and are dropped; ping/pong is answered by
//! tungstenite itself.

use bytes::Bytes;
use futures::{SinkExt, StreamExt, future};
use tokio_tungstenite::connect_async_with_config;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tracing::{debug, warn};

use super::config::TransportConfig;
use super::connector::{Channel, Connector};
use super::error::TransportError;

/// Opens `ws://` (and, with a TLS-enabled tungstenite, `wss://`) connections.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    max_frame_size: Option<usize>,
}

impl WebSocketConnector {
    /// Connector honouring the frame size limit in `config`.
    #[must_use]
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            max_frame_size: config.max_frame_size,
        }
    }

    fn websocket_config(&self) -> WebSocketConfig {
        let mut config = WebSocketConfig::default();
        config.max_message_size = self.max_frame_size;
        config.max_frame_size = self.max_frame_size;
        config
    }
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new(&TransportConfig::default())
    }
}

impl Connector for WebSocketConnector {
    async fn connect(&self, address: &str) -> Result<Channel, TransportError> {
        let (socket, response) =
            connect_async_with_config(address, Some(self.websocket_config()), true)
                .await
                .map_err(|err| TransportError::Connect {
                    address: address.to_owned(),
                    reason: err.to_string(),
                })?;
        debug!(address, status = %response.status(), "websocket handshake complete");

        let (write, read) = socket.split();
        let sink = write.sink_map_err(TransportError::from).with(|frame: Bytes| {
            future::ready(Ok::<_, TransportError>(Message::binary(frame.to_vec())))
        });
        let stream = read.filter_map(|message| future::ready(inbound_frame(message)));

        Ok(Channel::new(sink, stream))
    }
}

fn inbound_frame(
    message: Result<Message, tokio_tungstenite::tungstenite::Error>,
) -> Option<Result<Bytes, TransportError>> {
    match message {
        Ok(Message::Binary(data)) => Some(Ok(Bytes::from(data))),
        Ok(Message::Text(text)) => {
            warn!(len = text.len(), "ignoring text message");
            None
        }
        // Close ends the stream right after; ping/pong and raw frames carry no payload for us.
        Ok(_) => None,
        Err(err) => Some(Err(err.into())),
    }
}
