//! Transport-level error types covering connect, socket, and close failures.

use core::fmt;
use std::time::Duration;

use tokio_tungstenite::tungstenite;

/// Unified error type for connection and exchange failures.
#[derive(Debug, Clone)]
pub enum TransportError {
    /// The connection to `address` could not be established.
    Connect {
        /// Destination that was dialled.
        address: String,
        /// Underlying failure.
        reason: String,
    },
    /// Establishing the connection took longer than the configured bound.
    ConnectTimeout {
        /// Destination that was dialled.
        address: String,
        /// Configured bound.
        after: Duration,
    },
    /// WebSocket protocol or socket failure on an established connection.
    WebSocket(String),
    /// The connection closed before a reply arrived.
    Closed,
    /// The connector refused to open a connection (in-memory peers).
    Refused {
        /// Destination that was refused.
        address: String,
    },
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect { address, reason } => write!(f, "connect to {address} failed: {reason}"),
            Self::ConnectTimeout { address, after } => {
                write!(f, "connect to {address} timed out after {after:?}")
            }
            Self::WebSocket(reason) => write!(f, "websocket error: {reason}"),
            Self::Closed => write!(f, "connection closed before reply"),
            Self::Refused { address } => write!(f, "connection to {address} refused"),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<tungstenite::Error> for TransportError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => Self::Closed,
            other => Self::WebSocket(other.to_string()),
        }
    }
}
