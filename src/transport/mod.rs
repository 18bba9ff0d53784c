//! Pooled request/response transport.
//!
//! [`ConnectionPool`] keeps one connection per address; [`exchange`] sends a
//! frame and resolves with the next reply owed to it. The byte transport is
//! pluggable through [`Connector`]: [`WebSocketConnector`] for real peers,
//! [`MemoryConnector`] for in-process ones.

mod config;
mod connection;
mod connector;
mod error;
mod exchange;
mod memory;
pub mod metrics;
mod pool;
mod websocket;

pub use config::{DEFAULT_MAX_FRAME_SIZE, TransportConfig};
pub use connection::{ConnectionHandle, ConnectionState};
pub use connector::{Channel, Connector, FrameSink, FrameStream};
pub use error::TransportError;
pub use exchange::{dispatch, exchange};
pub use memory::{MemoryConnector, MemoryListener, MemoryPeer};
pub use pool::ConnectionPool;
pub use websocket::WebSocketConnector;
