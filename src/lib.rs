//! meshwire - protobuf messaging over pooled WebSocket connections
//!
//! This library talks to nodes that exchange protobuf messages over
//! WebSocket: one binary message per request, one per reply. It includes a
//! schema-driven codec, a per-address connection pool, and typed helpers for
//! the node's clock, count and status services.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use meshwire::{MeshClient, SchemaRegistry, ServerIdentity};
//!
//! # async fn run() -> meshwire::Result<()> {
//! let registry = Arc::new(SchemaRegistry::bundled()?);
//! let client = MeshClient::new(registry);
//!
//! let node = ServerIdentity::new("tcp://127.0.0.1:7002");
//! let count = client.count(&node).await?;
//! println!("node served {} requests", count.count);
//! # Ok(())
//! # }
//! ```
//!
//! # Layers
//!
//! - [`protocol`]: schema registry, [`Value`]/[`Record`] and the wire codec.
//!   Pure and synchronous.
//! - [`transport`]: [`ConnectionPool`], [`exchange`] and the [`Connector`]
//!   seam, with WebSocket and in-memory implementations.
//! - [`Catalog`] and [`MeshClient`]: typed requests and responses.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod catalog;
mod client;
pub mod protocol;
pub mod roster;
pub mod transport;

pub use catalog::{Catalog, ClockResponse, CountResponse, Status, StatusResponse};
pub use client::{ClientConfig, DEFAULT_SERVICE, MeshClient};
pub use protocol::{Error, Record, Result, SchemaRegistry, Value, decode, encode};
pub use roster::{Roster, ServerIdentity, parse_public_toml, websocket_url};
pub use transport::{
    ConnectionHandle, ConnectionPool, ConnectionState, Connector, TransportConfig, TransportError,
    dispatch, exchange,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
