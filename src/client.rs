//! Catalog plus pool: encode, exchange, decode in one call.

use std::sync::Arc;

use bytes::Bytes;
use tracing::instrument;

use crate::catalog::{
    CLOCK_REQUEST, COUNT_REQUEST, Catalog, ClockResponse, CountResponse, STATUS_REQUEST,
    StatusResponse,
};
use crate::protocol::{Result, SchemaRegistry};
use crate::roster::{ServerIdentity, websocket_url};
use crate::transport::{ConnectionPool, Connector, TransportConfig, WebSocketConnector};

/// Service name nodes register the catalog's handlers under.
pub const DEFAULT_SERVICE: &str = "Template";

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// First path segment of every request URL.
    pub service: String,
    /// Settings for the connections the client opens.
    pub transport: TransportConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            service: DEFAULT_SERVICE.to_owned(),
            transport: TransportConfig::default(),
        }
    }
}

/// Typed client for a set of nodes.
///
/// Requests to the same node and message share one pooled connection.
#[derive(Debug)]
pub struct MeshClient<C = WebSocketConnector> {
    catalog: Catalog,
    pool: ConnectionPool<C>,
    service: String,
}

impl MeshClient<WebSocketConnector> {
    /// WebSocket client with default settings.
    #[must_use]
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self::with_config(registry, ClientConfig::default())
    }

    /// WebSocket client with explicit settings.
    #[must_use]
    pub fn with_config(registry: Arc<SchemaRegistry>, config: ClientConfig) -> Self {
        let connector = WebSocketConnector::new(&config.transport);
        Self::with_connector(registry, connector, config)
    }
}

impl<C: Connector> MeshClient<C> {
    /// Client over an arbitrary connector.
    pub fn with_connector(registry: Arc<SchemaRegistry>, connector: C, config: ClientConfig) -> Self {
        Self {
            catalog: Catalog::new(registry),
            pool: ConnectionPool::with_config(connector, config.transport),
            service: config.service,
        }
    }

    /// Builders and parsers used by this client.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Connections opened by this client.
    pub fn pool(&self) -> &ConnectionPool<C> {
        &self.pool
    }

    /// URL a `message` request to `server` is sent to.
    pub fn endpoint(&self, server: &ServerIdentity, message: &str) -> Result<String> {
        websocket_url(server, &format!("/{}/{message}", self.service))
    }

    /// Ping `server`, asking it to reach every member of `roster`.
    #[instrument(level = "debug", skip_all, fields(address = %server.address, peers = roster.len()))]
    pub async fn clock(&self, server: &ServerIdentity, roster: &[ServerIdentity]) -> Result<ClockResponse> {
        let frame = self.catalog.clock_request(roster)?;
        let reply = self.call(server, CLOCK_REQUEST, frame).await?;
        self.catalog.decode_clock_response(&reply)
    }

    /// Number of requests `server` has served.
    #[instrument(level = "debug", skip_all, fields(address = %server.address))]
    pub async fn count(&self, server: &ServerIdentity) -> Result<CountResponse> {
        let frame = self.catalog.count_request()?;
        let reply = self.call(server, COUNT_REQUEST, frame).await?;
        self.catalog.decode_count_response(&reply)
    }

    /// Status report of `server`.
    #[instrument(level = "debug", skip_all, fields(address = %server.address))]
    pub async fn status(&self, server: &ServerIdentity) -> Result<StatusResponse> {
        let frame = self.catalog.status_request()?;
        let reply = self.call(server, STATUS_REQUEST, frame).await?;
        self.catalog.decode_status_response(&reply)
    }

    async fn call(&self, server: &ServerIdentity, message: &str, frame: Bytes) -> Result<Bytes> {
        let address = self.endpoint(server, message)?;
        Ok(self.pool.request(&address, frame).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::COUNT_RESPONSE;
    use crate::protocol::Record;
    use crate::transport::MemoryConnector;

    fn memory_client() -> (MeshClient<MemoryConnector>, crate::transport::MemoryListener) {
        let registry = Arc::new(SchemaRegistry::bundled().unwrap());
        let (connector, listener) = MemoryConnector::pair();
        let client = MeshClient::with_connector(registry, connector, ClientConfig::default());
        (client, listener)
    }

    #[test]
    fn endpoint_uses_service_and_message() {
        let (client, _listener) = memory_client();
        let server = ServerIdentity::new("tcp://127.0.0.1:7002");
        assert_eq!(
            client.endpoint(&server, COUNT_REQUEST).unwrap(),
            "ws://127.0.0.1:7003/Template/CountRequest"
        );
    }

    #[tokio::test]
    async fn count_over_memory_peer() {
        let (client, mut listener) = memory_client();
        let registry = SchemaRegistry::bundled().unwrap();
        let reply = registry
            .encode(COUNT_RESPONSE, &Record::new().with("Count", 4_i32))
            .unwrap();

        tokio::spawn(async move {
            let peer = listener.accept().await.unwrap();
            assert_eq!(peer.address(), "ws://127.0.0.1:7003/Template/CountRequest");
            peer.serve(move |frame| {
                assert!(frame.is_empty());
                Some(reply.clone())
            })
            .await;
        });

        let server = ServerIdentity::new("tcp://127.0.0.1:7002");
        assert_eq!(client.count(&server).await.unwrap().count, 4);
        assert_eq!(client.count(&server).await.unwrap().count, 4);
        assert_eq!(client.pool().connector().attempts(), 1);
    }

    #[tokio::test]
    async fn bad_address_fails_before_connecting() {
        let (client, _listener) = memory_client();
        let err = client.count(&ServerIdentity::new("udp://x:1")).await.unwrap_err();
        assert!(matches!(err, crate::Error::InvalidAddress { .. }));
        assert!(client.pool().is_empty());
    }
}
