//! Count, clock and status round trips.
//!
//! With a `public.toml` path argument the demo queries every listed node over
//! WebSocket. Without one it answers its own requests through an in-memory
//! node.

use std::sync::Arc;

use meshwire::catalog::{CLOCK_REQUEST, COUNT_REQUEST, STATUS_REQUEST};
use meshwire::transport::{MemoryConnector, MemoryPeer};
use meshwire::{
    Catalog, ClientConfig, ClockResponse, CountResponse, MeshClient, SchemaRegistry,
    ServerIdentity, Status, StatusResponse, parse_public_toml,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let registry = Arc::new(SchemaRegistry::bundled()?);

    if let Some(path) = std::env::args().nth(1) {
        let roster = parse_public_toml(&std::fs::read_to_string(path)?)?;
        let client = MeshClient::new(Arc::clone(&registry));
        for server in &roster.list {
            let count = client.count(server).await?;
            let clock = client.clock(server, &roster.list).await?;
            println!(
                "{}: served {} requests, clock round {:.3}s over {} children",
                server.address, count.count, clock.time, clock.children
            );
        }
        return Ok(());
    }

    println!("meshwire ping-pong (in-memory node)");
    println!("===================================\n");

    let (connector, mut listener) = MemoryConnector::pair();
    let node = Catalog::new(Arc::clone(&registry));
    tokio::spawn(async move {
        while let Some(peer) = listener.accept().await {
            tokio::spawn(serve(node.clone(), peer));
        }
    });

    let client = MeshClient::with_connector(registry, connector, ClientConfig::default());
    let server = ServerIdentity::new("tcp://127.0.0.1:7002");
    let roster = vec![server.clone(), ServerIdentity::new("tcp://127.0.0.1:7004")];

    for _ in 0..3 {
        let count = client.count(&server).await?;
        println!("count -> {}", count.count);
    }
    let clock = client.clock(&server, &roster).await?;
    println!("clock -> {:.3}s, {} children", clock.time, clock.children);

    let status = client.status(&server).await?;
    for (name, section) in &status.system {
        println!("status[{name}] -> {:?}", section.field);
    }

    println!("\nconnections opened: {}", client.pool().connector().attempts());
    Ok(())
}

/// Answer requests the way a node would, picking the handler by URL path.
async fn serve(catalog: Catalog, mut peer: MemoryPeer) {
    let path = peer.address().to_owned();
    let mut served = 0;
    while let Some(frame) = peer.recv().await {
        served += 1;
        let reply = if path.ends_with(COUNT_REQUEST) {
            catalog.encode_count_response(&CountResponse { count: served })
        } else if path.ends_with(CLOCK_REQUEST) {
            catalog.decode_clock_request(&frame).and_then(|roster| {
                catalog.encode_clock_response(&ClockResponse {
                    time: 0.001,
                    children: i32::try_from(roster.list.len()).unwrap_or(i32::MAX),
                })
            })
        } else if path.ends_with(STATUS_REQUEST) {
            let mut generic = Status::default();
            generic.field.insert("Served".into(), served.to_string());
            catalog.encode_status_response(&StatusResponse {
                system: [("Generic".to_owned(), generic)].into(),
                server: Some(ServerIdentity::new("tcp://127.0.0.1:7002")),
            })
        } else {
            return;
        };

        match reply {
            Ok(reply) => {
                peer.reply(reply);
            }
            Err(err) => {
                eprintln!("node failed to answer {path}: {err}");
                return;
            }
        }
    }
}
