use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::future::join_all;
use meshwire::catalog::COUNT_RESPONSE;
use meshwire::transport::{
    Channel, ConnectionPool, ConnectionState, Connector, MemoryConnector, MemoryListener,
    TransportConfig, TransportError, dispatch, exchange,
};
use meshwire::{Catalog, Record, SchemaRegistry};

const ADDRESS: &str = "ws://127.0.0.1:7003/Template/CountRequest";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn memory_pool() -> (ConnectionPool<MemoryConnector>, MemoryListener) {
    init_tracing();
    let (connector, listener) = MemoryConnector::pair();
    (ConnectionPool::new(connector), listener)
}

/// Echo every frame back on every accepted connection.
fn spawn_echo(mut listener: MemoryListener) {
    tokio::spawn(async move {
        while let Some(peer) = listener.accept().await {
            tokio::spawn(peer.serve(Some));
        }
    });
}

#[tokio::test]
async fn sequential_requests_share_one_connection() {
    let (pool, listener) = memory_pool();
    spawn_echo(listener);

    let first = pool.request(ADDRESS, Bytes::from_static(b"one")).await.unwrap();
    let second = pool.request(ADDRESS, Bytes::from_static(b"two")).await.unwrap();

    assert_eq!(first, Bytes::from_static(b"one"));
    assert_eq!(second, Bytes::from_static(b"two"));
    assert_eq!(pool.connector().attempts(), 1);
    assert_eq!(pool.len(), 1);
    assert_eq!(pool.get(ADDRESS).unwrap().state(), ConnectionState::Open);
}

#[tokio::test]
async fn terminal_connection_is_replaced() {
    let (pool, mut listener) = memory_pool();

    let first = pool.acquire(ADDRESS);
    let pending = tokio::spawn({
        let first = first.clone();
        async move { exchange(&first, Bytes::from_static(b"hello")).await }
    });
    let mut peer = listener.accept().await.unwrap();
    assert_eq!(peer.recv().await.unwrap(), Bytes::from_static(b"hello"));
    peer.reply(Bytes::from_static(b"world"));
    assert_eq!(pending.await.unwrap().unwrap(), Bytes::from_static(b"world"));

    peer.close();
    assert_eq!(first.closed().await, ConnectionState::Closed);

    let second = pool.acquire(ADDRESS);
    assert_ne!(first.id(), second.id());
    assert_eq!(pool.get(ADDRESS).unwrap().id(), second.id());
    assert_eq!(pool.len(), 1);

    spawn_echo(listener);
    let reply = exchange(&second, Bytes::from_static(b"again")).await.unwrap();
    assert_eq!(reply, Bytes::from_static(b"again"));
    assert_eq!(pool.connector().attempts(), 2);
}

#[tokio::test]
async fn count_reply_reaches_success_continuation() {
    let (pool, mut listener) = memory_pool();
    let catalog = Catalog::bundled().unwrap();
    let registry = SchemaRegistry::bundled().unwrap();
    let reply = registry
        .encode(COUNT_RESPONSE, &Record::new().with("Count", 4_i32))
        .unwrap();

    tokio::spawn(async move {
        let peer = listener.accept().await.unwrap();
        peer.serve(move |_| Some(reply.clone())).await;
    });

    let received = Arc::new(Mutex::new(Vec::new()));
    let failures = Arc::new(AtomicUsize::new(0));
    let handle = pool.acquire(ADDRESS);
    let task = dispatch(
        &handle,
        catalog.count_request().unwrap(),
        {
            let received = Arc::clone(&received);
            move |frame| received.lock().unwrap().push(frame)
        },
        {
            let failures = Arc::clone(&failures);
            move |_| {
                failures.fetch_add(1, Ordering::SeqCst);
            }
        },
    );
    task.await.unwrap();

    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1);
    let decoded = registry.decode(COUNT_RESPONSE, &received[0]).unwrap();
    assert_eq!(decoded, Record::new().with("Count", 4_i32));
    assert_eq!(catalog.decode_count_response(&received[0]).unwrap().count, 4);
    assert_eq!(failures.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn error_before_reply_fires_failure_once() {
    let (pool, mut listener) = memory_pool();

    tokio::spawn(async move {
        let mut peer = listener.accept().await.unwrap();
        peer.recv().await.unwrap();
        peer.fail(TransportError::WebSocket("connection reset".into()));
        // Keep the peer alive so the error, not a close, ends the connection.
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let successes = Arc::new(AtomicUsize::new(0));
    let failures = Arc::new(Mutex::new(Vec::new()));
    let handle = pool.acquire(ADDRESS);
    dispatch(
        &handle,
        Bytes::new(),
        {
            let successes = Arc::clone(&successes);
            move |_| {
                successes.fetch_add(1, Ordering::SeqCst);
            }
        },
        {
            let failures = Arc::clone(&failures);
            move |err| failures.lock().unwrap().push(err)
        },
    )
    .await
    .unwrap();

    let failures = failures.lock().unwrap();
    assert_eq!(failures.len(), 1);
    assert!(matches!(failures[0], TransportError::WebSocket(_)));
    assert_eq!(successes.load(Ordering::SeqCst), 0);
    assert_eq!(handle.closed().await, ConnectionState::Errored);
}

#[tokio::test]
async fn concurrent_exchanges_resolve_in_send_order() {
    let (pool, mut listener) = memory_pool();
    let handle = pool.acquire(ADDRESS);

    tokio::spawn(async move {
        let mut peer = listener.accept().await.unwrap();
        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(peer.recv().await.unwrap());
        }
        // Answer only once all three are outstanding.
        for frame in seen {
            peer.reply(frame);
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let frames = [
        Bytes::from_static(b"a"),
        Bytes::from_static(b"b"),
        Bytes::from_static(b"c"),
    ];
    let replies = join_all(frames.iter().cloned().map(|frame| {
        let handle = handle.clone();
        async move { exchange(&handle, frame).await }
    }))
    .await;

    for (frame, reply) in frames.iter().zip(replies) {
        assert_eq!(&reply.unwrap(), frame);
    }
    assert_eq!(handle.in_flight(), 0);
}

#[tokio::test]
async fn abandoned_exchange_still_consumes_its_reply() {
    let (pool, mut listener) = memory_pool();
    let handle = pool.acquire(ADDRESS);

    tokio::spawn(async move {
        let mut peer = listener.accept().await.unwrap();
        assert_eq!(peer.recv().await.unwrap(), Bytes::from_static(b"a"));
        assert_eq!(peer.recv().await.unwrap(), Bytes::from_static(b"b"));
        // The reply to "a" arrives after its caller gave up.
        peer.reply(Bytes::from_static(b"reply-a"));
        peer.reply(Bytes::from_static(b"reply-b"));
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        exchange(&handle, Bytes::from_static(b"a")),
    )
    .await;
    assert!(abandoned.is_err(), "first exchange should still be waiting");

    let second = exchange(&handle, Bytes::from_static(b"b")).await.unwrap();
    assert_eq!(second, Bytes::from_static(b"reply-b"));
    assert_eq!(handle.in_flight(), 0);
    assert_eq!(handle.state(), ConnectionState::Open);
}

#[tokio::test]
async fn frames_queue_while_connecting() {
    let (pool, listener) = memory_pool();
    let handle = pool.acquire(ADDRESS);
    assert_eq!(handle.state(), ConnectionState::Connecting);

    let queued = tokio::spawn({
        let handle = handle.clone();
        async move { exchange(&handle, Bytes::from_static(b"early")).await }
    });
    spawn_echo(listener);

    assert_eq!(queued.await.unwrap().unwrap(), Bytes::from_static(b"early"));
    assert_eq!(handle.state(), ConnectionState::Open);
}

#[tokio::test]
async fn refused_connect_fails_exchange_and_is_retried() {
    let (pool, listener) = memory_pool();
    pool.connector().set_refusing(true);

    let err = pool.request(ADDRESS, Bytes::new()).await.unwrap_err();
    assert!(matches!(err, TransportError::Refused { .. }));
    assert_eq!(pool.get(ADDRESS).unwrap().closed().await, ConnectionState::Errored);

    pool.connector().set_refusing(false);
    spawn_echo(listener);
    let reply = pool.request(ADDRESS, Bytes::from_static(b"retry")).await.unwrap();
    assert_eq!(reply, Bytes::from_static(b"retry"));
    assert_eq!(pool.connector().attempts(), 2);
}

#[tokio::test]
async fn close_fails_pending_exchange() {
    let (pool, mut listener) = memory_pool();
    let handle = pool.acquire(ADDRESS);

    let pending = tokio::spawn({
        let handle = handle.clone();
        async move { exchange(&handle, Bytes::from_static(b"unanswered")).await }
    });
    let mut peer = listener.accept().await.unwrap();
    peer.recv().await.unwrap();

    handle.close();
    assert!(handle.is_terminal());
    assert!(matches!(pending.await.unwrap(), Err(TransportError::Closed)));
    assert_eq!(handle.closed().await, ConnectionState::Closed);
    assert!(matches!(
        exchange(&handle, Bytes::new()).await,
        Err(TransportError::Closed)
    ));
}

#[tokio::test]
async fn prune_forgets_terminal_connections() {
    let (pool, _listener) = memory_pool();
    let handle = pool.acquire(ADDRESS);
    pool.acquire("ws://127.0.0.1:7005/Template/CountRequest");
    assert_eq!(pool.len(), 2);

    handle.close();
    handle.closed().await;
    assert_eq!(pool.prune(), 1);
    assert_eq!(pool.len(), 1);

    pool.close_all();
    assert!(pool.is_empty());
}

/// Connector whose connects never finish.
struct Stalled;

impl Connector for Stalled {
    async fn connect(&self, _address: &str) -> Result<Channel, TransportError> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn connect_timeout_fails_exchange() {
    init_tracing();
    let config = TransportConfig {
        connect_timeout: Some(Duration::from_millis(50)),
        ..TransportConfig::default()
    };
    let pool = ConnectionPool::with_config(Stalled, config);

    let err = pool.request(ADDRESS, Bytes::new()).await.unwrap_err();
    assert!(matches!(err, TransportError::ConnectTimeout { .. }));
}
