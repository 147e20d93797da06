//! End-to-end requests against a serving gateway over TCP

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::watch;

use oracle_core::{PricePoint, VenuePrice};
use oracle_node::codec::{PingRequest, PingResponse, GET_LATEST_PRICES, PING};
use oracle_node::{
    Connection, Discovery, FileDiscovery, GatewayState, Keypair, MemoryDiscovery, PublicKey,
    Router, RpcClient, RpcErrorKind, RpcGateway, RpcServer, TransportError,
};
use oracle_node::transport::MAX_FRAME_LEN;
use oracle_store::{IdentityStore, LogStore, TimeSeriesStore};

struct Node {
    _tmp: TempDir,
    gateway: RpcGateway,
    store: TimeSeriesStore,
}

async fn start_node(discovery: Arc<dyn Discovery>) -> Node {
    let tmp = TempDir::new().unwrap();
    let log = Arc::new(LogStore::open(tmp.path().join("node")).unwrap());
    let store = TimeSeriesStore::new(Arc::clone(&log));

    let config = oracle_core::RpcConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        ..Default::default()
    };
    let mut gateway = RpcGateway::new(config, IdentityStore::new(log), store.clone(), discovery);
    gateway.prepare().await.unwrap();
    gateway.serve().await.unwrap();

    Node {
        _tmp: tmp,
        gateway,
        store,
    }
}

fn client(discovery: Arc<dyn Discovery>) -> RpcClient {
    RpcClient::new(discovery, Duration::from_secs(5))
}

#[tokio::test]
async fn test_ping_over_tcp() {
    let discovery: Arc<dyn Discovery> = Arc::new(MemoryDiscovery::new());
    let node = start_node(Arc::clone(&discovery)).await;
    let key = node.gateway.public_key().unwrap();

    assert_eq!(client(discovery).ping(&key, 126).await.unwrap(), 127);
}

#[tokio::test]
async fn test_malformed_request_does_not_stop_serving() {
    let discovery: Arc<dyn Discovery> = Arc::new(MemoryDiscovery::new());
    let node = start_node(Arc::clone(&discovery)).await;
    let key = node.gateway.public_key().unwrap();

    let mut conn = client(discovery).connect(&key).await.unwrap();
    assert_eq!(conn.remote(), key);

    match conn.request(PING, b"{not json").await {
        Err(TransportError::Remote(e)) => assert_eq!(e.kind, RpcErrorKind::MalformedRequest),
        other => panic!("expected a malformed request error, got {:?}", other),
    }
    match conn.request("getEverything", b"{}").await {
        Err(TransportError::Remote(e)) => assert_eq!(e.kind, RpcErrorKind::UnknownMethod),
        other => panic!("expected an unknown method error, got {:?}", other),
    }

    let pong: PingResponse = conn.call(PING, &PingRequest { nonce: 1 }).await.unwrap();
    assert_eq!(pong.nonce, 2);
}

#[tokio::test]
async fn test_negative_nonce_over_tcp() {
    let discovery: Arc<dyn Discovery> = Arc::new(MemoryDiscovery::new());
    let node = start_node(Arc::clone(&discovery)).await;
    let key = node.gateway.public_key().unwrap();

    assert_eq!(client(discovery).ping(&key, -5).await.unwrap(), -4);
}

#[tokio::test]
async fn test_oversized_response_returns_error() {
    let key = Keypair::from_seed(&[9u8; 32]).public_key();
    let mut router = Router::new();
    router.respond("huge", |_| async { Ok(vec![b'x'; MAX_FRAME_LEN + 10]) });
    router.respond("echo", |payload| async move { Ok(payload) });

    let server = RpcServer::bind("127.0.0.1:0", key, router).await.unwrap();
    let address = server.local_addr().unwrap();
    let (_shutdown, rx) = watch::channel(false);
    tokio::spawn(server.run(rx));

    let mut conn = Connection::open(address, key, Duration::from_secs(30)).await.unwrap();
    match conn.request("huge", b"").await {
        Err(TransportError::Remote(e)) => {
            assert_eq!(e.kind, RpcErrorKind::Internal);
            assert!(e.message.contains("exceeds frame limit"));
        }
        other => panic!("expected an internal error, got {:?}", other.map(|b| b.len())),
    }
    assert_eq!(conn.request("echo", b"still open").await.unwrap(), b"still open");
}

#[tokio::test]
async fn test_prices_through_shared_registry() {
    let registry = TempDir::new().unwrap();
    let node_side: Arc<dyn Discovery> = Arc::new(FileDiscovery::new(registry.path()));
    let node = start_node(node_side).await;
    let key = node.gateway.public_key().unwrap();

    for (t, p) in [(100, 10.0), (200, 20.0), (300, 30.0)] {
        let point = PricePoint::from_quotes("btc", vec![VenuePrice::new("Binance", p)], t).unwrap();
        node.store.append(&point).await.unwrap();
    }

    let client_side = client(Arc::new(FileDiscovery::new(registry.path())));
    let pairs = vec!["btc".to_string(), "eth".to_string()];

    let latest = client_side.get_latest_prices(&key, &pairs).await.unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest["btc"].price, 30.0);
    assert_eq!(latest["btc"].venues, vec![VenuePrice::new("Binance", 30.0)]);

    let history = client_side
        .get_historical_prices(&key, &pairs, 150, 300)
        .await
        .unwrap();
    let stamps: Vec<u64> = history["btc"].iter().map(|p| p.timestamp).collect();
    assert_eq!(stamps, vec![200, 300]);
    assert!(history["eth"].is_empty());
}

#[tokio::test]
async fn test_wrong_identity_rejected() {
    let discovery: Arc<dyn Discovery> = Arc::new(MemoryDiscovery::new());
    let node = start_node(Arc::clone(&discovery)).await;
    let address = node.gateway.local_addr().unwrap();

    let impostor = PublicKey::from_bytes([0u8; 32]);
    assert!(matches!(
        Connection::open(address, impostor, Duration::from_secs(5)).await,
        Err(TransportError::IdentityMismatch { .. })
    ));
}

#[tokio::test]
async fn test_closed_gateway_stops_serving() {
    let discovery: Arc<dyn Discovery> = Arc::new(MemoryDiscovery::new());
    let mut node = start_node(Arc::clone(&discovery)).await;
    let key = node.gateway.public_key().unwrap();
    let address = node.gateway.local_addr().unwrap();

    let mut open = client(Arc::clone(&discovery)).connect(&key).await.unwrap();
    open.request(GET_LATEST_PRICES, br#"{"pairs":[]}"#).await.unwrap();

    node.gateway.close().await.unwrap();
    assert_eq!(node.gateway.state(), GatewayState::Closed);

    // No longer announced
    assert!(matches!(
        client(discovery).ping(&key, 1).await,
        Err(TransportError::Discovery(_))
    ));
    // No longer accepting
    assert!(Connection::open(address, key, Duration::from_secs(1)).await.is_err());
    // Connections opened before the close are shut
    assert!(open.request(PING, br#"{"nonce":1}"#).await.is_err());
}
