//! End-to-end tests: real nodes talking TCP on loopback.

use std::{sync::Arc, time::Duration};

use tokio::net::TcpListener;
use turnstile_core::{BookingOutcome, CoordinatorState};
use turnstile_proto::ResourceId;
use turnstile_server::{DriverConfig, NodeConfig, PeerTable, Server, TcpNodeDriver};

/// Start `size` nodes on ephemeral ports and return their drivers.
async fn start_cluster(size: u64, hold: Duration) -> Vec<Arc<TcpNodeDriver>> {
    let mut listeners = Vec::new();
    for _ in 0..size {
        listeners.push(TcpListener::bind("127.0.0.1:0").await.unwrap());
    }
    let addresses: Vec<String> =
        listeners.iter().map(|l| l.local_addr().unwrap().to_string()).collect();

    let mut drivers = Vec::new();
    for (id, listener) in (0..size).zip(listeners) {
        let mut peers = PeerTable::new();
        for (peer, address) in (0..size).zip(&addresses) {
            if peer != id {
                peers.insert(peer, address.clone()).unwrap();
            }
        }

        let config = NodeConfig {
            node_id: id,
            listen_address: String::new(),
            peers,
            driver: DriverConfig { hold, ..Default::default() },
        };
        let server = Server::with_listener(listener, config).unwrap();
        drivers.push(server.driver());
        tokio::spawn(server.run());
    }

    drivers
}

#[tokio::test]
async fn single_booking_reaches_every_node() {
    let nodes = start_cluster(3, Duration::ZERO).await;

    let outcome = nodes[1].book("12").await.unwrap();
    assert_eq!(outcome, BookingOutcome::Booked);

    for node in &nodes {
        assert!(node.is_booked(&ResourceId::from("12")).await, "node {}", node.node_id());
    }
}

#[tokio::test]
async fn concurrent_requests_for_same_seat() {
    let nodes = start_cluster(3, Duration::from_millis(50)).await;

    let first = {
        let node = Arc::clone(&nodes[0]);
        tokio::spawn(async move { node.book("A").await })
    };
    let second = {
        let node = Arc::clone(&nodes[2]);
        tokio::spawn(async move { node.book("A").await })
    };

    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();

    let booked = [first, second].iter().filter(|o| o.is_booked()).count();
    assert_eq!(booked, 1, "exactly one node wins seat A");

    for node in &nodes {
        assert!(node.is_booked(&ResourceId::from("A")).await);
    }
}

#[tokio::test]
async fn unreachable_peer_blocks_request() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

    // a peer address nobody listens on
    let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_address = dead.local_addr().unwrap().to_string();
    drop(dead);

    let mut peers = PeerTable::new();
    peers.insert(1, dead_address).unwrap();
    let config =
        NodeConfig { node_id: 0, listen_address: String::new(), peers, driver: DriverConfig::default() };

    let server = Server::with_listener(listener, config).unwrap();
    let node = server.driver();
    tokio::spawn(server.run());

    let attempt = tokio::time::timeout(Duration::from_millis(300), node.book("A")).await;

    assert!(attempt.is_err());
    assert_eq!(node.state().await, CoordinatorState::Requesting);

    node.withdraw().await.unwrap();
    assert_eq!(node.state().await, CoordinatorState::Idle);
}
