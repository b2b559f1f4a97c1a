//! Turmoil-backed peer transport.
//!
//! Same wire behavior as the production TCP channel (one framed message per
//! connection, completion once the receiver has applied it), over turmoil's
//! simulated network so latency, loss and partitions are under test control.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use turmoil::net::{TcpListener, TcpStream};
use turnstile_core::{Environment, MutexCoordinator, PeerChannel, TransportError};
use turnstile_proto::{NodeId, PeerMessage};
use turnstile_server::{DriverConfig, NodeDriver, ServerError, handle_connection, write_message};

use crate::SimEnv;

/// Port every simulated node listens on.
pub const SIM_PORT: u16 = 5000;

/// Turmoil host name of node `id`.
pub fn host_name(id: NodeId) -> String {
    format!("node-{id}")
}

/// Driver type used inside turmoil hosts.
pub type SimNode = NodeDriver<SimPeerChannel, SimEnv>;

/// [`PeerChannel`] over turmoil TCP.
#[derive(Debug, Clone)]
pub struct SimPeerChannel {
    peers: BTreeMap<NodeId, String>,
    connect_timeout: Duration,
}

impl SimPeerChannel {
    /// Channel addressing `peers` by their host names.
    pub fn new(peers: impl IntoIterator<Item = NodeId>) -> Self {
        let peers = peers.into_iter().map(|id| (id, format!("{}:{SIM_PORT}", host_name(id)))).collect();
        Self { peers, connect_timeout: Duration::from_secs(1) }
    }
}

#[async_trait]
impl PeerChannel for SimPeerChannel {
    async fn send(&self, peer: NodeId, message: PeerMessage) -> Result<(), TransportError> {
        let address = self.peers.get(&peer).ok_or(TransportError::NoRoute(peer))?;
        let failed = |reason: String| TransportError::SendFailed { peer, reason };

        let mut stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(address.as_str()))
            .await
            .map_err(|_| failed(format!("connect to {address} timed out")))?
            .map_err(|e| failed(e.to_string()))?;

        write_message(&mut stream, &message).await.map_err(|e| failed(e.to_string()))
    }
}

/// Start node `id` of a `size`-node cluster on the current turmoil host.
///
/// Binds [`SIM_PORT`], spawns the accept loop and returns the driver. Must
/// be called from inside the host's software.
pub async fn start_node(id: NodeId, size: u64, config: DriverConfig) -> Result<Arc<SimNode>, ServerError> {
    let coordinator = MutexCoordinator::new(id, (0..size).filter(|&p| p != id))
        .map_err(|e| ServerError::Config(e.to_string()))?;
    let channel = SimPeerChannel::new(coordinator.peers());
    let node = Arc::new(NodeDriver::new(coordinator, channel, SimEnv::new(), config));

    let listener = TcpListener::bind(format!("0.0.0.0:{SIM_PORT}").as_str()).await?;
    tokio::spawn(serve(listener, Arc::clone(&node)));

    Ok(node)
}

/// Accept loop for a simulated node.
pub async fn serve<E: Environment>(listener: TcpListener, node: Arc<NodeDriver<SimPeerChannel, E>>) {
    loop {
        match listener.accept().await {
            Ok((stream, remote)) => {
                let node = Arc::clone(&node);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, &*node).await {
                        tracing::debug!(node = node.node_id(), %remote, "connection error: {}", e);
                    }
                });
            },
            Err(e) => {
                tracing::warn!(node = node.node_id(), "accept error: {}", e);
                return;
            },
        }
    }
}
