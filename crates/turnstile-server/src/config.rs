//! Static cluster configuration.
//!
//! Membership is fixed at startup. Peers are given explicitly as
//! `<id>=<host:port>` entries, or derived for a local cluster of `n` nodes
//! where node `i` listens on `base_port + i`.

use std::collections::BTreeMap;

use turnstile_core::{CoordinatorError, MutexCoordinator};
use turnstile_proto::NodeId;

use crate::{DriverConfig, ServerError};

/// First port of a local cluster.
pub const DEFAULT_BASE_PORT: u16 = 5000;

/// Map from peer id to `host:port`. Never contains the local node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerTable {
    peers: BTreeMap<NodeId, String>,
}

impl PeerTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Table for a local cluster of `nodes` nodes, seen from `local`.
    pub fn localhost(nodes: u64, base_port: u16, local: NodeId) -> Result<Self, ServerError> {
        if local >= nodes {
            return Err(ServerError::Config(format!(
                "node id {local} outside cluster of {nodes} nodes"
            )));
        }

        let mut table = Self::new();
        for id in (0..nodes).filter(|&id| id != local) {
            table.insert(id, format!("localhost:{}", port_for(base_port, id)?))?;
        }
        Ok(table)
    }

    /// Build a table from `<id>=<host:port>` entries, rejecting `local`.
    pub fn from_entries<'a>(
        entries: impl IntoIterator<Item = &'a str>,
        local: NodeId,
    ) -> Result<Self, ServerError> {
        let mut table = Self::new();
        for entry in entries {
            let (id, address) = parse_entry(entry)?;
            if id == local {
                return Err(ServerError::Config(format!("peer entry '{entry}' names this node")));
            }
            table.insert(id, address)?;
        }
        Ok(table)
    }

    /// Add a peer. Each id may appear once.
    pub fn insert(&mut self, id: NodeId, address: impl Into<String>) -> Result<(), ServerError> {
        if self.peers.contains_key(&id) {
            return Err(ServerError::Config(format!("peer {id} listed twice")));
        }
        self.peers.insert(id, address.into());
        Ok(())
    }

    /// Address of `id`.
    pub fn address(&self, id: NodeId) -> Option<&str> {
        self.peers.get(&id).map(String::as_str)
    }

    /// Peer ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.peers.keys().copied()
    }

    /// Number of peers.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// True if the node runs alone.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

/// Parse one `<id>=<host:port>` entry.
pub fn parse_entry(entry: &str) -> Result<(NodeId, String), ServerError> {
    let (id, address) = entry
        .split_once('=')
        .ok_or_else(|| ServerError::Config(format!("expected <id>=<host:port>, got '{entry}'")))?;

    let id = id
        .trim()
        .parse::<NodeId>()
        .map_err(|e| ServerError::Config(format!("bad node id in '{entry}': {e}")))?;

    let address = address.trim();
    if address.is_empty() {
        return Err(ServerError::Config(format!("missing address in '{entry}'")));
    }

    Ok((id, address.to_string()))
}

fn port_for(base_port: u16, id: NodeId) -> Result<u16, ServerError> {
    u16::try_from(id)
        .ok()
        .and_then(|offset| base_port.checked_add(offset))
        .ok_or_else(|| ServerError::Config(format!("port for node {id} overflows base {base_port}")))
}

/// Everything needed to start one node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// This node's id.
    pub node_id: NodeId,
    /// Address to accept peer connections on (e.g., "0.0.0.0:5000")
    pub listen_address: String,
    /// The other members of the cluster.
    pub peers: PeerTable,
    /// Driver configuration (hold time, send policy)
    pub driver: DriverConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: 0,
            listen_address: format!("0.0.0.0:{DEFAULT_BASE_PORT}"),
            peers: PeerTable::new(),
            driver: DriverConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Node `node_id` of a local cluster of `nodes` nodes.
    pub fn localhost_cluster(
        node_id: NodeId,
        nodes: u64,
        base_port: u16,
    ) -> Result<Self, ServerError> {
        let peers = PeerTable::localhost(nodes, base_port, node_id)?;
        let listen_address = format!("0.0.0.0:{}", port_for(base_port, node_id)?);
        Ok(Self { node_id, listen_address, peers, driver: DriverConfig::default() })
    }

    /// Coordinator for this membership.
    pub fn coordinator(&self) -> Result<MutexCoordinator, CoordinatorError> {
        MutexCoordinator::new(self.node_id, self.peers.ids())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn localhost_cluster_skips_self() {
        let config = NodeConfig::localhost_cluster(1, 3, 5000).unwrap();

        assert_eq!(config.listen_address, "0.0.0.0:5001");
        assert_eq!(config.peers.ids().collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(config.peers.address(0), Some("localhost:5000"));
        assert_eq!(config.peers.address(2), Some("localhost:5002"));
        assert_eq!(config.peers.address(1), None);
    }

    #[test]
    fn node_outside_cluster_is_rejected() {
        assert!(matches!(PeerTable::localhost(3, 5000, 3), Err(ServerError::Config(_))));
    }

    #[test]
    fn port_overflow_is_rejected() {
        assert!(matches!(PeerTable::localhost(3, u16::MAX - 1, 0), Err(ServerError::Config(_))));
    }

    #[test]
    fn parses_peer_entries() {
        let table =
            PeerTable::from_entries(["0=10.0.0.1:7000", "2 = node-2:7000"], 1).unwrap();
        assert_eq!(table.address(0), Some("10.0.0.1:7000"));
        assert_eq!(table.address(2), Some("node-2:7000"));
    }

    #[test]
    fn rejects_malformed_entries() {
        assert!(parse_entry("10.0.0.1:7000").is_err());
        assert!(parse_entry("x=host:1").is_err());
        assert!(parse_entry("3=").is_err());
    }

    #[test]
    fn rejects_self_and_duplicates() {
        assert!(PeerTable::from_entries(["1=a:1"], 1).is_err());
        assert!(PeerTable::from_entries(["2=a:1", "2=b:1"], 1).is_err());
    }

    #[test]
    fn coordinator_uses_table_membership() {
        let config = NodeConfig::localhost_cluster(2, 4, 6000).unwrap();
        let coordinator = config.coordinator().unwrap();
        assert_eq!(coordinator.peers().collect::<Vec<_>>(), vec![0, 1, 3]);
    }

    proptest! {
        #[test]
        fn entry_parsing_round_trips(id in any::<u64>(), port in any::<u16>()) {
            let entry = format!("{id}=host:{port}");
            let (parsed_id, address) = parse_entry(&entry).unwrap();
            prop_assert_eq!(parsed_id, id);
            prop_assert_eq!(address, format!("host:{port}"));
        }
    }
}
