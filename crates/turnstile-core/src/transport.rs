//! Peer channel abstraction.
//!
//! The coordinator never performs I/O. Drivers execute its `Send` actions
//! through a [`PeerChannel`]: TCP in production, turmoil in simulation,
//! in-memory queues in single-process harnesses.

use async_trait::async_trait;
use thiserror::Error;
use turnstile_proto::{NodeId, PeerMessage, ProtocolError};

/// Errors from delivering a message to a peer.
///
/// Delivery failures are never fatal. The driver logs them and moves on; a
/// peer that never receives our messages simply never replies.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No endpoint is configured for the peer.
    #[error("no route to node {0}")]
    NoRoute(NodeId),

    /// The message could not be framed.
    #[error("encode failed: {0}")]
    Encode(#[from] ProtocolError),

    /// Connecting to or writing to the peer failed.
    #[error("send to node {peer} failed: {reason}")]
    SendFailed {
        /// Destination node.
        peer: NodeId,
        /// Description of the failure.
        reason: String,
    },
}

/// Point-to-point, best-effort delivery to a peer.
///
/// A successful `send` means the peer has applied the message to its core.
/// Transports must provide this so that a node's sends to one peer take
/// effect in the order they were issued.
#[async_trait]
pub trait PeerChannel: Send + Sync + 'static {
    /// Deliver `message` to `peer`.
    async fn send(&self, peer: NodeId, message: PeerMessage) -> Result<(), TransportError>;
}
