//! Logical peer messages.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identity of a node. Used as routing key and as the tie-breaker of
/// the request order.
pub type NodeId = u64;

/// Lamport timestamp carried by requests and echoed by replies.
pub type Timestamp = u64;

/// Identifier of a bookable resource (a seat).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    /// Create a resource identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ResourceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A message exchanged between peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerMessage {
    /// Claim on the critical section, stamped with the sender's clock.
    Request {
        /// Lamport timestamp of the claim.
        timestamp: Timestamp,
        /// Node issuing the claim.
        from: NodeId,
    },

    /// Permission for one request of the receiver.
    Reply {
        /// Node granting permission.
        from: NodeId,
        /// Timestamp of the request being answered.
        timestamp: Timestamp,
    },

    /// Announcement that a resource has been booked.
    ResourceUpdate {
        /// The booked resource.
        resource: ResourceId,
    },
}

impl PeerMessage {
    /// Short, stable name of the message kind, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Request { .. } => "request",
            Self::Reply { .. } => "reply",
            Self::ResourceUpdate { .. } => "resource_update",
        }
    }
}
