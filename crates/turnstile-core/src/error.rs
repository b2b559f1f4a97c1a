//! Coordinator error types.

use thiserror::Error;
use turnstile_proto::{NodeId, Timestamp};

use crate::coordinator::CoordinatorState;

/// Errors from coordinator operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinatorError {
    /// A local request was issued while one is still outstanding.
    #[error("request already outstanding (state {state:?})")]
    AlreadyRequesting {
        /// State at the time of the call.
        state: CoordinatorState,
    },

    /// A critical-section operation was attempted without holding it.
    #[error("not in critical section (state {state:?})")]
    NotInCriticalSection {
        /// State at the time of the call.
        state: CoordinatorState,
    },

    /// Withdraw was called with no request waiting for replies.
    #[error("no request to withdraw (state {state:?})")]
    NotRequesting {
        /// State at the time of the call.
        state: CoordinatorState,
    },

    /// Message names a node outside the static peer set.
    #[error("unknown peer: node {0}")]
    UnknownPeer(NodeId),

    /// Message claims to come from this node.
    #[error("message claims to come from this node ({0})")]
    SelfAddressed(NodeId),

    /// Reply answers a request this node never issued.
    #[error("unexpected reply from node {from} for timestamp {timestamp} (state {state:?})")]
    UnexpectedReply {
        /// Replying node.
        from: NodeId,
        /// Timestamp the reply claims to answer.
        timestamp: Timestamp,
        /// State at the time of receipt.
        state: CoordinatorState,
    },

    /// Second reply from the same peer for one request.
    #[error("duplicate reply from node {0}")]
    DuplicateReply(NodeId),

    /// Static membership is malformed.
    #[error("invalid membership: {reason}")]
    InvalidMembership {
        /// Description of the problem.
        reason: String,
    },
}

impl CoordinatorError {
    /// Returns true if the error was caused by a peer's message.
    ///
    /// Violations are dropped and logged by the receiver. Everything else is
    /// misuse by the local caller and is reported back to it.
    pub fn is_protocol_violation(&self) -> bool {
        match self {
            Self::UnknownPeer(_)
            | Self::SelfAddressed(_)
            | Self::UnexpectedReply { .. }
            | Self::DuplicateReply(_) => true,

            Self::AlreadyRequesting { .. }
            | Self::NotInCriticalSection { .. }
            | Self::NotRequesting { .. }
            | Self::InvalidMembership { .. } => false,
        }
    }
}
