//! Operations for model-based testing.
//!
//! Operations represent everything that can happen to a cluster: local
//! actors requesting, booking and leaving, and the network delivering one
//! message at a time. They are generated randomly by proptest (or decoded
//! from fuzzer bytes) and applied to a [`super::ClusterWorld`].

use arbitrary::Arbitrary;
use turnstile_proto::ResourceId;

/// Node identifier in the model (reduced modulo cluster size).
pub type ModelNodeId = u8;

/// Operations that can be applied to the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Arbitrary)]
pub enum Operation {
    /// Node asks for the critical section.
    Request {
        /// Requesting node.
        node: ModelNodeId,
    },

    /// Node books a seat while holding the critical section.
    Book {
        /// Booking node.
        node: ModelNodeId,
        /// Seat to book.
        seat: ModelSeat,
    },

    /// Node leaves the critical section.
    Exit {
        /// Leaving node.
        node: ModelNodeId,
    },

    /// Node abandons an ungranted request.
    Withdraw {
        /// Withdrawing node.
        node: ModelNodeId,
    },

    /// Deliver the oldest message on one link.
    ///
    /// `link` picks among links with pending messages, in order.
    Deliver {
        /// Index into the non-empty links (wraps).
        link: u8,
    },

    /// Deliver everything until no message is in flight.
    Settle,
}

/// Seat number (kept small so bookings collide).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Arbitrary)]
pub struct ModelSeat(pub u8);

impl ModelSeat {
    /// Resource id of this seat.
    pub fn resource(self) -> ResourceId {
        ResourceId::new((self.0 % 8).to_string())
    }
}

/// Result of applying an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationResult {
    /// Operation succeeded.
    Ok,

    /// Booking succeeded.
    Booked,

    /// Seat was already taken.
    AlreadyBooked,

    /// Operation was rejected.
    Error(OperationError),
}

/// Expected rejections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationError {
    /// Request while one is outstanding.
    AlreadyRequesting,

    /// Book or exit outside the critical section.
    NotInCriticalSection,

    /// Withdraw without an ungranted request.
    NotRequesting,

    /// Deliver with nothing in flight.
    NothingInFlight,
}

impl OperationResult {
    /// Check if operation succeeded.
    pub fn is_ok(&self) -> bool {
        !self.is_err()
    }

    /// Check if operation failed.
    pub fn is_err(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}
