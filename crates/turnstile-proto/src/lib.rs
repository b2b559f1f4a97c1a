//! Turnstile wire protocol.
//!
//! Three logical messages travel between peers: a timestamped `Request` for
//! the critical section, a `Reply` granting it, and a `ResourceUpdate`
//! announcing a booking. On the wire each message is a [`Frame`]: a fixed
//! 12-byte [`FrameHeader`] followed by a CBOR payload.
//!
//! ```text
//! 0        4     5      6          8               12
//! +--------+-----+------+----------+---------------+------------------+
//! | "TNST" | ver | op   | reserved | payload len   | CBOR payload ... |
//! +--------+-----+------+----------+---------------+------------------+
//! ```
//!
//! Decoding happens once, at the transport boundary: everything past this
//! crate works with the closed [`PeerMessage`] enum.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod errors;
pub mod frame;
pub mod message;
pub mod payloads;

pub use errors::{ProtocolError, Result};
pub use frame::{Frame, FrameHeader, Opcode, decode_message, encode_message};
pub use message::{NodeId, PeerMessage, ResourceId, Timestamp};
