//! Protocol error types.

use thiserror::Error;

/// Result alias for codec operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while encoding or decoding frames.
///
/// Every variant describes a malformed or unexpected input. Receivers drop
/// the offending frame and keep serving.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Buffer shorter than a frame header.
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Minimum number of bytes required.
        expected: usize,
        /// Number of bytes available.
        actual: usize,
    },

    /// Header does not start with the protocol magic.
    #[error("invalid magic: {found:02x?}")]
    InvalidMagic {
        /// The four bytes found instead.
        found: [u8; 4],
    },

    /// Header carries a version this build does not speak.
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    /// Opcode byte does not name a known message.
    #[error("unknown opcode {0:#04x}")]
    UnknownOpcode(u8),

    /// Reserved header bytes are not zero.
    #[error("reserved header bytes must be zero, found {0:02x?}")]
    NonZeroReserved([u8; 2]),

    /// Declared payload exceeds the protocol limit.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Declared payload size.
        size: usize,
        /// Maximum allowed payload size.
        max: usize,
    },

    /// Buffer ends before the declared payload does.
    #[error("truncated payload: expected {expected} bytes, got {actual}")]
    TruncatedPayload {
        /// Payload size declared in the header.
        expected: usize,
        /// Bytes actually present.
        actual: usize,
    },

    /// CBOR payload could not be encoded.
    #[error("payload encoding failed: {0}")]
    Encode(String),

    /// CBOR payload could not be decoded for the header's opcode.
    #[error("payload decoding failed: {0}")]
    Decode(String),
}
