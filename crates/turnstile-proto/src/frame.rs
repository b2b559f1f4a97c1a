//! Binary framing.
//!
//! # Invariants
//!
//! - A header is exactly [`FrameHeader::SIZE`] bytes and is read without
//!   copying or alignment requirements.
//! - `payload_size` never exceeds [`FrameHeader::MAX_PAYLOAD_SIZE`]; the check
//!   happens before any payload byte is read.
//! - A decoded [`Frame`] always has a known opcode and a payload of exactly the
//!   declared length.

use bytes::Bytes;
use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned, byteorder::big_endian::U32,
};

use crate::{
    errors::{ProtocolError, Result},
    message::PeerMessage,
    payloads::{self, ReplyPayload, RequestPayload, ResourceUpdatePayload},
};

/// Message kind carried in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Critical section request.
    Request = 0x01,
    /// Permission reply.
    Reply = 0x02,
    /// Booking announcement.
    ResourceUpdate = 0x03,
}

impl Opcode {
    /// Opcode for a logical message.
    pub fn of(message: &PeerMessage) -> Self {
        match message {
            PeerMessage::Request { .. } => Self::Request,
            PeerMessage::Reply { .. } => Self::Reply,
            PeerMessage::ResourceUpdate { .. } => Self::ResourceUpdate,
        }
    }
}

impl TryFrom<u8> for Opcode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(Self::Request),
            0x02 => Ok(Self::Reply),
            0x03 => Ok(Self::ResourceUpdate),
            other => Err(ProtocolError::UnknownOpcode(other)),
        }
    }
}

/// Fixed-size frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct FrameHeader {
    magic: [u8; 4],
    version: u8,
    opcode: u8,
    reserved: [u8; 2],
    payload_size: U32,
}

impl FrameHeader {
    /// Encoded header size in bytes.
    pub const SIZE: usize = 12;

    /// Protocol magic, `"TNST"`.
    pub const MAGIC: [u8; 4] = *b"TNST";

    /// Protocol version spoken by this build.
    pub const VERSION: u8 = 1;

    /// Largest accepted payload (64 KiB).
    pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024;

    /// Create a header for `opcode` with an empty payload.
    pub fn new(opcode: Opcode) -> Self {
        Self {
            magic: Self::MAGIC,
            version: Self::VERSION,
            opcode: opcode as u8,
            reserved: [0; 2],
            payload_size: U32::new(0),
        }
    }

    /// Parse and validate a header from the start of `bytes`.
    ///
    /// Trailing bytes after the header are ignored.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let Some(raw) = bytes.get(..Self::SIZE) else {
            return Err(ProtocolError::FrameTooShort { expected: Self::SIZE, actual: bytes.len() });
        };

        let header = Self::read_from_bytes(raw).map_err(|_| ProtocolError::FrameTooShort {
            expected: Self::SIZE,
            actual: raw.len(),
        })?;

        if header.magic != Self::MAGIC {
            return Err(ProtocolError::InvalidMagic { found: header.magic });
        }
        if header.version != Self::VERSION {
            return Err(ProtocolError::UnsupportedVersion(header.version));
        }
        Opcode::try_from(header.opcode)?;
        if header.reserved != [0; 2] {
            return Err(ProtocolError::NonZeroReserved(header.reserved));
        }

        let size = header.payload_size();
        if size > Self::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge { size, max: Self::MAX_PAYLOAD_SIZE });
        }

        Ok(header)
    }

    /// Raw opcode byte.
    pub fn opcode(&self) -> u8 {
        self.opcode
    }

    /// Opcode as an enum. `None` for unknown values.
    pub fn opcode_enum(&self) -> Option<Opcode> {
        Opcode::try_from(self.opcode).ok()
    }

    /// Declared payload length.
    pub fn payload_size(&self) -> usize {
        self.payload_size.get() as usize
    }

    fn set_payload_size(&mut self, size: usize) -> Result<()> {
        let too_large = ProtocolError::PayloadTooLarge { size, max: Self::MAX_PAYLOAD_SIZE };
        if size > Self::MAX_PAYLOAD_SIZE {
            return Err(too_large);
        }
        self.payload_size = U32::new(u32::try_from(size).map_err(|_| too_large)?);
        Ok(())
    }
}

/// A header plus its CBOR payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Validated header.
    pub header: FrameHeader,
    /// Payload bytes, exactly `header.payload_size()` long.
    pub payload: Bytes,
}

impl Frame {
    /// Build the frame for a logical message.
    pub fn from_message(message: &PeerMessage) -> Result<Self> {
        let payload = match message {
            PeerMessage::Request { timestamp, from } => {
                payloads::to_cbor(&RequestPayload { timestamp: *timestamp, from: *from })?
            },
            PeerMessage::Reply { from, timestamp } => {
                payloads::to_cbor(&ReplyPayload { from: *from, timestamp: *timestamp })?
            },
            PeerMessage::ResourceUpdate { resource } => {
                payloads::to_cbor(&ResourceUpdatePayload { resource: resource.clone() })?
            },
        };

        let mut header = FrameHeader::new(Opcode::of(message));
        header.set_payload_size(payload.len())?;

        Ok(Self { header, payload: Bytes::from(payload) })
    }

    /// Decode the payload into the logical message named by the opcode.
    pub fn to_message(&self) -> Result<PeerMessage> {
        let opcode = Opcode::try_from(self.header.opcode())?;

        let message = match opcode {
            Opcode::Request => {
                let body: RequestPayload = payloads::from_cbor(&self.payload)?;
                PeerMessage::Request { timestamp: body.timestamp, from: body.from }
            },
            Opcode::Reply => {
                let body: ReplyPayload = payloads::from_cbor(&self.payload)?;
                PeerMessage::Reply { from: body.from, timestamp: body.timestamp }
            },
            Opcode::ResourceUpdate => {
                let body: ResourceUpdatePayload = payloads::from_cbor(&self.payload)?;
                PeerMessage::ResourceUpdate { resource: body.resource }
            },
        };

        Ok(message)
    }

    /// Append the wire encoding of this frame to `dst`.
    pub fn encode(&self, dst: &mut Vec<u8>) {
        dst.reserve(FrameHeader::SIZE + self.payload.len());
        dst.extend_from_slice(self.header.as_bytes());
        dst.extend_from_slice(&self.payload);
    }

    /// Decode one frame from the start of `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = FrameHeader::from_bytes(bytes)?;
        let expected = header.payload_size();
        let available = bytes.len() - FrameHeader::SIZE;

        if available < expected {
            return Err(ProtocolError::TruncatedPayload { expected, actual: available });
        }

        let start = FrameHeader::SIZE;
        let payload = Bytes::copy_from_slice(&bytes[start..start + expected]);

        Ok(Self { header, payload })
    }
}

/// Encode a logical message straight to wire bytes.
pub fn encode_message(message: &PeerMessage) -> Result<Vec<u8>> {
    let frame = Frame::from_message(message)?;
    let mut buf = Vec::new();
    frame.encode(&mut buf);
    Ok(buf)
}

/// Decode wire bytes straight to a logical message.
pub fn decode_message(bytes: &[u8]) -> Result<PeerMessage> {
    Frame::decode(bytes)?.to_message()
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;
    use proptest::prelude::*;

    use super::*;
    use crate::message::ResourceId;

    #[test]
    fn header_is_twelve_bytes() {
        assert_eq!(std::mem::size_of::<FrameHeader>(), FrameHeader::SIZE);
    }

    #[test]
    fn reply_golden_bytes() {
        let bytes = encode_message(&PeerMessage::Reply { from: 1, timestamp: 5 }).unwrap();

        // header: "TNST" v1 op=2 reserved len=18, body: {"from": 1, "timestamp": 5}
        let expected =
            hex!("544e5354 01 02 0000 00000012 a2 64 66726f6d 01 69 74696d657374616d70 05");
        assert_eq!(bytes, expected);
    }

    #[test]
    fn decodes_each_message_kind() {
        let messages = [
            PeerMessage::Request { timestamp: 9, from: 2 },
            PeerMessage::Reply { from: 0, timestamp: 3 },
            PeerMessage::ResourceUpdate { resource: ResourceId::from("A") },
        ];

        for message in messages {
            let bytes = encode_message(&message).unwrap();
            assert_eq!(decode_message(&bytes).unwrap(), message);
        }
    }

    #[test]
    fn rejects_short_buffer() {
        let result = Frame::decode(&[0x54, 0x4e]);
        assert_eq!(result, Err(ProtocolError::FrameTooShort { expected: 12, actual: 2 }));
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = encode_message(&PeerMessage::Reply { from: 1, timestamp: 1 }).unwrap();
        bytes[0] = b'X';
        assert!(matches!(Frame::decode(&bytes), Err(ProtocolError::InvalidMagic { .. })));
    }

    #[test]
    fn rejects_unknown_version() {
        let mut bytes = encode_message(&PeerMessage::Reply { from: 1, timestamp: 1 }).unwrap();
        bytes[4] = 9;
        assert_eq!(Frame::decode(&bytes), Err(ProtocolError::UnsupportedVersion(9)));
    }

    #[test]
    fn rejects_unknown_opcode() {
        let mut bytes = encode_message(&PeerMessage::Reply { from: 1, timestamp: 1 }).unwrap();
        bytes[5] = 0x42;
        assert_eq!(Frame::decode(&bytes), Err(ProtocolError::UnknownOpcode(0x42)));
    }

    #[test]
    fn rejects_nonzero_reserved_bytes() {
        let mut bytes = encode_message(&PeerMessage::Reply { from: 1, timestamp: 1 }).unwrap();
        bytes[7] = 0x01;
        assert_eq!(Frame::decode(&bytes), Err(ProtocolError::NonZeroReserved([0x00, 0x01])));
    }

    #[test]
    fn rejects_oversize_declaration_before_reading_payload() {
        let mut header = hex!("544e5354 01 01 0000 00000000").to_vec();
        header[8..12].copy_from_slice(&(1u32 << 20).to_be_bytes());
        assert!(matches!(
            FrameHeader::from_bytes(&header),
            Err(ProtocolError::PayloadTooLarge { size, .. }) if size == 1 << 20
        ));
    }

    #[test]
    fn rejects_truncated_payload() {
        let bytes = encode_message(&PeerMessage::Request { timestamp: 1, from: 1 }).unwrap();
        let cut = &bytes[..bytes.len() - 2];
        assert!(matches!(Frame::decode(cut), Err(ProtocolError::TruncatedPayload { .. })));
    }

    #[test]
    fn rejects_payload_of_wrong_kind() {
        let mut bytes = encode_message(&PeerMessage::Reply { from: 1, timestamp: 1 }).unwrap();
        bytes[5] = Opcode::ResourceUpdate as u8;
        assert!(matches!(decode_message(&bytes), Err(ProtocolError::Decode(_))));
    }

    proptest! {
        #[test]
        fn decode_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..64)) {
            let _ = decode_message(&bytes);
        }

        #[test]
        fn request_fields_survive_the_wire(timestamp in any::<u64>(), from in any::<u64>()) {
            let message = PeerMessage::Request { timestamp, from };
            let bytes = encode_message(&message).unwrap();
            prop_assert_eq!(decode_message(&bytes).unwrap(), message);
        }
    }
}
