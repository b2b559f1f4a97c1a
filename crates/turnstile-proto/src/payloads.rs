//! CBOR payload bodies.
//!
//! The opcode in the frame header selects which body follows. Bodies carry
//! only the fields of their message; the kind itself is never repeated in
//! the payload.

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    errors::{ProtocolError, Result},
    message::{NodeId, ResourceId, Timestamp},
};

/// Body of a `Request` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestPayload {
    /// Lamport timestamp of the claim.
    pub timestamp: Timestamp,
    /// Node issuing the claim.
    pub from: NodeId,
}

/// Body of a `Reply` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyPayload {
    /// Node granting permission.
    pub from: NodeId,
    /// Timestamp of the request being answered.
    pub timestamp: Timestamp,
}

/// Body of a `ResourceUpdate` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUpdatePayload {
    /// The booked resource.
    pub resource: ResourceId,
}

/// Serialize a payload body to CBOR.
pub fn to_cbor<T: Serialize>(body: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(body, &mut buf).map_err(|e| ProtocolError::Encode(e.to_string()))?;
    Ok(buf)
}

/// Deserialize a payload body from CBOR.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::from_reader(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_survives_cbor() {
        let body = RequestPayload { timestamp: 42, from: 3 };
        let bytes = to_cbor(&body).unwrap();
        let decoded: RequestPayload = from_cbor(&bytes).unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn resource_id_is_encoded_as_plain_text() {
        let body = ResourceUpdatePayload { resource: ResourceId::from("A") };
        let bytes = to_cbor(&body).unwrap();

        // map(1) { "resource": "A" }
        assert!(bytes.ends_with(&[0x61, b'A']));
    }

    #[test]
    fn mismatched_body_is_rejected() {
        let bytes = to_cbor(&ReplyPayload { from: 1, timestamp: 4 }).unwrap();
        let result: Result<ResourceUpdatePayload> = from_cbor(&bytes);
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn garbage_is_rejected() {
        let result: Result<RequestPayload> = from_cbor(&[0xff, 0x00, 0x13]);
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }
}
