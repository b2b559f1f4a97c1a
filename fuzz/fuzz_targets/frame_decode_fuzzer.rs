//! Fuzz target for the frame decoder.
//!
//! Every inbound connection hands raw bytes to `decode_message`, so it must
//! reject anything malformed with a `ProtocolError` instead of panicking.
//!
//! # Invariants
//!
//! - NEVER panic on arbitrary input
//! - A decoded message re-encodes to a frame that decodes to the same
//!   message
//! - A decoded frame's header agrees with the message it carries

#![no_main]

use libfuzzer_sys::fuzz_target;
use turnstile_proto::{FrameHeader, Opcode, decode_message, encode_message};

fuzz_target!(|data: &[u8]| {
    let _ = FrameHeader::from_bytes(data);

    let Ok(message) = decode_message(data) else {
        return;
    };

    let header = FrameHeader::from_bytes(data).expect("decoded frame must have a valid header");
    assert_eq!(header.opcode_enum(), Some(Opcode::of(&message)));

    let encoded = encode_message(&message).expect("decoded message must re-encode");
    let again = decode_message(&encoded).expect("re-encoded frame must decode");
    assert_eq!(again, message);
});
