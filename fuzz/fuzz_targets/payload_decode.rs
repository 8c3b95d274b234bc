//! Fuzz target for Payload::from_frame
//!
//! Arbitrary CBOR under every opcode: malformed data, the wrong payload for
//! an opcode, oversized strings. Decoding must never panic.

#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use parley_proto::{Frame, FrameHeader, Opcode, Payload};

const OPCODES: [Opcode; 6] = [
    Opcode::AnnounceIdentity,
    Opcode::RequestRoster,
    Opcode::SendMessage,
    Opcode::Roster,
    Opcode::Message,
    Opcode::Error,
];

fuzz_target!(|data: &[u8]| {
    for opcode in OPCODES {
        let frame = Frame::new(FrameHeader::new(opcode), Bytes::copy_from_slice(data));
        let _ = Payload::from_frame(&frame);
    }
});
