//! Fuzz target for Frame::decode
//!
//! Arbitrary bytes through the header and frame parser. Looks for panics,
//! size arithmetic overflows and over-reads. Every invalid input must come
//! back as an error.

#![no_main]

use libfuzzer_sys::fuzz_target;
use parley_proto::{Frame, FrameHeader};

fuzz_target!(|data: &[u8]| {
    if let Ok(frame) = Frame::decode(data) {
        assert!(frame.header.payload_size() <= FrameHeader::MAX_PAYLOAD_SIZE);
        assert_eq!(frame.wire_len(), FrameHeader::SIZE + frame.payload.len());
    }
});
