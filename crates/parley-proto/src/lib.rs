//! Parley wire protocol.
//!
//! Every message on the wire is a [`Frame`]: a fixed 12-byte binary header
//! followed by a CBOR payload. The header carries the [`Opcode`], which is the
//! only thing identifying the payload type, so payloads are serialized without
//! an enum tag.
//!
//! # Components
//!
//! - [`FrameHeader`]: zero-copy, big-endian header
//! - [`Frame`]: header plus raw payload bytes
//! - [`Payload`]: typed view of a frame's payload
//! - [`ProtocolError`]: everything that can go wrong while framing

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod errors;
pub mod frame;
pub mod header;
pub mod opcode;
pub mod payloads;

pub use errors::{ProtocolError, Result};
pub use frame::Frame;
pub use header::FrameHeader;
pub use opcode::Opcode;
pub use payloads::Payload;

/// ALPN identifier negotiated by both QUIC endpoints.
pub const ALPN_PROTOCOL: &[u8] = b"parley";
