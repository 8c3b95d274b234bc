//! CBOR-encoded protocol messages.
//!
//! The header opcode identifies the payload, so only the inner struct is
//! serialized (no enum tag). Decoding with a mismatched opcode fails in CBOR
//! rather than producing a different message.
//!
//! # Invariants
//!
//! Each payload variant maps to exactly one opcode (enforced by match
//! exhaustiveness).

pub mod chat;
pub mod presence;

use bytes::BufMut;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    Frame, FrameHeader, Opcode,
    errors::{ProtocolError, Result},
};

/// All frame payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Client → server: attach a display name to this connection
    AnnounceIdentity(presence::AnnounceIdentity),
    /// Client → server: send me the roster (zero-byte payload)
    RequestRoster,
    /// Client → server: relay a direct message
    SendMessage(chat::SendMessage),
    /// Server → client: full roster snapshot
    Roster(presence::Roster),
    /// Server → client: relayed message or sender echo
    Message(chat::RelayedMessage),
    /// Server → client: invalid input report
    Error(ErrorPayload),
}

/// Error payload for error frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Error code identifying the type of error.
    pub code: u16,
    /// Human-readable error message.
    pub message: String,
}

impl ErrorPayload {
    /// Display name was rejected.
    pub const INVALID_NAME: u16 = 0x0001;
    /// Payload could not be decoded.
    pub const INVALID_PAYLOAD: u16 = 0x0002;
    /// Opcode is not a client request.
    pub const UNEXPECTED_OPCODE: u16 = 0x0003;

    /// Create an invalid name error.
    pub fn invalid_name(reason: impl Into<String>) -> Self {
        Self { code: Self::INVALID_NAME, message: reason.into() }
    }

    /// Create an invalid payload error.
    pub fn invalid_payload(msg: impl Into<String>) -> Self {
        Self { code: Self::INVALID_PAYLOAD, message: msg.into() }
    }

    /// Create an unexpected opcode error.
    pub fn unexpected_opcode(opcode: u16) -> Self {
        Self {
            code: Self::UNEXPECTED_OPCODE,
            message: format!("opcode {opcode:#06x} is not a client request"),
        }
    }
}

impl Payload {
    /// Opcode corresponding to this payload type.
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        match self {
            Self::AnnounceIdentity(_) => Opcode::AnnounceIdentity,
            Self::RequestRoster => Opcode::RequestRoster,
            Self::SendMessage(_) => Opcode::SendMessage,
            Self::Roster(_) => Opcode::Roster,
            Self::Message(_) => Opcode::Message,
            Self::Error(_) => Opcode::Error,
        }
    }

    /// Encode the inner struct as CBOR (no variant tag).
    ///
    /// Size limits are enforced later by [`Frame::encode`].
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        match self {
            Self::AnnounceIdentity(inner) => write_cbor(inner, dst),
            Self::RequestRoster => Ok(()),
            Self::SendMessage(inner) => write_cbor(inner, dst),
            Self::Roster(inner) => write_cbor(inner, dst),
            Self::Message(inner) => write_cbor(inner, dst),
            Self::Error(inner) => write_cbor(inner, dst),
        }
    }

    /// Decode payload bytes for `opcode`.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::PayloadTooLarge` if `bytes` exceed the protocol limit
    /// - `ProtocolError::CborDecode` if the bytes are not the struct the opcode
    ///   names
    pub fn decode(opcode: Opcode, bytes: &[u8]) -> Result<Self> {
        if bytes.len() > FrameHeader::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: bytes.len(),
                max: FrameHeader::MAX_PAYLOAD_SIZE as usize,
            });
        }

        let payload = match opcode {
            Opcode::AnnounceIdentity => Self::AnnounceIdentity(read_cbor(bytes)?),
            Opcode::RequestRoster => Self::RequestRoster,
            Opcode::SendMessage => Self::SendMessage(read_cbor(bytes)?),
            Opcode::Roster => Self::Roster(read_cbor(bytes)?),
            Opcode::Message => Self::Message(read_cbor(bytes)?),
            Opcode::Error => Self::Error(read_cbor(bytes)?),
        };

        Ok(payload)
    }

    /// Encode into a frame, setting the header opcode to match.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn into_frame(self, mut header: FrameHeader) -> Result<Frame> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        header.set_opcode(self.opcode());
        Ok(Frame::new(header, buf))
    }

    /// Encode into a frame with a fresh header.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn framed(self) -> Result<Frame> {
        let header = FrameHeader::new(self.opcode());
        self.into_frame(header)
    }

    /// Parse the payload of a raw frame.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::UnknownOpcode` if the header opcode is unrecognized
    /// - Any error from [`Payload::decode`]
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        let opcode = frame
            .header
            .opcode_enum()
            .ok_or(ProtocolError::UnknownOpcode(frame.header.opcode()))?;
        Self::decode(opcode, &frame.payload)
    }
}

fn write_cbor<T: Serialize>(value: &T, dst: &mut impl BufMut) -> Result<()> {
    let mut writer = dst.writer();
    ciborium::ser::into_writer(value, &mut writer)
        .map_err(|e| ProtocolError::CborEncode(e.to_string()))
}

fn read_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::CborDecode(e.to_string()))
}
