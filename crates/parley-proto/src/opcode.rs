//! Operation codes.
//!
//! Client requests live in `0x0001..=0x000F`, server pushes in
//! `0x0010..=0x001F`. `0x00FF` is the error frame.

/// Frame operation code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    /// Client declares its display name.
    AnnounceIdentity = 0x0001,
    /// Client asks for the current roster.
    RequestRoster = 0x0002,
    /// Client asks the server to relay a direct message.
    SendMessage = 0x0003,
    /// Server pushes a full roster snapshot.
    Roster = 0x0010,
    /// Server relays a direct message (or echoes it to the sender).
    Message = 0x0011,
    /// Server reports invalid input.
    Error = 0x00FF,
}

impl Opcode {
    /// Raw wire value.
    #[must_use]
    pub const fn to_u16(self) -> u16 {
        self as u16
    }

    /// Parse a wire value. `None` if unrecognized.
    #[must_use]
    pub const fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0001 => Some(Self::AnnounceIdentity),
            0x0002 => Some(Self::RequestRoster),
            0x0003 => Some(Self::SendMessage),
            0x0010 => Some(Self::Roster),
            0x0011 => Some(Self::Message),
            0x00FF => Some(Self::Error),
            _ => None,
        }
    }

    /// Whether clients are allowed to send this opcode.
    #[must_use]
    pub const fn is_client_request(self) -> bool {
        matches!(self, Self::AnnounceIdentity | Self::RequestRoster | Self::SendMessage)
    }
}
