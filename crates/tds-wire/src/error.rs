//! Wire-level error types.

use thiserror::Error;

/// Errors raised while encoding or decoding TDS wire structures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// The buffer ended before the structure was complete.
    #[error("unexpected end of data")]
    UnexpectedEof,

    /// A packet or token was shorter than its declared length.
    #[error("incomplete data: expected {expected} bytes, got {actual}")]
    IncompletePacket {
        /// Bytes required.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },

    /// Unknown packet type byte.
    #[error("invalid packet type: 0x{0:02X}")]
    InvalidPacketType(u8),

    /// Packet status byte carries bits outside the known set.
    #[error("invalid packet status: 0x{0:02X}")]
    InvalidPacketStatus(u8),

    /// A packet arrived with a different type than the message in progress.
    #[error("unexpected packet type: expected {expected:?}, received 0x{received:02X}")]
    UnexpectedPacketType {
        /// Type the reader was waiting for.
        expected: crate::PacketType,
        /// Raw type byte received.
        received: u8,
    },

    /// Packet length field below the header size or above the maximum.
    #[error("invalid packet length: {0}")]
    InvalidPacketLength(usize),

    /// Unknown PRELOGIN option.
    #[error("invalid prelogin option: 0x{0:02X}")]
    InvalidPreloginOption(u8),

    /// Unknown token type byte in a tabular result.
    #[error("invalid token type: 0x{0:02X}")]
    InvalidTokenType(u8),

    /// Unknown data type code in TYPE_INFO.
    #[error("unknown data type: 0x{0:02X}")]
    UnknownType(u8),

    /// A length field holds a value that the type does not allow.
    #[error("invalid length {length} for {type_name}")]
    InvalidLength {
        /// Type being decoded.
        type_name: &'static str,
        /// Offending length.
        length: usize,
    },

    /// A string could not be encoded for the wire.
    #[error("string encoding error: {0}")]
    StringEncoding(String),

    /// A string is longer than its length prefix can express.
    #[error("string too long for {prefix}-byte length prefix: {chars} characters")]
    StringTooLong {
        /// Width of the length prefix in bytes.
        prefix: u8,
        /// Length in UTF-16 code units.
        chars: usize,
    },

    /// A structure violates a protocol rule.
    #[error("malformed {0}")]
    Malformed(&'static str),
}
