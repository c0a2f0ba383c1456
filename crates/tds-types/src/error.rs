//! Value codec error types.

use tds_wire::ProtocolError;
use thiserror::Error;

/// Errors raised while encoding, decoding or converting values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum TypeError {
    /// Value is null where a non-null value was required.
    #[error("unexpected null value")]
    UnexpectedNull,

    /// No conversion rule between the two types.
    #[error("unsupported conversion from {from} to {to}")]
    UnsupportedConversion {
        /// Source type.
        from: &'static str,
        /// Target type.
        to: &'static str,
    },

    /// Value does not fit the target type.
    #[error("value out of range for {target}")]
    OutOfRange {
        /// Target type name.
        target: &'static str,
    },

    /// Parameter value exceeds its declared length and truncation is off.
    #[error("value too long: declared {declared} bytes, got {actual}")]
    ValueTooLong {
        /// Declared length in bytes.
        declared: usize,
        /// Encoded length in bytes.
        actual: usize,
    },

    /// Wire data for a value has the wrong length.
    #[error("invalid length {length} for {type_name}")]
    InvalidLength {
        /// Wire type name.
        type_name: &'static str,
        /// Offending length.
        length: usize,
    },

    /// Wire type code with no codec.
    #[error("unsupported wire type 0x{0:02X}")]
    UnsupportedType(u8),

    /// Invalid decimal text or digits.
    #[error("invalid decimal: {0}")]
    InvalidDecimal(String),

    /// Invalid date/time value.
    #[error("invalid date/time: {0}")]
    InvalidDateTime(String),

    /// Malformed binary XML.
    #[error("invalid binary xml at offset {offset}: {reason}")]
    BinXml {
        /// Byte offset of the failure.
        offset: usize,
        /// What went wrong.
        reason: &'static str,
    },

    /// Streamed text input is not valid UTF-8, or ends mid-character.
    #[error("streamed text is not valid UTF-8")]
    InvalidUtf8,

    /// A streamed parameter's reader was already used by an earlier send.
    #[error("parameter stream already consumed")]
    StreamConsumed,

    /// Wire structure error.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl TypeError {
    /// Shorthand for a failed conversion.
    #[must_use]
    pub const fn unsupported(from: &'static str, to: &'static str) -> Self {
        Self::UnsupportedConversion { from, to }
    }
}
