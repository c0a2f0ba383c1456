//! Codec error types.

use std::io;

use tds_wire::{PacketType, ProtocolError};
use thiserror::Error;

/// Errors raised by the framing layer.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CodecError {
    /// Transport I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Malformed wire structure.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Packet exceeds the negotiated maximum.
    #[error("packet too large: {size} bytes (max {max})")]
    PacketTooLarge {
        /// Declared size.
        size: usize,
        /// Allowed maximum.
        max: usize,
    },

    /// A packet of another type arrived in the middle of a message.
    #[error("unexpected packet type: expected {expected:?}, received {received:?}")]
    UnexpectedPacketType {
        /// Type the reader was waiting for.
        expected: PacketType,
        /// Type that arrived.
        received: PacketType,
    },

    /// More contiguous bytes were requested than the buffer can hold.
    #[error("request for {requested} bytes exceeds buffer capacity {capacity}")]
    RequestTooLarge {
        /// Bytes requested.
        requested: usize,
        /// Buffer capacity.
        capacity: usize,
    },

    /// More bytes were marked consumed than were available.
    #[error("consumed {used} bytes but only {available} were available")]
    Overconsumed {
        /// Bytes marked consumed.
        used: usize,
        /// Bytes available.
        available: usize,
    },

    /// The transport closed before the requested bytes arrived.
    #[error("connection closed unexpectedly")]
    UnexpectedEof,

    /// The message ended before the requested bytes were read.
    #[error("read past end of message")]
    EndOfMessage,

    /// The read was cancelled by the caller.
    #[error("operation cancelled")]
    Cancelled,

    /// The read deadline passed.
    #[error("operation timed out")]
    Timeout,
}

impl CodecError {
    /// Whether the error came from an interrupt rather than the transport.
    #[must_use]
    pub fn is_interrupt(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Timeout)
    }
}
