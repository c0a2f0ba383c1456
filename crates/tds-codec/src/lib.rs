//! # tds-codec
//!
//! Async framing layer for TDS.
//!
//! ```text
//! transport → StreamBuffer → MessageReader ─┐
//!                                           ├─ PacketConnection
//! transport ← TdsCodec ← MessageWriter ─────┘
//! ```
//!
//! [`StreamBuffer`] owns the single inbound buffer and polls the transport
//! in short slices so an [`Interrupt`] (cancellation token or deadline) is
//! noticed promptly. [`MessageReader`] strips packet headers and exposes a
//! logical message as a contiguous byte source. [`MessageWriter`] splits
//! outbound messages into packets, numbering them from 1 and setting
//! END_OF_MESSAGE on the last.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod buffer;
pub mod connection;
pub mod error;
pub mod message;
pub mod packet_codec;
pub mod reader;
pub mod writer;

pub use buffer::{Interrupt, POLL_INTERVAL, StreamBuffer};
pub use connection::{PacketConnection, READ_BUFFER_CAPACITY};
pub use error::CodecError;
pub use message::{Message, MessageAssembler};
pub use packet_codec::{Packet, TdsCodec};
pub use reader::MessageReader;
pub use writer::MessageWriter;
pub use tokio_util::sync::CancellationToken;
