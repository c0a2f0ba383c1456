//! Packet connection over a duplex transport.
//!
//! The transport is split into a read half driven by [`MessageReader`] and
//! a write half driven by [`MessageWriter`]. A connection is used by one
//! session at a time; cancellation is cooperative through the reader's
//! [`Interrupt`] followed by [`PacketConnection::send_attention`].

use tds_wire::{DEFAULT_PACKET_SIZE, MAX_PACKET_SIZE, PacketType};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};

use crate::buffer::Interrupt;
use crate::error::CodecError;
use crate::reader::MessageReader;
use crate::writer::MessageWriter;

/// Read buffer size. Two maximum-size packets fit, so any single packet
/// body can be fetched contiguously.
pub const READ_BUFFER_CAPACITY: usize = 2 * MAX_PACKET_SIZE;

/// A TDS connection that sends and receives logical messages.
#[derive(Debug)]
pub struct PacketConnection<S> {
    reader: MessageReader<ReadHalf<S>>,
    writer: MessageWriter<WriteHalf<S>>,
}

impl<S> PacketConnection<S>
where
    S: AsyncRead + AsyncWrite,
{
    /// Split `transport` and start with the default packet size.
    pub fn new(transport: S) -> Self {
        Self::with_packet_size(transport, DEFAULT_PACKET_SIZE)
    }

    /// Split `transport`, sending packets of at most `packet_size` bytes.
    pub fn with_packet_size(transport: S, packet_size: usize) -> Self {
        let (read_half, write_half) = tokio::io::split(transport);
        Self {
            reader: MessageReader::new(read_half, READ_BUFFER_CAPACITY),
            writer: MessageWriter::new(write_half, packet_size),
        }
    }

    /// The inbound half.
    pub fn reader(&mut self) -> &mut MessageReader<ReadHalf<S>> {
        &mut self.reader
    }

    /// The outbound half.
    pub fn writer(&mut self) -> &mut MessageWriter<WriteHalf<S>> {
        &mut self.writer
    }

    /// Outbound packet size.
    #[must_use]
    pub fn packet_size(&self) -> usize {
        self.writer.packet_size()
    }

    /// Apply a packet size from a PACKETSIZE environment change.
    pub fn set_packet_size(&mut self, packet_size: usize) {
        tracing::debug!(packet_size, "packet size changed");
        self.writer.set_packet_size(packet_size);
    }

    /// Observe `interrupt` on subsequent reads.
    pub fn set_interrupt(&mut self, interrupt: Interrupt) {
        self.reader.set_interrupt(interrupt);
    }

    /// Stop observing interrupts.
    pub fn clear_interrupt(&mut self) {
        self.reader.clear_interrupt();
    }

    /// Reassemble the transport.
    ///
    /// Only valid between messages; buffered inbound bytes are discarded.
    pub fn into_inner(self) -> S
    where
        S: Unpin,
    {
        self.reader.into_inner().unsplit(self.writer.into_inner())
    }
}

impl<S> PacketConnection<S>
where
    S: AsyncRead + AsyncWrite,
{
    /// Send a complete message.
    pub async fn send_message(
        &mut self,
        packet_type: PacketType,
        reset_connection: bool,
        body: &[u8],
    ) -> Result<(), CodecError> {
        self.writer
            .send_message(packet_type, reset_connection, body)
            .await
    }

    /// Send ATTENTION to cancel the running request.
    pub async fn send_attention(&mut self) -> Result<(), CodecError> {
        self.writer.send_attention().await
    }

    /// Prepare to read the server's tabular response.
    pub fn begin_response(&mut self) {
        self.reader.begin_message(PacketType::TabularResult);
    }
}
