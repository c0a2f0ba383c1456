//! Outbound message writer.
//!
//! [`MessageWriter`] splits a logical message into packets no larger than
//! the negotiated packet size. Bytes are buffered until a full packet is
//! available; [`MessageWriter::end_message`] sends the remainder with
//! END_OF_MESSAGE set and flushes the transport.

use bytes::BytesMut;
use futures_util::SinkExt;
use tds_wire::{
    MAX_PACKET_SIZE, MIN_PACKET_SIZE, PACKET_HEADER_SIZE, PacketHeader,
    PacketStatus, PacketType,
};
use tokio::io::AsyncWrite;
use tokio_util::codec::FramedWrite;

use crate::error::CodecError;
use crate::packet_codec::{Packet, TdsCodec};

/// Splits logical messages into packets.
#[derive(Debug)]
pub struct MessageWriter<W> {
    sink: FramedWrite<W, TdsCodec>,
    buf: BytesMut,
    packet_type: PacketType,
    packet_size: usize,
    packet_id: u8,
    first_status: PacketStatus,
}

impl<W> MessageWriter<W> {
    /// Wrap a transport, splitting messages at `packet_size`.
    pub fn new(inner: W, packet_size: usize) -> Self {
        let packet_size = packet_size.clamp(MIN_PACKET_SIZE, MAX_PACKET_SIZE);
        Self {
            sink: FramedWrite::new(inner, TdsCodec::new()),
            buf: BytesMut::with_capacity(packet_size),
            packet_type: PacketType::SqlBatch,
            packet_size,
            packet_id: 0,
            first_status: PacketStatus::empty(),
        }
    }

    /// Negotiated packet size, header included.
    #[must_use]
    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    /// Apply a packet size announced by the server.
    pub fn set_packet_size(&mut self, packet_size: usize) {
        self.packet_size = packet_size.clamp(MIN_PACKET_SIZE, MAX_PACKET_SIZE);
    }

    fn payload_max(&self) -> usize {
        self.packet_size - PACKET_HEADER_SIZE
    }

    /// Start a message of `packet_type`.
    ///
    /// With `reset_connection` the first packet carries RESET_CONNECTION,
    /// asking the server to reset session state before the request runs.
    /// Packet numbering restarts.
    pub fn begin_message(&mut self, packet_type: PacketType, reset_connection: bool) {
        self.buf.clear();
        self.packet_type = packet_type;
        self.packet_id = 0;
        self.first_status = if reset_connection {
            PacketStatus::RESET_CONNECTION
        } else {
            PacketStatus::empty()
        };
    }

    /// Return the transport. Unsent bytes are discarded.
    pub fn into_inner(self) -> W {
        self.sink.into_inner()
    }
}

impl<W: AsyncWrite + Unpin> MessageWriter<W> {
    /// Append bytes to the current message, sending every full packet.
    pub async fn write(&mut self, data: &[u8]) -> Result<(), CodecError> {
        self.buf.extend_from_slice(data);
        // keep at least one byte back so end_message always has a packet to mark
        while self.buf.len() > self.payload_max() {
            let chunk = self.buf.split_to(self.payload_max());
            self.send_packet(chunk, false).await?;
        }
        Ok(())
    }

    /// Send the rest of the message with END_OF_MESSAGE and flush.
    pub async fn end_message(&mut self) -> Result<(), CodecError> {
        let chunk = self.buf.split();
        self.send_packet(chunk, true).await?;
        self.sink.flush().await?;
        tracing::trace!(packet_type = ?self.packet_type, packets = self.packet_id, "message sent");
        Ok(())
    }

    /// Withdraw a partially sent message. Buffered bytes are dropped and a
    /// final packet with IGNORE_EVENT tells the server to discard what it
    /// received; no response follows.
    pub async fn abandon_message(&mut self) -> Result<(), CodecError> {
        self.buf.clear();
        self.first_status |= PacketStatus::IGNORE_EVENT;
        self.send_packet(BytesMut::new(), true).await?;
        self.sink.flush().await?;
        tracing::debug!(packet_type = ?self.packet_type, packets = self.packet_id, "message abandoned");
        Ok(())
    }

    /// Send a whole message in one call.
    pub async fn send_message(
        &mut self,
        packet_type: PacketType,
        reset_connection: bool,
        body: &[u8],
    ) -> Result<(), CodecError> {
        self.begin_message(packet_type, reset_connection);
        self.write(body).await?;
        self.end_message().await
    }

    /// Send an ATTENTION packet: type 6, empty body, END_OF_MESSAGE.
    pub async fn send_attention(&mut self) -> Result<(), CodecError> {
        tracing::debug!("sending attention");
        let header = PacketHeader::new(PacketType::Attention, PacketStatus::END_OF_MESSAGE, 0)
            .with_packet_id(1);
        self.sink.send(Packet::new(header, BytesMut::new())).await
    }

    async fn send_packet(&mut self, payload: BytesMut, eom: bool) -> Result<(), CodecError> {
        let mut status = if eom {
            PacketStatus::END_OF_MESSAGE
        } else {
            PacketStatus::empty()
        };
        status |= std::mem::take(&mut self.first_status);
        self.packet_id = self.packet_id.wrapping_add(1);

        let header = PacketHeader::new(self.packet_type, status, 0).with_packet_id(self.packet_id);
        self.sink.feed(Packet::new(header, payload)).await
    }
}
