//! Message reassembly from a packet stream.
//!
//! The server side of a connection sees packets through a
//! [`TdsCodec`](crate::TdsCodec) stream; [`MessageAssembler`] joins them
//! into messages. A packet carrying IGNORE_EVENT abandons the message it
//! ends, which is how a client withdraws a partially sent request.

use bytes::{Bytes, BytesMut};
use tds_wire::{PacketStatus, PacketType};

use crate::packet_codec::Packet;

/// A complete inbound message.
#[derive(Debug, Clone)]
pub struct Message {
    /// Type of the first packet.
    pub packet_type: PacketType,
    /// Status of the first packet, where RESET_CONNECTION lives.
    pub status: PacketStatus,
    /// Payloads of every packet, in order.
    pub payload: Bytes,
}

/// Joins packets into messages.
#[derive(Debug, Default)]
pub struct MessageAssembler {
    head: Option<(PacketType, PacketStatus)>,
    body: BytesMut,
}

impl MessageAssembler {
    /// Empty assembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one packet. Returns the message its END_OF_MESSAGE packet
    /// completes; abandoned messages yield nothing.
    pub fn push(&mut self, packet: Packet) -> Option<Message> {
        let (packet_type, status) = *self
            .head
            .get_or_insert((packet.header.packet_type, packet.header.status));
        self.body.extend_from_slice(&packet.payload);
        if !packet.is_end_of_message() {
            return None;
        }

        let payload = self.body.split().freeze();
        self.head = None;
        if packet.header.status.contains(PacketStatus::IGNORE_EVENT) {
            tracing::debug!(?packet_type, len = payload.len(), "message abandoned by sender");
            return None;
        }
        tracing::trace!(?packet_type, len = payload.len(), "message complete");
        Some(Message {
            packet_type,
            status,
            payload,
        })
    }

    /// Whether packets of an unfinished message are held.
    #[must_use]
    pub fn has_partial(&self) -> bool {
        self.head.is_some()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tds_wire::PacketHeader;

    fn packet(status: PacketStatus, payload: &'static [u8]) -> Packet {
        Packet::new(PacketHeader::new(PacketType::SqlBatch, status, 0), payload)
    }

    #[test]
    fn test_first_packet_status_wins() {
        let mut assembler = MessageAssembler::new();
        assert!(assembler.push(packet(PacketStatus::RESET_CONNECTION, b"hello ")).is_none());
        assert!(assembler.has_partial());

        let message = assembler
            .push(packet(PacketStatus::END_OF_MESSAGE, b"world"))
            .unwrap();
        assert_eq!(message.packet_type, PacketType::SqlBatch);
        assert!(message.status.contains(PacketStatus::RESET_CONNECTION));
        assert_eq!(&message.payload[..], b"hello world");
        assert!(!assembler.has_partial());
    }

    #[test]
    fn test_ignore_event_drops_message() {
        let mut assembler = MessageAssembler::new();
        assembler.push(packet(PacketStatus::empty(), b"sel"));
        let abandoned = assembler.push(packet(
            PacketStatus::END_OF_MESSAGE | PacketStatus::IGNORE_EVENT,
            b"",
        ));
        assert!(abandoned.is_none());
        assert!(!assembler.has_partial());

        let next = assembler
            .push(packet(PacketStatus::END_OF_MESSAGE, b"select 1"))
            .unwrap();
        assert_eq!(&next.payload[..], b"select 1");
    }
}
