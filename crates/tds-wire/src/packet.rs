//! Packet header.
//!
//! ```text
//! offset  0      1        2..4          4..6   6          7
//!         type   status   length (BE)   spid   packet id  window
//! ```
//!
//! `length` counts the header itself. Packet ids start at 1 for each
//! message and wrap at 255.

use bitflags::bitflags;
use bytes::{Buf, BufMut};

use crate::error::ProtocolError;

/// Header size in bytes.
pub const PACKET_HEADER_SIZE: usize = 8;

/// Largest packet the 16-bit length field can describe.
pub const MAX_PACKET_SIZE: usize = 65535;

/// Packet size in effect until the server announces another one.
pub const DEFAULT_PACKET_SIZE: usize = 4096;

/// Smallest packet size a server may negotiate.
pub const MIN_PACKET_SIZE: usize = 512;

/// Message type carried in the first header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// SQL text.
    SqlBatch = 0x01,
    /// Remote procedure call.
    Rpc = 0x03,
    /// Any server response.
    TabularResult = 0x04,
    /// Cancel the running request.
    Attention = 0x06,
    /// BulkLoad rows.
    BulkLoad = 0x07,
    /// BEGIN, COMMIT, ROLLBACK and SAVE.
    TransactionManager = 0x0E,
    /// Login request.
    Login7 = 0x10,
    /// SSPI token continuation.
    Sspi = 0x11,
    /// PRELOGIN negotiation, also used to carry a classical TLS handshake.
    PreLogin = 0x12,
}

impl PacketType {
    /// Whether a client may send this type.
    #[must_use]
    pub const fn is_request(self) -> bool {
        !matches!(self, Self::TabularResult)
    }
}

impl TryFrom<u8> for PacketType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x01 => Self::SqlBatch,
            0x03 => Self::Rpc,
            0x04 => Self::TabularResult,
            0x06 => Self::Attention,
            0x07 => Self::BulkLoad,
            0x0E => Self::TransactionManager,
            0x10 => Self::Login7,
            0x11 => Self::Sspi,
            0x12 => Self::PreLogin,
            other => return Err(ProtocolError::InvalidPacketType(other)),
        })
    }
}

bitflags! {
    /// Status byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PacketStatus: u8 {
        /// Final packet of the message.
        const END_OF_MESSAGE = 0x01;
        /// Discard the message this packet ends.
        const IGNORE_EVENT = 0x02;
        /// Reset session state before running the request.
        const RESET_CONNECTION = 0x08;
        /// Reset session state but keep the open transaction.
        const RESET_CONNECTION_KEEP_TRANSACTION = 0x10;
    }
}

/// One decoded packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Message type.
    pub packet_type: PacketType,
    /// Status bits. Unknown bits are kept as received.
    pub status: PacketStatus,
    /// Packet length including the header.
    pub length: u16,
    /// Server process id; only meaningful on server packets.
    pub spid: u16,
    /// Sequence number within the message.
    pub packet_id: u8,
}

impl PacketHeader {
    /// Header with an explicit total length, spid 0 and packet id 0.
    #[must_use]
    pub const fn new(packet_type: PacketType, status: PacketStatus, length: u16) -> Self {
        Self {
            packet_type,
            status,
            length,
            spid: 0,
            packet_id: 0,
        }
    }

    /// Header for a packet carrying `payload` bytes.
    pub fn for_payload(
        packet_type: PacketType,
        status: PacketStatus,
        payload: usize,
    ) -> Result<Self, ProtocolError> {
        let total = payload + PACKET_HEADER_SIZE;
        let length =
            u16::try_from(total).map_err(|_| ProtocolError::InvalidPacketLength(total))?;
        Ok(Self::new(packet_type, status, length))
    }

    /// Same header with packet id `id`.
    #[must_use]
    pub const fn with_packet_id(mut self, id: u8) -> Self {
        self.packet_id = id;
        self
    }

    /// Read a header. Rejects unknown types and lengths shorter than the
    /// header.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        if src.remaining() < PACKET_HEADER_SIZE {
            return Err(ProtocolError::IncompletePacket {
                expected: PACKET_HEADER_SIZE,
                actual: src.remaining(),
            });
        }
        let packet_type = PacketType::try_from(src.get_u8())?;
        let status = PacketStatus::from_bits_retain(src.get_u8());
        let length = src.get_u16();
        let spid = src.get_u16();
        let packet_id = src.get_u8();
        src.advance(1);

        if usize::from(length) < PACKET_HEADER_SIZE {
            return Err(ProtocolError::InvalidPacketLength(usize::from(length)));
        }
        Ok(Self {
            packet_type,
            status,
            length,
            spid,
            packet_id,
        })
    }

    /// The eight header bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; PACKET_HEADER_SIZE] {
        let [len_hi, len_lo] = self.length.to_be_bytes();
        let [spid_hi, spid_lo] = self.spid.to_be_bytes();
        [
            self.packet_type as u8,
            self.status.bits(),
            len_hi,
            len_lo,
            spid_hi,
            spid_lo,
            self.packet_id,
            0,
        ]
    }

    /// Write the header to `dst`.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_slice(&self.to_bytes());
    }

    /// Bytes following the header.
    #[must_use]
    pub fn payload_length(&self) -> usize {
        usize::from(self.length).saturating_sub(PACKET_HEADER_SIZE)
    }

    /// Whether END_OF_MESSAGE is set.
    #[must_use]
    pub const fn is_end_of_message(&self) -> bool {
        self.status.contains(PacketStatus::END_OF_MESSAGE)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_length_is_big_endian() {
        let header = PacketHeader::for_payload(
            PacketType::Rpc,
            PacketStatus::END_OF_MESSAGE | PacketStatus::RESET_CONNECTION,
            92,
        )
        .unwrap()
        .with_packet_id(3);
        assert_eq!(header.to_bytes(), [0x03, 0x09, 0x00, 0x64, 0, 0, 3, 0]);
        assert_eq!(header.payload_length(), 92);
    }

    #[test]
    fn test_decode_keeps_spid_and_unknown_status_bits() {
        let raw = [0x04u8, 0x21, 0x00, 0x10, 0x00, 0x36, 1, 0];
        let header = PacketHeader::decode(&mut raw.as_ref()).unwrap();
        assert_eq!(header.packet_type, PacketType::TabularResult);
        assert_eq!(header.spid, 54);
        assert!(header.is_end_of_message());
        assert_eq!(header.status.bits(), 0x21);
    }

    #[test]
    fn test_rejects_bad_headers() {
        let short_len = [0x04u8, 0x01, 0x00, 0x04, 0, 0, 1, 0];
        assert_eq!(
            PacketHeader::decode(&mut short_len.as_ref()).unwrap_err(),
            ProtocolError::InvalidPacketLength(4)
        );
        let bad_type = [0x05u8, 0x01, 0x00, 0x08, 0, 0, 1, 0];
        assert_eq!(
            PacketHeader::decode(&mut bad_type.as_ref()).unwrap_err(),
            ProtocolError::InvalidPacketType(0x05)
        );
        assert!(PacketHeader::decode(&mut [0x04u8, 0x01].as_ref()).is_err());
        assert!(
            PacketHeader::for_payload(PacketType::SqlBatch, PacketStatus::empty(), MAX_PACKET_SIZE)
                .is_err()
        );
    }

    #[test]
    fn test_only_tabular_result_is_server_side() {
        assert!(PacketType::Attention.is_request());
        assert!(!PacketType::TabularResult.is_request());
    }

    proptest! {
        #[test]
        fn header_bytes_decode_back(
            ty in prop::sample::select(vec![0x01u8, 0x03, 0x04, 0x06, 0x07, 0x0E, 0x10, 0x11, 0x12]),
            status in any::<u8>(),
            length in 8u16..,
            spid in any::<u16>(),
            id in any::<u8>(),
        ) {
            let header = PacketHeader {
                packet_type: PacketType::try_from(ty).unwrap(),
                status: PacketStatus::from_bits_retain(status),
                length,
                spid,
                packet_id: id,
            };
            let bytes = header.to_bytes();
            prop_assert_eq!(PacketHeader::decode(&mut bytes.as_ref()).unwrap(), header);
        }
    }
}
