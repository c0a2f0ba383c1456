//! Single-packet framing for `tokio-util` codecs.
//!
//! [`TdsCodec`] turns a byte stream into [`Packet`]s and back. It does not
//! reassemble messages; see [`MessageAssembler`](crate::MessageAssembler)
//! and [`MessageReader`](crate::MessageReader) for that.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tds_wire::{MAX_PACKET_SIZE, PACKET_HEADER_SIZE, PacketHeader};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CodecError;

/// One packet: header plus the bytes after it.
#[derive(Debug, Clone)]
pub struct Packet {
    /// Header as received, or as the sender wants it sent. The encoder
    /// overwrites `length`.
    pub header: PacketHeader,
    /// Bytes after the header.
    pub payload: Bytes,
}

impl Packet {
    /// Pair a header with its payload.
    #[must_use]
    pub fn new(header: PacketHeader, payload: impl Into<Bytes>) -> Self {
        Self {
            header,
            payload: payload.into(),
        }
    }

    /// Whether END_OF_MESSAGE is set.
    #[must_use]
    pub fn is_end_of_message(&self) -> bool {
        self.header.is_end_of_message()
    }
}

/// Packet codec with an upper bound on packet length.
///
/// The encoder fills in the length field and keeps the caller's packet id;
/// numbering is the job of [`MessageWriter`](crate::MessageWriter).
#[derive(Debug, Clone, Copy)]
pub struct TdsCodec {
    limit: usize,
}

impl TdsCodec {
    /// Codec accepting any length the header can express.
    #[must_use]
    pub fn new() -> Self {
        Self {
            limit: MAX_PACKET_SIZE,
        }
    }

    /// Codec rejecting packets longer than `size`, header included.
    #[must_use]
    pub fn with_max_packet_size(size: usize) -> Self {
        Self {
            limit: size.clamp(PACKET_HEADER_SIZE, MAX_PACKET_SIZE),
        }
    }

    /// Longest packet accepted, header included.
    #[must_use]
    pub fn max_packet_size(&self) -> usize {
        self.limit
    }

    fn check(&self, size: usize) -> Result<(), CodecError> {
        if size > self.limit {
            return Err(CodecError::PacketTooLarge {
                size,
                max: self.limit,
            });
        }
        Ok(())
    }
}

impl Default for TdsCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for TdsCodec {
    type Item = Packet;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, CodecError> {
        let Some(head) = src.get(..PACKET_HEADER_SIZE) else {
            return Ok(None);
        };
        let header = PacketHeader::decode(&mut &head[..])?;
        let length = usize::from(header.length);
        self.check(length)?;
        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        src.advance(PACKET_HEADER_SIZE);
        let payload = src.split_to(length - PACKET_HEADER_SIZE).freeze();
        tracing::trace!(
            ty = ?header.packet_type,
            len = length,
            id = header.packet_id,
            eom = header.is_end_of_message(),
            "packet in"
        );
        Ok(Some(Packet { header, payload }))
    }
}

impl Encoder<Packet> for TdsCodec {
    type Error = CodecError;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<(), CodecError> {
        let Packet { header, payload } = packet;
        self.check(payload.len() + PACKET_HEADER_SIZE)?;
        let header = PacketHeader::for_payload(header.packet_type, header.status, payload.len())?
            .with_packet_id(header.packet_id);

        dst.reserve(usize::from(header.length));
        header.encode(dst);
        dst.put(payload);
        tracing::trace!(
            ty = ?header.packet_type,
            len = header.length,
            id = header.packet_id,
            eom = header.is_end_of_message(),
            "packet out"
        );
        Ok(())
    }
}
