//! Inbound message reader.
//!
//! A logical message arrives as a run of packets sharing one type; the last
//! one carries END_OF_MESSAGE. [`MessageReader`] hides packet boundaries:
//! callers fetch contiguous byte runs of the message body and the reader
//! strips headers as it crosses them. Once the EOM packet is exhausted,
//! every read reports [`CodecError::EndOfMessage`] until the next
//! [`MessageReader::begin_message`].

use bytes::{Bytes, BytesMut};
use tds_wire::{PACKET_HEADER_SIZE, PacketHeader, PacketType};
use tokio::io::AsyncRead;

use crate::buffer::{Interrupt, StreamBuffer};
use crate::error::CodecError;

/// Reassembles inbound packets into a logical message.
#[derive(Debug)]
pub struct MessageReader<R> {
    buffer: StreamBuffer<R>,
    expected: Option<PacketType>,
    remaining: usize,
    eom: bool,
    packets: usize,
    spid: u16,
}

impl<R> MessageReader<R> {
    /// Wrap a transport with a read buffer of `capacity` bytes.
    pub fn new(inner: R, capacity: usize) -> Self {
        Self {
            buffer: StreamBuffer::new(inner, capacity),
            expected: None,
            remaining: 0,
            eom: true,
            packets: 0,
            spid: 0,
        }
    }

    /// Start reading a new message whose packets must all be `expected`.
    pub fn begin_message(&mut self, expected: PacketType) {
        self.expected = Some(expected);
        self.remaining = 0;
        self.eom = false;
        self.packets = 0;
    }

    /// Whether the current message has been read to its end.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.remaining == 0 && self.eom
    }

    /// Packets read so far in the current message.
    #[must_use]
    pub fn packets(&self) -> usize {
        self.packets
    }

    /// SPID reported in the most recent packet header.
    #[must_use]
    pub fn spid(&self) -> u16 {
        self.spid
    }

    /// Largest run [`fetch`](Self::fetch) can return.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Observe `interrupt` while waiting for data.
    pub fn set_interrupt(&mut self, interrupt: Interrupt) {
        self.buffer.set_interrupt(interrupt);
    }

    /// Stop observing any interrupt.
    pub fn clear_interrupt(&mut self) {
        self.buffer.clear_interrupt();
    }

    /// Return the transport. Buffered bytes are discarded.
    pub fn into_inner(self) -> R {
        self.buffer.into_inner()
    }
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    async fn read_header(&mut self) -> Result<(), CodecError> {
        let raw = self.buffer.next(PACKET_HEADER_SIZE).await?;
        let header = PacketHeader::decode(&mut &raw[..PACKET_HEADER_SIZE])?;
        self.buffer.used(PACKET_HEADER_SIZE)?;

        if let Some(expected) = self.expected {
            if header.packet_type != expected {
                return Err(CodecError::UnexpectedPacketType {
                    expected,
                    received: header.packet_type,
                });
            }
        }

        self.remaining = header.payload_length();
        self.eom = header.is_end_of_message();
        self.spid = header.spid;
        self.packets += 1;

        tracing::trace!(
            packet_type = ?header.packet_type,
            length = header.length,
            packet_id = header.packet_id,
            is_eom = self.eom,
            "read packet"
        );
        Ok(())
    }

    /// Make sure the current packet has unread body bytes.
    ///
    /// Returns `false` at the end of the message.
    async fn ensure_packet(&mut self) -> Result<bool, CodecError> {
        while self.remaining == 0 {
            if self.eom {
                return Ok(false);
            }
            self.read_header().await?;
        }
        Ok(true)
    }

    /// Body of the next packet, or `None` once the message is complete.
    ///
    /// Unread bytes of the current packet are skipped.
    pub async fn next_packet(&mut self) -> Result<Option<Bytes>, CodecError> {
        if self.remaining > 0 {
            self.skip(self.remaining).await?;
        }
        if self.eom {
            return Ok(None);
        }
        self.read_header().await?;
        let body = self.buffer.take(self.remaining).await?;
        self.remaining = 0;
        Ok(Some(body))
    }

    /// Read `n` contiguous bytes of the message body.
    ///
    /// Runs that span packet boundaries are copied together. `n` must not
    /// exceed the buffer capacity.
    pub async fn fetch(&mut self, n: usize) -> Result<Bytes, CodecError> {
        if n > self.buffer.capacity() {
            return Err(CodecError::RequestTooLarge {
                requested: n,
                capacity: self.buffer.capacity(),
            });
        }
        if !self.ensure_packet().await? {
            return Err(CodecError::EndOfMessage);
        }
        if self.remaining >= n {
            self.remaining -= n;
            return self.buffer.take(n).await;
        }
        let mut out = BytesMut::with_capacity(n);
        self.read_into(&mut out, n).await?;
        Ok(out.freeze())
    }

    /// Append `n` bytes of the message body to `dst`, with no size limit.
    pub async fn read_into(&mut self, dst: &mut BytesMut, n: usize) -> Result<(), CodecError> {
        let mut need = n;
        while need > 0 {
            if !self.ensure_packet().await? {
                return Err(CodecError::EndOfMessage);
            }
            let want = need.min(self.remaining);
            let window = self.buffer.next_some(want).await?;
            let k = window.len();
            dst.extend_from_slice(window);
            self.buffer.used(k)?;
            self.remaining -= k;
            need -= k;
        }
        Ok(())
    }

    /// Up to `max` bytes from the current packet, or `None` at end of message.
    pub async fn read_chunk(&mut self, max: usize) -> Result<Option<Bytes>, CodecError> {
        if !self.ensure_packet().await? {
            return Ok(None);
        }
        let want = max.min(self.remaining);
        let window = self.buffer.next_some(want).await?;
        let chunk = Bytes::copy_from_slice(window);
        self.buffer.used(chunk.len())?;
        self.remaining -= chunk.len();
        Ok(Some(chunk))
    }

    /// Discard `n` bytes of the message body.
    pub async fn skip(&mut self, n: usize) -> Result<(), CodecError> {
        let mut need = n;
        while need > 0 {
            if !self.ensure_packet().await? {
                return Err(CodecError::EndOfMessage);
            }
            let want = need.min(self.remaining);
            let k = self.buffer.next_some(want).await?.len();
            self.buffer.used(k)?;
            self.remaining -= k;
            need -= k;
        }
        Ok(())
    }

    /// Look at the next body byte without consuming it.
    pub async fn peek_u8(&mut self) -> Result<Option<u8>, CodecError> {
        if !self.ensure_packet().await? {
            return Ok(None);
        }
        Ok(Some(self.buffer.next(1).await?[0]))
    }

    /// Discard the rest of the message.
    pub async fn drain(&mut self) -> Result<(), CodecError> {
        while self.next_packet().await?.is_some() {}
        Ok(())
    }

    /// Read a fixed-size array, crossing packets if needed.
    pub async fn read_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        if !self.ensure_packet().await? {
            return Err(CodecError::EndOfMessage);
        }
        if self.remaining >= N {
            let window = self.buffer.next(N).await?;
            out.copy_from_slice(&window[..N]);
            self.buffer.used(N)?;
            self.remaining -= N;
        } else {
            let bytes = self.fetch(N).await?;
            out.copy_from_slice(&bytes);
        }
        Ok(out)
    }

    /// Read one byte.
    pub async fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.read_array::<1>().await?[0])
    }

    /// Read a little-endian `u16`.
    pub async fn read_u16_le(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_le_bytes(self.read_array().await?))
    }

    /// Read a little-endian `u32`.
    pub async fn read_u32_le(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.read_array().await?))
    }

    /// Read a little-endian `i32`.
    pub async fn read_i32_le(&mut self) -> Result<i32, CodecError> {
        Ok(i32::from_le_bytes(self.read_array().await?))
    }

    /// Read a little-endian `u64`.
    pub async fn read_u64_le(&mut self) -> Result<u64, CodecError> {
        Ok(u64::from_le_bytes(self.read_array().await?))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tds_wire::PacketStatus;

    fn packet(ty: PacketType, eom: bool, body: &[u8]) -> Vec<u8> {
        let status = if eom {
            PacketStatus::END_OF_MESSAGE
        } else {
            PacketStatus::empty()
        };
        let header = PacketHeader::new(ty, status, (PACKET_HEADER_SIZE + body.len()) as u16);
        let mut out = Vec::new();
        header.encode(&mut out);
        out.extend_from_slice(body);
        out
    }

    #[tokio::test]
    async fn test_fetch_across_packets() {
        let mut wire = packet(PacketType::TabularResult, false, b"hello ");
        wire.extend(packet(PacketType::TabularResult, true, b"world"));
        let mock = tokio_test::io::Builder::new().read(&wire).build();

        let mut reader = MessageReader::new(mock, 64);
        reader.begin_message(PacketType::TabularResult);
        assert_eq!(reader.fetch(3).await.unwrap(), Bytes::from_static(b"hel"));
        assert_eq!(reader.fetch(6).await.unwrap(), Bytes::from_static(b"lo wor"));
        assert_eq!(reader.read_u16_le().await.unwrap(), u16::from_le_bytes(*b"ld"));
        assert!(reader.is_done());
        assert_eq!(reader.packets(), 2);
        assert!(matches!(reader.fetch(1).await, Err(CodecError::EndOfMessage)));
        assert_eq!(reader.peek_u8().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unexpected_packet_type() {
        let wire = packet(PacketType::PreLogin, true, b"x");
        let mock = tokio_test::io::Builder::new().read(&wire).build();

        let mut reader = MessageReader::new(mock, 64);
        reader.begin_message(PacketType::TabularResult);
        assert!(matches!(
            reader.read_u8().await,
            Err(CodecError::UnexpectedPacketType {
                expected: PacketType::TabularResult,
                received: PacketType::PreLogin,
            })
        ));
    }

    #[tokio::test]
    async fn test_next_packet_and_begin_resets() {
        let mut wire = packet(PacketType::TabularResult, false, b"ab");
        wire.extend(packet(PacketType::TabularResult, true, b"cd"));
        wire.extend(packet(PacketType::TabularResult, true, b"ef"));
        let mock = tokio_test::io::Builder::new().read(&wire).build();

        let mut reader = MessageReader::new(mock, 64);
        reader.begin_message(PacketType::TabularResult);
        assert_eq!(reader.peek_u8().await.unwrap(), Some(b'a'));
        assert_eq!(reader.next_packet().await.unwrap().unwrap(), Bytes::from_static(b"cd"));
        assert_eq!(reader.next_packet().await.unwrap(), None);

        reader.begin_message(PacketType::TabularResult);
        assert_eq!(reader.read_u8().await.unwrap(), b'e');
        reader.drain().await.unwrap();
        assert!(reader.is_done());
    }

    #[tokio::test]
    async fn test_read_into_larger_than_capacity() {
        let mut wire = Vec::new();
        for i in 0..4u8 {
            wire.extend(packet(PacketType::TabularResult, i == 3, &[i; 20]));
        }
        let mock = tokio_test::io::Builder::new().read(&wire).build();

        let mut reader = MessageReader::new(mock, 32);
        reader.begin_message(PacketType::TabularResult);
        assert!(reader.fetch(40).await.is_err());

        let mut out = BytesMut::new();
        reader.read_into(&mut out, 80).await.unwrap();
        assert_eq!(out.len(), 80);
        assert_eq!(out[79], 3);
        assert!(reader.is_done());
    }
}
