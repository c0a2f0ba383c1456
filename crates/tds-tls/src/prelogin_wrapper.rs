//! Frames a classical TLS handshake inside PRELOGIN packets.
//!
//! Before TDS 8.0 the server expects handshake records wrapped in TDS
//! packets of type PRELOGIN. The wrapper buffers what the TLS engine
//! writes, emits it on flush as one or more packets no larger than the
//! negotiated packet size (EOM on the last), and strips packet headers on
//! the way in. Once [`TlsPreloginWrapper::handshake_complete`] is called
//! it becomes a pass-through.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tds_wire::{PACKET_HEADER_SIZE, PacketHeader, PacketStatus, PacketType};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Stream adapter that speaks TLS records inside PRELOGIN packets.
#[derive(Debug)]
pub struct TlsPreloginWrapper<S> {
    stream: S,
    pending_handshake: bool,
    packet_size: usize,

    header: [u8; PACKET_HEADER_SIZE],
    header_pos: usize,
    read_remaining: usize,
    scratch: Vec<u8>,

    pending: Vec<u8>,
    out: Vec<u8>,
    out_pos: usize,
}

impl<S> TlsPreloginWrapper<S> {
    /// Wrap `stream`, framing handshake traffic in packets of at most `packet_size` bytes.
    pub fn new(stream: S, packet_size: usize) -> Self {
        Self {
            stream,
            pending_handshake: true,
            packet_size: packet_size.max(PACKET_HEADER_SIZE + 1),
            header: [0u8; PACKET_HEADER_SIZE],
            header_pos: 0,
            read_remaining: 0,
            scratch: Vec::new(),
            pending: Vec::new(),
            out: Vec::new(),
            out_pos: 0,
        }
    }

    /// Stop framing; subsequent I/O goes straight to the inner stream.
    pub fn handshake_complete(&mut self) {
        self.pending_handshake = false;
    }

    /// Whether the handshake is still being framed.
    pub fn is_framing(&self) -> bool {
        self.pending_handshake
    }

    /// Get a reference to the underlying stream.
    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Get a mutable reference to the underlying stream.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Consume the wrapper and return the underlying stream.
    pub fn into_inner(self) -> S {
        self.stream
    }

    fn frame_pending(&mut self) {
        let max_payload = self.packet_size - PACKET_HEADER_SIZE;
        let mut chunks = self.pending.chunks(max_payload).peekable();
        let mut packet_id: u8 = 1;
        while let Some(chunk) = chunks.next() {
            let status = if chunks.peek().is_none() {
                PacketStatus::END_OF_MESSAGE
            } else {
                PacketStatus::empty()
            };
            PacketHeader::new(
                PacketType::PreLogin,
                status,
                (chunk.len() + PACKET_HEADER_SIZE) as u16,
            )
            .with_packet_id(packet_id)
            .encode(&mut self.out);
            self.out.extend_from_slice(chunk);
            packet_id = packet_id.wrapping_add(1);
        }
        tracing::trace!(
            bytes = self.pending.len(),
            framed = self.out.len(),
            "TLS wrapper: framed handshake data"
        );
        self.pending.clear();
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for TlsPreloginWrapper<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if !this.pending_handshake {
            return Pin::new(&mut this.stream).poll_read(cx, buf);
        }

        loop {
            while this.header_pos < PACKET_HEADER_SIZE {
                let mut header_buf = ReadBuf::new(&mut this.header[this.header_pos..]);
                match Pin::new(&mut this.stream).poll_read(cx, &mut header_buf)? {
                    Poll::Ready(()) => {
                        let n = header_buf.filled().len();
                        if n == 0 {
                            return Poll::Ready(Ok(()));
                        }
                        this.header_pos += n;
                        if this.header_pos == PACKET_HEADER_SIZE {
                            let header = PacketHeader::decode(&mut &this.header[..])
                                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                            if !matches!(
                                header.packet_type,
                                PacketType::PreLogin | PacketType::TabularResult
                            ) {
                                return Poll::Ready(Err(io::Error::new(
                                    io::ErrorKind::InvalidData,
                                    crate::TlsError::UnexpectedPacket(header.packet_type as u8),
                                )));
                            }
                            this.read_remaining = header.payload_length();
                            tracing::trace!(
                                payload = this.read_remaining,
                                "TLS wrapper: reading packet"
                            );
                        }
                    }
                    Poll::Pending => return Poll::Pending,
                }
            }

            // empty packets carry nothing for the TLS engine
            if this.read_remaining == 0 {
                this.header_pos = 0;
                continue;
            }
            break;
        }

        let max_read = this.read_remaining.min(buf.remaining());
        if max_read == 0 {
            return Poll::Ready(Ok(()));
        }

        this.scratch.resize(max_read, 0);
        let mut scratch = ReadBuf::new(&mut this.scratch[..]);
        match Pin::new(&mut this.stream).poll_read(cx, &mut scratch)? {
            Poll::Ready(()) => {
                let n = scratch.filled().len();
                if n > 0 {
                    buf.put_slice(scratch.filled());
                    this.read_remaining -= n;
                    if this.read_remaining == 0 {
                        this.header_pos = 0;
                    }
                }
                Poll::Ready(Ok(()))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for TlsPreloginWrapper<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        if !this.pending_handshake {
            return Pin::new(&mut this.stream).poll_write(cx, buf);
        }

        this.pending.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.out.is_empty() && !this.pending.is_empty() {
            this.frame_pending();
            this.out_pos = 0;
        }

        while this.out_pos < this.out.len() {
            match Pin::new(&mut this.stream).poll_write(cx, &this.out[this.out_pos..])? {
                Poll::Ready(0) => return Poll::Ready(Err(io::ErrorKind::WriteZero.into())),
                Poll::Ready(n) => this.out_pos += n,
                Poll::Pending => return Poll::Pending,
            }
        }
        this.out.clear();
        this.out_pos = 0;

        Pin::new(&mut this.stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}
