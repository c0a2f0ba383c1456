//! RPC requests with streamed parameters.
//!
//! Buffered parameters are encoded up front. A streamed parameter is
//! encoded up to its unknown PLP length, and its reader is drained into
//! PLP chunks while the message is being written, so the value never has
//! to be held in memory.

use bytes::{Bytes, BytesMut};
use tds_codec::{CodecError, MessageWriter};
use tds_types::{ParamStream, PlpStreamEncoder};
use tds_wire::rpc::BATCH_FLAG;
use tds_wire::{RpcRequest, RpcTarget};
use tokio::io::{AsyncReadExt, AsyncWrite};

use crate::error::Error;

/// Bytes requested from a parameter reader per read.
pub const STREAM_READ_SIZE: usize = 8192;

pub(crate) enum RpcPart {
    Encoded(Bytes),
    Streamed {
        name: String,
        head: Bytes,
        stream: ParamStream,
        encoder: PlpStreamEncoder,
    },
}

/// An RPC request whose parameters are partly read from streams.
pub struct StreamedRpc {
    rpc: RpcRequest,
    parts: Vec<RpcPart>,
}

/// Why writing a streamed request stopped.
#[derive(Debug)]
pub(crate) enum UploadError {
    /// A parameter source failed; the transport is intact.
    Source(Error),
    /// The transport failed.
    Transport(CodecError),
}

impl StreamedRpc {
    pub(crate) fn new(rpc: RpcRequest) -> Self {
        Self {
            rpc,
            parts: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, part: RpcPart) {
        self.parts.push(part);
    }

    /// Procedure this request calls.
    #[must_use]
    pub fn target(&self) -> &RpcTarget {
        self.rpc.target()
    }

    /// Number of parameters fed from a reader.
    #[must_use]
    pub fn streamed_params(&self) -> usize {
        self.parts
            .iter()
            .filter(|p| matches!(p, RpcPart::Streamed { .. }))
            .count()
    }

    /// Write the body into the message `writer` has begun, then end it.
    pub(crate) async fn write<W>(
        self,
        writer: &mut MessageWriter<W>,
        transaction_descriptor: u64,
    ) -> Result<(), UploadError>
    where
        W: AsyncWrite + Unpin,
    {
        let mut head = BytesMut::new();
        self.rpc
            .encode_head(&mut head, transaction_descriptor)
            .map_err(|e| UploadError::Source(e.into()))?;
        writer.write(&head).await.map_err(UploadError::Transport)?;

        for part in self.parts {
            match part {
                RpcPart::Encoded(bytes) => {
                    writer.write(&bytes).await.map_err(UploadError::Transport)?;
                }
                RpcPart::Streamed {
                    name,
                    head,
                    stream,
                    encoder,
                } => {
                    writer.write(&head).await.map_err(UploadError::Transport)?;
                    pump(writer, &name, &stream, encoder).await?;
                }
            }
        }

        writer
            .write(&[BATCH_FLAG])
            .await
            .map_err(UploadError::Transport)?;
        writer.end_message().await.map_err(UploadError::Transport)
    }
}

impl std::fmt::Debug for StreamedRpc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamedRpc")
            .field("target", self.rpc.target())
            .field("parts", &self.parts.len())
            .finish()
    }
}

async fn pump<W>(
    writer: &mut MessageWriter<W>,
    name: &str,
    stream: &ParamStream,
    mut encoder: PlpStreamEncoder,
) -> Result<(), UploadError>
where
    W: AsyncWrite + Unpin,
{
    let failed = |reason: String| {
        UploadError::Source(Error::StreamAborted {
            param: name.to_owned(),
            reason,
        })
    };
    let mut reader = stream.take().await.map_err(|e| failed(e.to_string()))?;
    let mut input = vec![0u8; STREAM_READ_SIZE];
    let mut chunk = BytesMut::with_capacity(STREAM_READ_SIZE * 2 + 4);
    loop {
        let n = reader
            .read(&mut input)
            .await
            .map_err(|e| failed(e.to_string()))?;
        if n == 0 {
            break;
        }
        encoder
            .push(&input[..n], &mut chunk)
            .map_err(|e| failed(e.to_string()))?;
        writer
            .write(&chunk.split())
            .await
            .map_err(UploadError::Transport)?;
    }
    let total = encoder
        .finish(&mut chunk)
        .map_err(|e| failed(e.to_string()))?;
    tracing::trace!(param = name, bytes = total, "parameter stream sent");
    writer
        .write(&chunk.split())
        .await
        .map_err(UploadError::Transport)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use tds_codec::PacketConnection;
    use tds_types::{Param, Value, decode_param};
    use tds_wire::{Collation, PacketType, SqlType};
    use tokio::io::{AsyncRead, ReadBuf};

    use crate::command::Command;

    struct Broken;

    impl AsyncRead for Broken {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::other("disk gone")))
        }
    }

    async fn send(request: StreamedRpc) -> (Result<(), UploadError>, Vec<u8>, usize) {
        let (client, server) = tokio::io::duplex(1 << 12);
        let mut sender = PacketConnection::with_packet_size(client, 512);
        let mut receiver = PacketConnection::new(server);

        let send = async move {
            sender.writer().begin_message(PacketType::Rpc, false);
            let result = request.write(sender.writer(), 0).await;
            if matches!(result, Err(UploadError::Source(_))) {
                sender.writer().abandon_message().await.unwrap();
            }
            (result, sender)
        };
        let recv = async move {
            receiver.reader().begin_message(PacketType::Rpc);
            let mut body = Vec::new();
            while let Some(packet) = receiver.reader().next_packet().await.unwrap() {
                body.extend_from_slice(&packet);
            }
            (body, receiver.reader().packets())
        };
        let ((result, _sender), (body, packets)) = tokio::join!(send, recv);
        (result, body, packets)
    }

    #[tokio::test]
    async fn test_streamed_param_between_buffered_ones() {
        let text = "0123456789".repeat(300);
        let request = Command::procedure("dbo.store")
            .param("id", 7i32)
            .bind(Param::stream("doc", std::io::Cursor::new(text.clone().into_bytes())))
            .param("tail", "end")
            .to_streamed_rpc(Collation::default())
            .unwrap();
        assert_eq!(request.streamed_params(), 1);

        let (result, body, packets) = send(request).await;
        result.unwrap();
        assert!(packets > 1);

        // ALL_HEADERS, "dbo.store" and the option flags
        let mut src = &body[22 + 2 + 18 + 2..];
        assert_eq!(decode_param(&mut src).unwrap().value, Value::I32(7));
        let doc = decode_param(&mut src).unwrap();
        assert_eq!(doc.name, "@doc");
        assert_eq!(doc.value, Value::String(text));
        assert_eq!(decode_param(&mut src).unwrap().value, Value::String("end".into()));
        assert_eq!(src, &[BATCH_FLAG][..]);
    }

    #[tokio::test]
    async fn test_failing_source_is_reported_without_breaking_transport() {
        let request = Command::procedure("dbo.store")
            .bind(
                Param::stream("blob", (&b"partial"[..]).chain(Broken))
                    .with_type(SqlType::VarBinary(None)),
            )
            .to_streamed_rpc(Collation::default())
            .unwrap();

        let (result, _body, _packets) = send(request).await;
        let Err(UploadError::Source(err)) = result else {
            panic!("expected a source failure, got {result:?}");
        };
        assert!(matches!(err, Error::StreamAborted { ref param, .. } if param == "@blob"));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_consumed_stream_fails_second_send() {
        let command = Command::procedure("dbo.store")
            .bind(Param::stream("doc", &b"once"[..]).with_type(SqlType::VarBinary(None)));

        let (first, ..) = send(command.to_streamed_rpc(Collation::default()).unwrap()).await;
        first.unwrap();
        let (second, ..) = send(command.to_streamed_rpc(Collation::default()).unwrap()).await;
        assert!(matches!(
            second,
            Err(UploadError::Source(Error::StreamAborted { .. }))
        ));
    }
}
