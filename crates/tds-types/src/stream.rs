//! Streamed `(max)` parameter values.
//!
//! A [`ParamStream`] hands a reader to the request writer, which pulls it
//! in pieces and frames each piece as a PLP chunk behind an unknown total
//! length. [`PlpStreamEncoder`] does the per-chunk conversion: bytes pass
//! through, text arrives as UTF-8 and leaves as UTF-16LE or in the
//! column's code page. A UTF-8 sequence cut by a read boundary is held
//! back until the rest of it arrives.

use std::fmt;
use std::sync::Arc;

use bytes::BufMut;
use tds_wire::utf16::encode_utf16;
use tds_wire::{Collation, TypeId};
use tokio::io::AsyncRead;
use tokio::sync::Mutex;

use crate::encode::{write_plp_chunk, write_plp_header, write_plp_terminator};
use crate::error::TypeError;
use crate::type_info::TypeInfo;

/// Reader behind a streamed parameter.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// A reader that supplies a parameter value while the request is sent.
///
/// Clones share the reader. It can be consumed once; sending the same
/// command again fails with [`TypeError::StreamConsumed`].
#[derive(Clone)]
pub struct ParamStream {
    reader: Arc<Mutex<Option<BoxedReader>>>,
}

impl ParamStream {
    /// Wrap `reader`.
    pub fn new(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            reader: Arc::new(Mutex::new(Some(Box::new(reader)))),
        }
    }

    /// Take the reader out, leaving the stream consumed.
    pub async fn take(&self) -> Result<BoxedReader, TypeError> {
        self.reader.lock().await.take().ok_or(TypeError::StreamConsumed)
    }
}

impl fmt::Debug for ParamStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParamStream").finish_non_exhaustive()
    }
}

impl PartialEq for ParamStream {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.reader, &other.reader)
    }
}

#[derive(Debug, Clone, Copy)]
enum Target {
    Bytes,
    Utf16,
    CodePage(Collation),
}

/// Converts streamed input into PLP chunks for one column type.
#[derive(Debug)]
pub struct PlpStreamEncoder {
    target: Target,
    pending: Vec<u8>,
    written: u64,
}

impl PlpStreamEncoder {
    /// Encoder for a value declared as `info`. Only `(max)` types and
    /// `xml` take streamed values.
    pub fn for_type(info: &TypeInfo) -> Result<Self, TypeError> {
        if !info.is_plp() {
            return Err(TypeError::unsupported("stream", info.props().name));
        }
        let target = match info.id {
            TypeId::NVarChar | TypeId::NChar | TypeId::Xml => Target::Utf16,
            TypeId::BigVarChar | TypeId::BigChar | TypeId::VarChar | TypeId::Char => {
                Target::CodePage(info.collation.unwrap_or_default())
            }
            _ => Target::Bytes,
        };
        Ok(Self {
            target,
            pending: Vec::new(),
            written: 0,
        })
    }

    /// Write the unknown-length PLP header that precedes the chunks.
    pub fn begin(&self, dst: &mut impl BufMut) {
        write_plp_header(dst, None);
    }

    /// Convert one piece of input and write it as a chunk. Input that ends
    /// inside a UTF-8 sequence keeps the incomplete tail for the next call.
    pub fn push(&mut self, input: &[u8], dst: &mut impl BufMut) -> Result<(), TypeError> {
        let chunk = match self.target {
            Target::Bytes => {
                write_plp_chunk(dst, input);
                self.written += input.len() as u64;
                return Ok(());
            }
            Target::Utf16 => encode_utf16(&self.complete_text(input)?),
            Target::CodePage(collation) => collation.encode_text(&self.complete_text(input)?),
        };
        write_plp_chunk(dst, &chunk);
        self.written += chunk.len() as u64;
        Ok(())
    }

    /// Write the terminator. Fails when the input ended mid-character.
    pub fn finish(self, dst: &mut impl BufMut) -> Result<u64, TypeError> {
        if !self.pending.is_empty() {
            return Err(TypeError::InvalidUtf8);
        }
        write_plp_terminator(dst);
        Ok(self.written)
    }

    fn complete_text(&mut self, input: &[u8]) -> Result<String, TypeError> {
        self.pending.extend_from_slice(input);
        let valid = match std::str::from_utf8(&self.pending) {
            Ok(_) => self.pending.len(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(_) => return Err(TypeError::InvalidUtf8),
        };
        let tail = self.pending.split_off(valid);
        let head = std::mem::replace(&mut self.pending, tail);
        String::from_utf8(head).map_err(|_| TypeError::InvalidUtf8)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::decode::{PLP_UNKNOWN, PlpReader};
    use tokio::io::AsyncReadExt;

    fn nvarchar_max() -> TypeInfo {
        TypeInfo::for_sql_type(tds_wire::SqlType::NVarChar(None), Collation::default())
    }

    fn read_back(wire: &[u8]) -> Vec<u8> {
        let mut src = wire;
        let reader = PlpReader::new(&mut src).unwrap();
        reader.read_all().unwrap().unwrap().to_vec()
    }

    #[test]
    fn test_chunks_behind_unknown_length() {
        let info = TypeInfo::for_sql_type(tds_wire::SqlType::VarBinary(None), Collation::default());
        let mut encoder = PlpStreamEncoder::for_type(&info).unwrap();
        let mut out = Vec::new();
        encoder.begin(&mut out);
        encoder.push(b"abc", &mut out).unwrap();
        encoder.push(b"", &mut out).unwrap();
        encoder.push(b"de", &mut out).unwrap();
        assert_eq!(encoder.finish(&mut out).unwrap(), 5);

        assert_eq!(&out[..8], &PLP_UNKNOWN.to_le_bytes());
        assert_eq!(&out[8..12], &[3, 0, 0, 0]);
        assert_eq!(&out[15..19], &[2, 0, 0, 0]);
        assert_eq!(&out[out.len() - 4..], &[0, 0, 0, 0]);
        assert_eq!(read_back(&out), b"abcde");
    }

    #[test]
    fn test_split_character_is_carried() {
        // "é😀" cut inside both characters
        let text = "é😀".as_bytes();
        let mut encoder = PlpStreamEncoder::for_type(&nvarchar_max()).unwrap();
        let mut out = Vec::new();
        encoder.begin(&mut out);
        for piece in [&text[..1], &text[1..4], &text[4..]] {
            encoder.push(piece, &mut out).unwrap();
        }
        encoder.finish(&mut out).unwrap();

        let utf16 = read_back(&out);
        assert_eq!(utf16, encode_utf16("é😀"));
    }

    #[test]
    fn test_truncated_or_invalid_text_fails() {
        let mut encoder = PlpStreamEncoder::for_type(&nvarchar_max()).unwrap();
        let mut out = Vec::new();
        encoder.push(&"😀".as_bytes()[..2], &mut out).unwrap();
        assert_eq!(encoder.finish(&mut out), Err(TypeError::InvalidUtf8));

        let mut encoder = PlpStreamEncoder::for_type(&nvarchar_max()).unwrap();
        assert_eq!(encoder.push(&[b'a', 0xFF, b'b'], &mut out), Err(TypeError::InvalidUtf8));
    }

    #[test]
    fn test_varchar_max_uses_code_page() {
        let info = TypeInfo::for_sql_type(tds_wire::SqlType::VarChar(None), Collation::default());
        let mut encoder = PlpStreamEncoder::for_type(&info).unwrap();
        let mut out = Vec::new();
        encoder.begin(&mut out);
        encoder.push("caf".as_bytes(), &mut out).unwrap();
        encoder.push("é".as_bytes(), &mut out).unwrap();
        encoder.finish(&mut out).unwrap();
        assert_eq!(read_back(&out), b"caf\xE9");
    }

    #[test]
    fn test_bounded_type_rejected() {
        let info = TypeInfo::for_sql_type(tds_wire::SqlType::NVarChar(Some(10)), Collation::default());
        assert!(matches!(
            PlpStreamEncoder::for_type(&info),
            Err(TypeError::UnsupportedConversion { from: "stream", .. })
        ));
    }

    #[tokio::test]
    async fn test_stream_is_taken_once() {
        let stream = ParamStream::new(&b"payload"[..]);
        let shared = stream.clone();
        assert_eq!(stream, shared);

        let mut reader = shared.take().await.unwrap();
        let mut text = String::new();
        reader.read_to_string(&mut text).await.unwrap();
        assert_eq!(text, "payload");
        assert!(matches!(stream.take().await, Err(TypeError::StreamConsumed)));
    }
}
