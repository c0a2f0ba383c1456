//! Row value decoding.
//!
//! A value's bytes are found by its [`ValueLayout`]: fixed types take their
//! width, prefixed types carry a 1, 2 or 4 byte length whose sentinel marks
//! NULL, `(max)` types arrive as PLP chunks and legacy blobs sit behind a
//! text pointer. [`decode_fixed`] and [`decode_var`] interpret the bytes
//! once they are in hand; [`decode_column`] does both steps over an
//! in-memory buffer.

use bytes::{Buf, Bytes, BytesMut};
use tds_wire::utf16::{decode_utf16_lossy, read_b_varchar};
use tds_wire::{Collation, ParamStatus, ProtocolError, TypeId};
use uuid::Uuid;

use crate::error::TypeError;
use crate::numeric::Numeric;
use crate::temporal;
use crate::type_info::{TypeInfo, ValueLayout};
use crate::value::{Value, XmlData};

/// PLP total length of a NULL value.
pub const PLP_NULL: u64 = u64::MAX;

/// PLP total length when the sender does not know it up front.
pub const PLP_UNKNOWN: u64 = u64::MAX - 1;

/// Total length announced by a PLP value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlpLength {
    /// The value is NULL; no chunks follow.
    Null,
    /// Chunks follow until a zero-length terminator.
    Unknown,
    /// Exactly this many bytes follow in chunks.
    Known(u64),
}

impl PlpLength {
    /// Interpret the 8-byte total length.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        match raw {
            PLP_NULL => Self::Null,
            PLP_UNKNOWN => Self::Unknown,
            n => Self::Known(n),
        }
    }
}

/// One piece of a chunked value. The last piece has `more == false`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Bytes of this piece.
    pub data: Bytes,
    /// Whether more pieces follow.
    pub more: bool,
}

fn need(src: &impl Buf, n: usize) -> Result<(), TypeError> {
    if src.remaining() < n {
        return Err(ProtocolError::IncompletePacket {
            expected: n,
            actual: src.remaining(),
        }
        .into());
    }
    Ok(())
}

/// Reads PLP chunks from a buffer.
///
/// Each chunk length is read ahead so the final chunk can be flagged with
/// `more == false`. A value announced with a known length that arrives as
/// one chunk therefore yields a single non-chunked piece.
#[derive(Debug)]
pub struct PlpReader<'a, B> {
    src: &'a mut B,
    total: PlpLength,
    pending: Option<u32>,
    done: bool,
}

impl<'a, B: Buf> PlpReader<'a, B> {
    /// Read the total length header.
    pub fn new(src: &'a mut B) -> Result<Self, TypeError> {
        need(&*src, 8)?;
        let total = PlpLength::from_raw(src.get_u64_le());
        Ok(Self {
            src,
            done: total == PlpLength::Null,
            total,
            pending: None,
        })
    }

    /// Announced total length.
    #[must_use]
    pub fn total(&self) -> PlpLength {
        self.total
    }

    fn chunk_len(&mut self) -> Result<u32, TypeError> {
        need(&*self.src, 4)?;
        Ok(self.src.get_u32_le())
    }

    /// Next chunk, or `None` after the last one.
    pub fn next_chunk(&mut self) -> Result<Option<Chunk>, TypeError> {
        if self.done {
            return Ok(None);
        }
        let len = match self.pending.take() {
            Some(len) => len,
            None => self.chunk_len()?,
        };
        let len = usize::try_from(len).unwrap_or(usize::MAX);
        need(&*self.src, len)?;
        let data = self.src.copy_to_bytes(len);
        let next = if len == 0 { 0 } else { self.chunk_len()? };
        let more = next != 0;
        if more {
            self.pending = Some(next);
        } else {
            self.done = true;
        }
        Ok(Some(Chunk { data, more }))
    }

    /// Concatenate every chunk. `None` for NULL.
    pub fn read_all(mut self) -> Result<Option<Bytes>, TypeError> {
        if self.total == PlpLength::Null {
            return Ok(None);
        }
        let capacity = match self.total {
            PlpLength::Known(n) => usize::try_from(n).unwrap_or(0).min(1 << 20),
            _ => 0,
        };
        let mut out = BytesMut::with_capacity(capacity);
        while let Some(chunk) = self.next_chunk()? {
            out.extend_from_slice(&chunk.data);
        }
        Ok(Some(out.freeze()))
    }
}

/// Whether a length prefix of `width` bytes holding `len` marks NULL.
#[must_use]
pub const fn is_null_len(width: u8, len: u32, id: TypeId) -> bool {
    match width {
        1 => len == 0,
        2 => len == 0xFFFF,
        _ => (matches!(id, TypeId::Variant) && len == 0) || len == u32::MAX,
    }
}

fn bad_len(info: &TypeInfo, length: usize) -> TypeError {
    TypeError::InvalidLength {
        type_name: info.props().name,
        length,
    }
}

fn arr<const N: usize>(info: &TypeInfo, data: &[u8]) -> Result<[u8; N], TypeError> {
    data.try_into().map_err(|_| bad_len(info, data.len()))
}

/// Interpret the bytes of a fixed-width value.
pub fn decode_fixed(info: &TypeInfo, data: &[u8]) -> Result<Value, TypeError> {
    Ok(match info.id {
        TypeId::Null => Value::Null,
        TypeId::Int1 => Value::U8(arr::<1>(info, data)?[0]),
        TypeId::Bit => Value::Bool(arr::<1>(info, data)?[0] != 0),
        TypeId::Int2 => Value::I16(i16::from_le_bytes(arr(info, data)?)),
        TypeId::Int4 => Value::I32(i32::from_le_bytes(arr(info, data)?)),
        TypeId::Int8 => Value::I64(i64::from_le_bytes(arr(info, data)?)),
        TypeId::Float4 => Value::F32(f32::from_le_bytes(arr(info, data)?)),
        TypeId::Float8 => Value::F64(f64::from_le_bytes(arr(info, data)?)),
        TypeId::Money | TypeId::Money4 => Value::Numeric(temporal::decode_money(data)?),
        TypeId::DateTime => Value::DateTime(temporal::decode_datetime(data)?),
        TypeId::DateTime4 => Value::DateTime(temporal::decode_smalldatetime(data)?),
        _ => return decode_var(info, data),
    })
}

/// Interpret the bytes of a non-null variable-length value.
pub fn decode_var(info: &TypeInfo, data: &[u8]) -> Result<Value, TypeError> {
    Ok(match info.id {
        TypeId::IntN => match data.len() {
            1 => Value::U8(data[0]),
            2 => Value::I16(i16::from_le_bytes(arr(info, data)?)),
            4 => Value::I32(i32::from_le_bytes(arr(info, data)?)),
            8 => Value::I64(i64::from_le_bytes(arr(info, data)?)),
            n => return Err(bad_len(info, n)),
        },
        TypeId::BitN => Value::Bool(arr::<1>(info, data)?[0] != 0),
        TypeId::FloatN => match data.len() {
            4 => Value::F32(f32::from_le_bytes(arr(info, data)?)),
            8 => Value::F64(f64::from_le_bytes(arr(info, data)?)),
            n => return Err(bad_len(info, n)),
        },
        TypeId::MoneyN => Value::Numeric(temporal::decode_money(data)?),
        TypeId::DateTimeN => match data.len() {
            4 => Value::DateTime(temporal::decode_smalldatetime(data)?),
            8 => Value::DateTime(temporal::decode_datetime(data)?),
            n => return Err(bad_len(info, n)),
        },
        TypeId::Decimal | TypeId::Numeric | TypeId::DecimalN | TypeId::NumericN => {
            let (sign, magnitude) = data.split_first().ok_or_else(|| bad_len(info, 0))?;
            Value::Numeric(Numeric::from_wire(*sign == 1, magnitude, info.scale)?)
        }
        TypeId::Guid => Value::Guid(Uuid::from_bytes_le(arr(info, data)?)),
        TypeId::NChar | TypeId::NVarChar | TypeId::NText => {
            Value::String(decode_utf16_lossy(data))
        }
        TypeId::Char | TypeId::VarChar | TypeId::BigChar | TypeId::BigVarChar | TypeId::Text => {
            Value::String(info.collation.unwrap_or_default().decode_text(data))
        }
        TypeId::Binary
        | TypeId::VarBinary
        | TypeId::BigBinary
        | TypeId::BigVarBinary
        | TypeId::Image
        | TypeId::Udt => Value::Bytes(Bytes::copy_from_slice(data)),
        TypeId::Date => Value::Date(temporal::decode_date(data)?),
        TypeId::Time => Value::Time(temporal::decode_time(data, info.scale)?),
        TypeId::DateTime2 => Value::DateTime(temporal::decode_datetime2(data, info.scale)?),
        TypeId::DateTimeOffset => {
            Value::DateTimeOffset(temporal::decode_datetimeoffset(data, info.scale)?)
        }
        TypeId::Xml => Value::Xml(XmlData::from_wire(Bytes::copy_from_slice(data))),
        TypeId::Variant => decode_variant(data)?,
        TypeId::Tvp => return Err(TypeError::UnsupportedType(info.id as u8)),
        _ => return decode_fixed(info, data),
    })
}

/// `sql_variant`: base type, property count, properties, value.
fn decode_variant(data: &[u8]) -> Result<Value, TypeError> {
    let mut src = data;
    need(&src, 2)?;
    let code = src.get_u8();
    let prop_len = usize::from(src.get_u8());
    need(&src, prop_len)?;
    let (mut props, value) = src.split_at(prop_len);

    let id = TypeId::from_u8(code).ok_or(ProtocolError::UnknownType(code))?;
    let mut info = TypeInfo::new(id);
    let registry_row = info.props();
    if registry_row.pr_sc {
        need(&props, 2)?;
        info.precision = props.get_u8();
        info.scale = props.get_u8();
    } else if registry_row.has_scale {
        need(&props, 1)?;
        info.scale = props.get_u8();
    } else if registry_row.is_text {
        info.collation = Some(Collation::decode(&mut props)?);
    }
    if registry_row.is_fixed() {
        decode_fixed(&info, value)
    } else {
        decode_var(&info, value)
    }
}

fn read_len(src: &mut impl Buf, width: u8) -> Result<u32, TypeError> {
    need(&*src, usize::from(width))?;
    Ok(match width {
        1 => u32::from(src.get_u8()),
        2 => u32::from(src.get_u16_le()),
        _ => src.get_u32_le(),
    })
}

/// Decode one value of `info` from an in-memory row.
pub fn decode_column(info: &TypeInfo, src: &mut impl Buf) -> Result<Value, TypeError> {
    match info.layout() {
        ValueLayout::Fixed(n) => {
            need(&*src, n)?;
            let data = src.copy_to_bytes(n);
            decode_fixed(info, &data)
        }
        ValueLayout::Prefixed(0) => Err(TypeError::UnsupportedType(info.id as u8)),
        ValueLayout::Prefixed(width) => {
            let len = read_len(src, width)?;
            if is_null_len(width, len, info.id) {
                return Ok(Value::Null);
            }
            let len = usize::try_from(len).unwrap_or(usize::MAX);
            need(&*src, len)?;
            let data = src.copy_to_bytes(len);
            decode_var(info, &data)
        }
        ValueLayout::Plp => match PlpReader::new(src)?.read_all()? {
            Some(data) => decode_var(info, &data),
            None => Ok(Value::Null),
        },
        ValueLayout::TextPtr => {
            let ptr_len = usize::from(u8::try_from(read_len(src, 1)?).unwrap_or(0));
            if ptr_len == 0 {
                return Ok(Value::Null);
            }
            need(&*src, ptr_len + 8)?;
            src.advance(ptr_len + 8);
            let len = usize::try_from(read_len(src, 4)?).unwrap_or(usize::MAX);
            need(&*src, len)?;
            let data = src.copy_to_bytes(len);
            decode_var(info, &data)
        }
    }
}

/// Null bitmap leading an NBCROW.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NullBitmap {
    bits: Vec<u8>,
}

impl NullBitmap {
    /// Bytes the bitmap takes for `columns` columns.
    #[must_use]
    pub const fn byte_len(columns: usize) -> usize {
        columns.div_ceil(8)
    }

    /// Wrap raw bitmap bytes.
    #[must_use]
    pub fn from_bytes(bits: Vec<u8>) -> Self {
        Self { bits }
    }

    /// Read the bitmap for `columns` columns.
    pub fn decode(src: &mut impl Buf, columns: usize) -> Result<Self, TypeError> {
        let n = Self::byte_len(columns);
        need(&*src, n)?;
        let mut bits = vec![0; n];
        src.copy_to_slice(&mut bits);
        Ok(Self { bits })
    }

    /// Bitmap marking the NULL entries of `values`.
    #[must_use]
    pub fn for_values(values: &[Value]) -> Self {
        let mut bits = vec![0u8; Self::byte_len(values.len())];
        for (i, v) in values.iter().enumerate() {
            if v.is_null() {
                bits[i / 8] |= 1 << (i % 8);
            }
        }
        Self { bits }
    }

    /// Whether column `i` is NULL.
    #[must_use]
    pub fn is_null(&self, i: usize) -> bool {
        self.bits.get(i / 8).is_some_and(|b| b & (1 << (i % 8)) != 0)
    }

    /// Raw bitmap bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }
}

/// An RPC parameter as a server reads it.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedParam {
    /// Name including the `@`, empty for positional parameters.
    pub name: String,
    /// Status byte.
    pub status: ParamStatus,
    /// Declared wire type.
    pub type_info: TypeInfo,
    /// Value.
    pub value: Value,
}

/// Decode one RPC parameter: name, status, TYPE_INFO, value.
pub fn decode_param(src: &mut impl Buf) -> Result<DecodedParam, TypeError> {
    let name = read_b_varchar(src)?;
    need(&*src, 1)?;
    let status = ParamStatus::from_bits_retain(src.get_u8());
    let type_info = TypeInfo::decode(src)?;
    let value = decode_column(&type_info, src)?;
    Ok(DecodedParam {
        name,
        status,
        type_info,
        value,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::BufMut;
    use tds_wire::utf16::encode_utf16;

    fn plp(chunks: &[&[u8]], total: u64) -> Vec<u8> {
        let mut out = Vec::new();
        out.put_u64_le(total);
        for c in chunks {
            out.put_u32_le(c.len() as u32);
            out.put_slice(c);
        }
        out.put_u32_le(0);
        out
    }

    #[test]
    fn test_plp_single_known_chunk_is_not_chunked() {
        let wire = plp(&[b"hello"], 5);
        let mut src = &wire[..];
        let mut reader = PlpReader::new(&mut src).unwrap();
        assert_eq!(reader.total(), PlpLength::Known(5));
        assert_eq!(
            reader.next_chunk().unwrap(),
            Some(Chunk {
                data: Bytes::from_static(b"hello"),
                more: false
            })
        );
        assert_eq!(reader.next_chunk().unwrap(), None);
        assert!(src.is_empty());
    }

    #[test]
    fn test_plp_unknown_length_chunks() {
        let wire = plp(&[b"ab", b"cd", b"e"], PLP_UNKNOWN);
        let mut src = &wire[..];
        let mut reader = PlpReader::new(&mut src).unwrap();
        let mut seen = Vec::new();
        while let Some(chunk) = reader.next_chunk().unwrap() {
            seen.push((chunk.data.to_vec(), chunk.more));
        }
        assert_eq!(
            seen,
            vec![(b"ab".to_vec(), true), (b"cd".to_vec(), true), (b"e".to_vec(), false)]
        );
    }

    #[test]
    fn test_plp_null_and_empty() {
        let mut null = PLP_NULL.to_le_bytes().to_vec();
        let mut src = &null[..];
        assert_eq!(PlpReader::new(&mut src).unwrap().read_all().unwrap(), None);

        null = plp(&[], 0);
        let mut src = &null[..];
        assert_eq!(
            PlpReader::new(&mut src).unwrap().read_all().unwrap(),
            Some(Bytes::new())
        );
    }

    #[test]
    fn test_intn_null_and_widths() {
        let info = TypeInfo::new(TypeId::IntN).with_len(8);
        assert_eq!(decode_column(&info, &mut &[0u8][..]).unwrap(), Value::Null);
        assert_eq!(decode_column(&info, &mut &[1u8, 55][..]).unwrap(), Value::U8(55));
        assert_eq!(
            decode_column(&info, &mut &[2u8, 0xD2, 0x04][..]).unwrap(),
            Value::I16(1234)
        );
        assert!(decode_column(&info, &mut &[3u8, 0, 0, 0][..]).is_err());
    }

    #[test]
    fn test_decimal_value() {
        let info = TypeInfo::new(TypeId::DecimalN).with_len(17).with_precision(38, 4);
        let mut wire = vec![17u8, 1];
        wire.extend_from_slice(&123_400u128.to_le_bytes());
        let value = decode_column(&info, &mut &wire[..]).unwrap();
        assert_eq!(value, Value::Numeric(Numeric::new(1234, 2).unwrap()));
    }

    #[test]
    fn test_nvarchar_and_varchar() {
        let info = TypeInfo::new(TypeId::NVarChar).with_len(40);
        let text = encode_utf16("😀");
        let mut wire = (text.len() as u16).to_le_bytes().to_vec();
        wire.extend(&text);
        assert_eq!(&text, &[0x3D, 0xD8, 0x00, 0xDE]);
        assert_eq!(
            decode_column(&info, &mut &wire[..]).unwrap(),
            Value::String("😀".into())
        );
        assert_eq!(decode_column(&info, &mut &[0xFF, 0xFF][..]).unwrap(), Value::Null);

        let latin = TypeInfo::new(TypeId::BigVarChar)
            .with_len(10)
            .with_collation(Collation::default());
        let wire = [3u8, 0, b'c', 0xE9, b'!'];
        assert_eq!(
            decode_column(&latin, &mut &wire[..]).unwrap(),
            Value::String("cé!".into())
        );
    }

    #[test]
    fn test_guid_mixed_endian() {
        let info = TypeInfo::new(TypeId::Guid).with_len(16);
        let mut wire = vec![16u8];
        wire.extend([
            0x33, 0x22, 0x11, 0x00, 0x55, 0x44, 0x77, 0x66, 0x88, 0x99, 0xAA, 0xBB, 0xCC, 0xDD,
            0xEE, 0xFF,
        ]);
        let Value::Guid(g) = decode_column(&info, &mut &wire[..]).unwrap() else {
            panic!("expected guid");
        };
        assert_eq!(g.to_string(), "00112233-4455-6677-8899-aabbccddeeff");
    }

    #[test]
    fn test_text_pointer_column() {
        let info = TypeInfo::new(TypeId::Image).with_len(0x7FFF_FFFF);
        let mut wire = vec![16u8];
        wire.extend([0xAA; 16]);
        wire.extend([0u8; 8]);
        wire.put_i32_le(3);
        wire.extend([1, 2, 3]);
        assert_eq!(
            decode_column(&info, &mut &wire[..]).unwrap(),
            Value::Bytes(Bytes::from_static(&[1, 2, 3]))
        );
        assert_eq!(decode_column(&info, &mut &[0u8][..]).unwrap(), Value::Null);
    }

    #[test]
    fn test_variant() {
        let info = TypeInfo::new(TypeId::Variant).with_len(8016);
        let mut wire = Vec::new();
        wire.put_u32_le(2 + 4);
        wire.extend([0x38, 0]);
        wire.put_i32_le(-7);
        assert_eq!(decode_column(&info, &mut &wire[..]).unwrap(), Value::I32(-7));

        let mut wire = Vec::new();
        wire.put_u32_le(2 + 2 + 5);
        wire.extend([0x6C, 2, 5, 2]);
        wire.extend([1, 0xD2, 0x04, 0, 0]);
        assert_eq!(
            decode_column(&info, &mut &wire[..]).unwrap(),
            Value::Numeric(Numeric::new(1234, 2).unwrap())
        );
        assert_eq!(decode_column(&info, &mut &[0u8, 0, 0, 0][..]).unwrap(), Value::Null);
    }

    #[test]
    fn test_null_bitmap() {
        let values = [
            Value::I32(1),
            Value::Null,
            Value::I32(3),
            Value::I32(4),
            Value::I32(5),
            Value::I32(6),
            Value::I32(7),
            Value::I32(8),
            Value::Null,
        ];
        let map = NullBitmap::for_values(&values);
        assert_eq!(map.as_bytes(), &[0b10, 0b1]);
        let back = NullBitmap::decode(&mut map.as_bytes(), values.len()).unwrap();
        assert!(back.is_null(1) && back.is_null(8));
        assert!(!back.is_null(0) && !back.is_null(7));
        assert_eq!(NullBitmap::byte_len(0), 0);
        assert_eq!(NullBitmap::byte_len(16), 2);
    }
}
