//! Decoded values.

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use tds_wire::utf16::{decode_utf16_lossy, utf16_len};
use tds_wire::{SqlType, ValueKind};
use uuid::Uuid;

use crate::binxml;
use crate::error::TypeError;
use crate::numeric::Numeric;

/// A SQL value. NULL is its own variant, distinct from any zero value.
#[derive(Debug, Clone, PartialEq, Default)]
#[non_exhaustive]
pub enum Value {
    /// NULL.
    #[default]
    Null,
    /// `bit`.
    Bool(bool),
    /// `tinyint`.
    U8(u8),
    /// `smallint`.
    I16(i16),
    /// `int`.
    I32(i32),
    /// `bigint`.
    I64(i64),
    /// `real`.
    F32(f32),
    /// `float`.
    F64(f64),
    /// `decimal`, `numeric`, `money` and `smallmoney`.
    Numeric(Numeric),
    /// Character types.
    String(String),
    /// Binary types.
    Bytes(Bytes),
    /// `uniqueidentifier`.
    Guid(Uuid),
    /// `date`.
    Date(NaiveDate),
    /// `time`.
    Time(NaiveTime),
    /// `datetime`, `smalldatetime` and `datetime2`.
    DateTime(NaiveDateTime),
    /// `datetimeoffset`.
    DateTimeOffset(DateTime<FixedOffset>),
    /// `xml`.
    Xml(XmlData),
}

impl Value {
    /// Whether this is NULL.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Diagnostic type name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::U8(_) => "u8",
            Self::I16(_) => "i16",
            Self::I32(_) => "i32",
            Self::I64(_) => "i64",
            Self::F32(_) => "f32",
            Self::F64(_) => "f64",
            Self::Numeric(_) => "numeric",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Guid(_) => "guid",
            Self::Date(_) => "date",
            Self::Time(_) => "time",
            Self::DateTime(_) => "datetime",
            Self::DateTimeOffset(_) => "datetimeoffset",
            Self::Xml(_) => "xml",
        }
    }

    /// Value family.
    #[must_use]
    pub const fn kind(&self) -> ValueKind {
        match self {
            Self::Null => ValueKind::Null,
            Self::Bool(_) => ValueKind::Bool,
            Self::U8(_) => ValueKind::U8,
            Self::I16(_) => ValueKind::I16,
            Self::I32(_) => ValueKind::I32,
            Self::I64(_) => ValueKind::I64,
            Self::F32(_) => ValueKind::F32,
            Self::F64(_) => ValueKind::F64,
            Self::Numeric(_) => ValueKind::Decimal,
            Self::String(_) => ValueKind::String,
            Self::Bytes(_) => ValueKind::Bytes,
            Self::Guid(_) => ValueKind::Guid,
            Self::Date(_) => ValueKind::Date,
            Self::Time(_) => ValueKind::Time,
            Self::DateTime(_) => ValueKind::DateTime,
            Self::DateTimeOffset(_) => ValueKind::DateTimeOffset,
            Self::Xml(_) => ValueKind::Xml,
        }
    }

    /// SQL type a parameter carrying this value is declared as when the
    /// caller gives none.
    #[must_use]
    pub fn infer_sql_type(&self) -> SqlType {
        match self {
            Self::Null => SqlType::NVarChar(Some(1)),
            Self::Bool(_) => SqlType::Bit,
            Self::U8(_) => SqlType::TinyInt,
            Self::I16(_) => SqlType::SmallInt,
            Self::I32(_) => SqlType::Int,
            Self::I64(_) => SqlType::BigInt,
            Self::F32(_) => SqlType::Real,
            Self::F64(_) => SqlType::Float,
            Self::Numeric(n) => SqlType::Decimal {
                precision: crate::numeric::MAX_PRECISION,
                scale: n.scale(),
            },
            Self::String(s) => SqlType::nvarchar_for(utf16_len(s)),
            Self::Bytes(b) => SqlType::varbinary_for(b.len()),
            Self::Guid(_) => SqlType::UniqueIdentifier,
            Self::Date(_) => SqlType::Date,
            Self::Time(_) => SqlType::Time(7),
            Self::DateTime(_) => SqlType::DateTime2(7),
            Self::DateTimeOffset(_) => SqlType::DateTimeOffset(7),
            Self::Xml(_) => SqlType::Xml,
        }
    }

    /// Integer value of any integer-like variant.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Bool(v) => Some(i64::from(*v)),
            Self::U8(v) => Some(i64::from(*v)),
            Self::I16(v) => Some(i64::from(*v)),
            Self::I32(v) => Some(i64::from(*v)),
            Self::I64(v) => Some(*v),
            Self::Numeric(n) => n.to_i128().and_then(|v| i64::try_from(v).ok()),
            _ => None,
        }
    }

    /// Floating value of any numeric variant.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::F32(v) => Some(f64::from(*v)),
            Self::F64(v) => Some(*v),
            Self::Numeric(n) => Some(n.to_f64()),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    /// Text of a string value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Bytes of a binary value.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(v) => write!(f, "{}", u8::from(*v)),
            Self::U8(v) => write!(f, "{v}"),
            Self::I16(v) => write!(f, "{v}"),
            Self::I32(v) => write!(f, "{v}"),
            Self::I64(v) => write!(f, "{v}"),
            Self::F32(v) => write!(f, "{v}"),
            Self::F64(v) => write!(f, "{v}"),
            Self::Numeric(v) => write!(f, "{v}"),
            Self::String(v) => f.write_str(v),
            Self::Bytes(v) => {
                f.write_str("0x")?;
                v.iter().try_for_each(|b| write!(f, "{b:02X}"))
            }
            Self::Guid(v) => write!(f, "{}", v.hyphenated().to_string().to_uppercase()),
            Self::Date(v) => write!(f, "{}", v.format("%Y-%m-%d")),
            Self::Time(v) => write!(f, "{}", v.format("%H:%M:%S%.f")),
            Self::DateTime(v) => write!(f, "{}", v.format("%Y-%m-%d %H:%M:%S%.f")),
            Self::DateTimeOffset(v) => write!(f, "{}", v.format("%Y-%m-%d %H:%M:%S%.f %:z")),
            Self::Xml(v) => match v.to_text() {
                Ok(text) => f.write_str(&text),
                Err(_) => f.write_str("<invalid xml>"),
            },
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Self::$variant(v.into())
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    u8 => U8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    f32 => F32,
    f64 => F64,
    Numeric => Numeric,
    String => String,
    &str => String,
    Bytes => Bytes,
    Vec<u8> => Bytes,
    Uuid => Guid,
    NaiveDate => Date,
    NaiveTime => Time,
    NaiveDateTime => DateTime,
    DateTime<FixedOffset> => DateTimeOffset,
    XmlData => Xml,
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Self::Bytes(Bytes::copy_from_slice(v))
    }
}

impl From<rust_decimal::Decimal> for Value {
    fn from(v: rust_decimal::Decimal) -> Self {
        Self::Numeric(v.into())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

const BINXML_SIGNATURE: [u8; 2] = [0xDF, 0xFF];
const UTF16_BOM: [u8; 2] = [0xFF, 0xFE];

/// An `xml` value.
///
/// Values read from the server keep their wire bytes; text is produced on
/// demand by [`XmlData::to_text`], which runs the binary XML decoder when
/// the bytes carry its signature.
#[derive(Debug, Clone)]
pub struct XmlData {
    repr: XmlRepr,
}

#[derive(Debug, Clone)]
enum XmlRepr {
    Text(String),
    Wire(Bytes),
}

impl XmlData {
    /// Wrap document text.
    #[must_use]
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            repr: XmlRepr::Text(text.into()),
        }
    }

    /// Wrap wire bytes: UTF-16LE text or binary XML.
    #[must_use]
    pub fn from_wire(bytes: Bytes) -> Self {
        Self {
            repr: XmlRepr::Wire(bytes),
        }
    }

    /// Whether the value holds binary XML.
    #[must_use]
    pub fn is_binary(&self) -> bool {
        matches!(&self.repr, XmlRepr::Wire(b) if b.starts_with(&BINXML_SIGNATURE))
    }

    /// Wire bytes, when the value came from the server.
    #[must_use]
    pub fn wire_bytes(&self) -> Option<&Bytes> {
        match &self.repr {
            XmlRepr::Wire(b) => Some(b),
            XmlRepr::Text(_) => None,
        }
    }

    /// Document text.
    pub fn to_text(&self) -> Result<String, TypeError> {
        match &self.repr {
            XmlRepr::Text(text) => Ok(text.clone()),
            XmlRepr::Wire(bytes) if bytes.starts_with(&BINXML_SIGNATURE) => binxml::decode(bytes),
            XmlRepr::Wire(bytes) => {
                let body = bytes.strip_prefix(&UTF16_BOM[..]).unwrap_or(&bytes[..]);
                Ok(decode_utf16_lossy(body))
            }
        }
    }
}

impl PartialEq for XmlData {
    fn eq(&self, other: &Self) -> bool {
        match (&self.repr, &other.repr) {
            (XmlRepr::Text(a), XmlRepr::Text(b)) => a == b,
            (XmlRepr::Wire(a), XmlRepr::Wire(b)) => a == b,
            _ => self.to_text().ok() == other.to_text().ok(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tds_wire::utf16::encode_utf16;

    #[test]
    fn test_null_is_distinct_from_zero() {
        assert!(Value::Null.is_null());
        assert!(!Value::I32(0).is_null());
        assert_ne!(Value::Null, Value::I32(0));
        assert_eq!(Value::from(None::<i32>), Value::Null);
        assert_eq!(Value::from(Some(5i64)), Value::I64(5));
    }

    #[test]
    fn test_inferred_types() {
        assert_eq!(Value::from(55u8).infer_sql_type(), SqlType::TinyInt);
        assert_eq!(
            Value::from("😀").infer_sql_type(),
            SqlType::NVarChar(Some(2))
        );
        assert_eq!(
            Value::from("x".repeat(5000)).infer_sql_type(),
            SqlType::NVarChar(None)
        );
        assert_eq!(
            Value::from(vec![1u8, 2, 3]).infer_sql_type(),
            SqlType::VarBinary(Some(3))
        );
        let n = Numeric::new(1234, 2).unwrap();
        assert_eq!(
            Value::from(n).infer_sql_type(),
            SqlType::Decimal {
                precision: 38,
                scale: 2
            }
        );
    }

    #[test]
    fn test_accessors() {
        assert_eq!(Value::I16(-3).as_i64(), Some(-3));
        assert_eq!(Value::Bool(true).as_i64(), Some(1));
        assert_eq!(Value::F32(1.5).as_f64(), Some(1.5));
        assert_eq!(Value::from(Numeric::new(500, 2).unwrap()).as_i64(), Some(5));
        assert_eq!(Value::from(Numeric::new(501, 2).unwrap()).as_i64(), None);
        assert_eq!(Value::from("a").as_str(), Some("a"));
        assert!(Value::from("a").as_bytes().is_none());
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Bytes(Bytes::from_static(&[0xAB, 0x01])).to_string(), "0xAB01");
        assert_eq!(Value::Bool(true).to_string(), "1");
        let d = NaiveDate::from_ymd_opt(2020, 1, 2).unwrap();
        assert_eq!(Value::Date(d).to_string(), "2020-01-02");
    }

    #[test]
    fn test_xml_text_forms() {
        let mut wire = UTF16_BOM.to_vec();
        wire.extend(encode_utf16("<a/>"));
        let xml = XmlData::from_wire(Bytes::from(wire));
        assert!(!xml.is_binary());
        assert_eq!(xml.to_text().unwrap(), "<a/>");
        assert_eq!(xml, XmlData::from_text("<a/>"));
    }
}
