//! # tds-types
//!
//! Value codec for the TDS client: how SQL values are laid out in rows and
//! parameters, and how they convert to Rust types.
//!
//! ## Type mappings
//!
//! | SQL Server type | [`Value`] variant | Rust scan targets |
//! |-----------------|-------------------|-------------------|
//! | `bit` | `Bool` | `bool`, integers |
//! | `tinyint` .. `bigint` | `U8` .. `I64` | any integer that fits, `f64`, `String` |
//! | `real`, `float` | `F32`, `F64` | `f32`, `f64`, `String` |
//! | `decimal`, `numeric`, `money` | `Numeric` | [`Numeric`], `rust_decimal::Decimal`, `f64` |
//! | `char` .. `nvarchar(max)`, `text`, `ntext` | `String` | `String` |
//! | `binary` .. `varbinary(max)`, `image` | `Bytes` | `Vec<u8>`, `bytes::Bytes` |
//! | `uniqueidentifier` | `Guid` | `uuid::Uuid` |
//! | `date` | `Date` | `chrono::NaiveDate` |
//! | `time` | `Time` | `chrono::NaiveTime`, `std::time::Duration` |
//! | `datetime`, `smalldatetime`, `datetime2` | `DateTime` | `chrono::NaiveDateTime` |
//! | `datetimeoffset` | `DateTimeOffset` | `chrono::DateTime<FixedOffset>`, `DateTime<Utc>` |
//! | `xml` | `Xml` | [`XmlData`], `String` |
//!
//! NULL is [`Value::Null`] and only scans into `Option<T>`.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod binxml;
pub mod convert;
pub mod decode;
pub mod encode;
pub mod error;
pub mod numeric;
pub mod stream;
pub mod temporal;
pub mod type_info;
pub mod value;

pub use convert::FromValue;
pub use decode::{
    Chunk, DecodedParam, NullBitmap, PLP_NULL, PLP_UNKNOWN, PlpLength, PlpReader, decode_column,
    decode_fixed, decode_param, decode_var,
};
pub use encode::{
    Param, declaration_list, encode_colmetadata, encode_nbc_row, encode_param,
    encode_param_head, encode_return_value, encode_row, encode_stream_head, encode_value,
};
pub use error::TypeError;
pub use numeric::Numeric;
pub use stream::{ParamStream, PlpStreamEncoder};
pub use type_info::{Column, TypeInfo, ValueLayout};
pub use value::{Value, XmlData};
