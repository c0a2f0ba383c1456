//! Parameter and row value encoding.
//!
//! A parameter is written as its name, a status byte, TYPE_INFO and the
//! value. The value is first coerced to the declared type, then framed by
//! the type's [`ValueLayout`]: fixed bytes, a length prefix, PLP chunks or
//! a text pointer. The same framing writes ROW and NBCROW tokens for the
//! scripted server and bulk loads.

use bytes::BufMut;
use tds_wire::registry::TypeProps;
use tds_wire::rpc::write_param_header;
use tds_wire::utf16::{encode_utf16, write_b_varchar};
use tds_wire::{Collation, ParamStatus, SqlType, TokenType, TypeId};

use crate::convert;
use crate::decode::{NullBitmap, PLP_NULL};
use crate::error::TypeError;
use crate::stream::{ParamStream, PlpStreamEncoder};
use crate::temporal;
use crate::type_info::{Column, TypeInfo, ValueLayout};
use crate::value::Value;

/// A parameter of a parameterized command.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    /// Name, with or without the leading `@`; empty for positional.
    pub name: String,
    /// Value sent to the server.
    pub value: Value,
    /// Declared type; inferred from the value when absent.
    pub ty: Option<SqlType>,
    /// Output parameter.
    pub output: bool,
    /// Cut over-long text and binary values instead of failing.
    pub truncate: bool,
    /// Reader supplying the value at send time; `value` is then unused.
    pub stream: Option<ParamStream>,
}

impl Param {
    /// Named input parameter.
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            ty: None,
            output: false,
            truncate: false,
            stream: None,
        }
    }

    /// Input parameter read from `reader` while the request is sent.
    ///
    /// The declared type defaults to `nvarchar(max)` and must be a `(max)`
    /// type or `xml`. Text types expect UTF-8 input.
    pub fn stream(
        name: impl Into<String>,
        reader: impl tokio::io::AsyncRead + Send + Unpin + 'static,
    ) -> Self {
        Self {
            stream: Some(ParamStream::new(reader)),
            ..Self::new(name, Value::Null)
        }
    }

    /// Positional input parameter.
    pub fn positional(value: impl Into<Value>) -> Self {
        Self::new(String::new(), value)
    }

    /// Declare the parameter type.
    #[must_use]
    pub fn with_type(mut self, ty: SqlType) -> Self {
        self.ty = Some(ty);
        self
    }

    /// Mark as an output parameter.
    #[must_use]
    pub fn output(mut self) -> Self {
        self.output = true;
        self
    }

    /// Allow truncation of over-long values.
    #[must_use]
    pub fn truncate(mut self, allow: bool) -> Self {
        self.truncate = allow;
        self
    }

    /// Declared or inferred SQL type.
    #[must_use]
    pub fn sql_type(&self) -> SqlType {
        match (self.ty, &self.stream) {
            (Some(ty), _) => ty,
            (None, Some(_)) => SqlType::NVarChar(None),
            (None, None) => self.value.infer_sql_type(),
        }
    }

    /// Whether the value comes from a reader.
    #[must_use]
    pub fn is_streamed(&self) -> bool {
        self.stream.is_some()
    }

    /// Status byte.
    #[must_use]
    pub fn status(&self) -> ParamStatus {
        if self.output {
            ParamStatus::BY_REF
        } else {
            ParamStatus::empty()
        }
    }

    /// Name with the leading `@`.
    #[must_use]
    pub fn at_name(&self) -> String {
        if self.name.starts_with('@') {
            self.name.clone()
        } else {
            format!("@{}", self.name)
        }
    }

    /// Declaration as it appears in the `sp_executesql` parameter list.
    #[must_use]
    pub fn declaration(&self) -> String {
        let mut decl = format!("{} {}", self.at_name(), self.sql_type().declaration());
        if self.output {
            decl.push_str(" output");
        }
        decl
    }
}

/// Comma-separated declarations of `params`.
#[must_use]
pub fn declaration_list(params: &[Param]) -> String {
    params
        .iter()
        .map(Param::declaration)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Write name, status and TYPE_INFO of a parameter, leaving the value to
/// the caller. Returns the TYPE_INFO the value must follow.
pub fn encode_param_head(
    dst: &mut impl BufMut,
    param: &Param,
    collation: Collation,
) -> Result<TypeInfo, TypeError> {
    write_param_header(dst, &param.name, param.status())?;
    let info = TypeInfo::for_sql_type(param.sql_type(), collation);
    info.encode(dst)?;
    Ok(info)
}

/// Write a complete parameter. Streamed parameters go through
/// [`encode_stream_head`] instead.
pub fn encode_param(
    dst: &mut impl BufMut,
    param: &Param,
    collation: Collation,
) -> Result<(), TypeError> {
    if param.is_streamed() {
        return Err(TypeError::unsupported("stream", "buffered parameter"));
    }
    let info = encode_param_head(dst, param, collation)?;
    encode_value(dst, &info, &param.value, param.truncate)
}

/// Write a streamed parameter up to its first chunk: name, status,
/// TYPE_INFO and the unknown PLP length. The returned encoder writes the
/// chunks and the terminator.
pub fn encode_stream_head(
    dst: &mut impl BufMut,
    param: &Param,
    collation: Collation,
) -> Result<PlpStreamEncoder, TypeError> {
    let info = TypeInfo::for_sql_type(param.sql_type(), collation);
    let encoder = PlpStreamEncoder::for_type(&info)?;
    encode_param_head(dst, param, collation)?;
    encoder.begin(dst);
    Ok(encoder)
}

/// Write the NULL marker of `info`.
pub fn write_null(dst: &mut impl BufMut, info: &TypeInfo) -> Result<(), TypeError> {
    match info.layout() {
        ValueLayout::Fixed(_) => return Err(TypeError::UnexpectedNull),
        ValueLayout::Prefixed(1) | ValueLayout::TextPtr => dst.put_u8(0),
        ValueLayout::Prefixed(2) => dst.put_u16_le(0xFFFF),
        ValueLayout::Prefixed(_) if info.id == TypeId::Variant => dst.put_u32_le(0),
        ValueLayout::Prefixed(_) => dst.put_u32_le(u32::MAX),
        ValueLayout::Plp => dst.put_u64_le(PLP_NULL),
    }
    Ok(())
}

/// Write the PLP total length; `None` announces an unknown length.
pub fn write_plp_header(dst: &mut impl BufMut, total: Option<u64>) {
    dst.put_u64_le(total.unwrap_or(crate::decode::PLP_UNKNOWN));
}

/// Write one PLP chunk. Empty chunks are skipped, a zero length being the
/// terminator.
pub fn write_plp_chunk(dst: &mut impl BufMut, data: &[u8]) {
    if data.is_empty() {
        return;
    }
    #[allow(clippy::cast_possible_truncation)]
    dst.put_u32_le(data.len() as u32);
    dst.put_slice(data);
}

/// Write the PLP terminator.
pub fn write_plp_terminator(dst: &mut impl BufMut) {
    dst.put_u32_le(0);
}

/// Write `value` framed as `info` prescribes.
pub fn encode_value(
    dst: &mut impl BufMut,
    info: &TypeInfo,
    value: &Value,
    truncate: bool,
) -> Result<(), TypeError> {
    if value.is_null() {
        return write_null(dst, info);
    }
    let payload = value_payload(info, value, truncate)?;
    #[allow(clippy::cast_possible_truncation)]
    match info.layout() {
        ValueLayout::Fixed(n) => {
            if payload.len() != n {
                return Err(TypeError::InvalidLength {
                    type_name: info.props().name,
                    length: payload.len(),
                });
            }
            dst.put_slice(&payload);
        }
        ValueLayout::Prefixed(1) => {
            dst.put_u8(payload.len() as u8);
            dst.put_slice(&payload);
        }
        ValueLayout::Prefixed(2) => {
            dst.put_u16_le(payload.len() as u16);
            dst.put_slice(&payload);
        }
        ValueLayout::Prefixed(_) => {
            dst.put_u32_le(payload.len() as u32);
            dst.put_slice(&payload);
        }
        ValueLayout::Plp => {
            write_plp_header(dst, Some(payload.len() as u64));
            write_plp_chunk(dst, &payload);
            write_plp_terminator(dst);
        }
        ValueLayout::TextPtr => {
            dst.put_u8(16);
            dst.put_bytes(0, 16 + 8);
            dst.put_u32_le(payload.len() as u32);
            dst.put_slice(&payload);
        }
    }
    Ok(())
}

/// Byte limit of a length-checked value, `None` when unbounded.
fn byte_limit(info: &TypeInfo) -> Option<usize> {
    match info.layout() {
        ValueLayout::Plp | ValueLayout::TextPtr => None,
        _ => usize::try_from(info.max_len).ok(),
    }
}

fn check_len(
    mut data: Vec<u8>,
    limit: Option<usize>,
    truncate: bool,
    unit: usize,
) -> Result<Vec<u8>, TypeError> {
    let Some(limit) = limit else {
        return Ok(data);
    };
    if data.len() <= limit {
        return Ok(data);
    }
    if !truncate {
        return Err(TypeError::ValueTooLong {
            declared: limit,
            actual: data.len(),
        });
    }
    let mut cut = limit - limit % unit;
    // a high surrogate without its pair is dropped
    if unit == 2 && cut >= 2 && (0xD8..=0xDB).contains(&data[cut - 1]) {
        cut -= 2;
    }
    data.truncate(cut);
    Ok(data)
}

fn width(info: &TypeInfo, props: &TypeProps) -> u32 {
    props.fixed.map_or(info.max_len, u32::from)
}

/// Bytes of a non-null value coerced to `info`, without framing.
pub fn value_payload(info: &TypeInfo, value: &Value, truncate: bool) -> Result<Vec<u8>, TypeError> {
    let props = info.props();
    let mut out = Vec::new();
    match info.id {
        TypeId::Int1 | TypeId::Int2 | TypeId::Int4 | TypeId::Int8 | TypeId::IntN => {
            match width(info, props) {
                1 => out.put_u8(convert::integer_as::<u8>(value, "tinyint")?),
                2 => out.put_i16_le(convert::integer_as(value, "smallint")?),
                4 => out.put_i32_le(convert::integer_as(value, "int")?),
                8 => out.put_i64_le(convert::integer_as(value, "bigint")?),
                n => return Err(invalid_width(info, n)),
            }
        }
        TypeId::Bit | TypeId::BitN => {
            let v = match value {
                Value::Bool(b) => *b,
                other => convert::integer_as::<i64>(other, "bit")? != 0,
            };
            out.put_u8(u8::from(v));
        }
        TypeId::Float4 | TypeId::Float8 | TypeId::FloatN => match width(info, props) {
            #[allow(clippy::cast_possible_truncation)]
            4 => out.put_f32_le(convert::float(value)? as f32),
            8 => out.put_f64_le(convert::float(value)?),
            n => return Err(invalid_width(info, n)),
        },
        TypeId::Decimal | TypeId::Numeric | TypeId::DecimalN | TypeId::NumericN => {
            let n = convert::numeric(value)?.rescale(info.scale)?;
            if n.precision() > info.precision.max(1) {
                return Err(TypeError::OutOfRange { target: "decimal" });
            }
            let w = u8::try_from(info.max_len).unwrap_or(17);
            n.write_wire(&mut out, w);
        }
        TypeId::Money | TypeId::Money4 | TypeId::MoneyN => {
            let w = u8::try_from(width(info, props)).unwrap_or(8);
            temporal::encode_money(&mut out, &convert::numeric(value)?, w)?;
        }
        TypeId::DateTime | TypeId::DateTime4 | TypeId::DateTimeN => {
            let dt = convert::datetime(value)?;
            match width(info, props) {
                4 => temporal::encode_smalldatetime(&mut out, dt)?,
                8 => temporal::encode_datetime(&mut out, dt)?,
                n => return Err(invalid_width(info, n)),
            }
        }
        TypeId::Guid => out.put_slice(&convert::guid(value)?.to_bytes_le()),
        TypeId::Date => temporal::encode_date(&mut out, convert::date(value)?)?,
        TypeId::Time => temporal::encode_time(&mut out, convert::time(value)?, info.scale)?,
        TypeId::DateTime2 => {
            temporal::encode_datetime2(&mut out, convert::datetime(value)?, info.scale)?;
        }
        TypeId::DateTimeOffset => {
            let dto = convert::datetime_offset(value)?;
            temporal::encode_datetimeoffset(&mut out, dto, info.scale)?;
        }
        TypeId::NChar | TypeId::NVarChar | TypeId::NText => {
            let text = convert::text(value)?;
            out = check_len(encode_utf16(&text), byte_limit(info), truncate, 2)?;
        }
        TypeId::Char | TypeId::VarChar | TypeId::BigChar | TypeId::BigVarChar | TypeId::Text => {
            let text = convert::text(value)?;
            let encoded = info.collation.unwrap_or_default().encode_text(&text);
            out = check_len(encoded, byte_limit(info), truncate, 1)?;
        }
        TypeId::Binary
        | TypeId::VarBinary
        | TypeId::BigBinary
        | TypeId::BigVarBinary
        | TypeId::Image
        | TypeId::Udt => {
            out = check_len(convert::bytes(value)?.to_vec(), byte_limit(info), truncate, 1)?;
        }
        TypeId::Xml => match value {
            Value::Xml(x) => match x.wire_bytes() {
                Some(wire) => out.put_slice(wire),
                None => out = encode_utf16(&x.to_text()?),
            },
            other => out = encode_utf16(&convert::text(other)?),
        },
        TypeId::Null => return Err(TypeError::unsupported(value.type_name(), "null")),
        TypeId::Variant => return Err(TypeError::unsupported(value.type_name(), "sql_variant")),
        TypeId::Tvp => return Err(TypeError::UnsupportedType(info.id as u8)),
    }
    Ok(out)
}

fn invalid_width(info: &TypeInfo, width: u32) -> TypeError {
    TypeError::InvalidLength {
        type_name: info.props().name,
        length: usize::try_from(width).unwrap_or(usize::MAX),
    }
}

/// Write a COLMETADATA token. No columns is written as the 0xFFFF count.
pub fn encode_colmetadata(dst: &mut impl BufMut, columns: &[Column]) -> Result<(), TypeError> {
    dst.put_u8(TokenType::ColMetaData as u8);
    if columns.is_empty() {
        dst.put_u16_le(0xFFFF);
        return Ok(());
    }
    dst.put_u16_le(u16::try_from(columns.len()).map_err(|_| TypeError::OutOfRange {
        target: "column count",
    })?);
    for column in columns {
        column.encode(dst)?;
    }
    Ok(())
}

fn check_arity(columns: &[Column], values: &[Value]) -> Result<(), TypeError> {
    if columns.len() == values.len() {
        Ok(())
    } else {
        Err(TypeError::InvalidLength {
            type_name: "row",
            length: values.len(),
        })
    }
}

/// Write a ROW token.
pub fn encode_row(
    dst: &mut impl BufMut,
    columns: &[Column],
    values: &[Value],
) -> Result<(), TypeError> {
    check_arity(columns, values)?;
    dst.put_u8(TokenType::Row as u8);
    for (column, value) in columns.iter().zip(values) {
        encode_value(dst, &column.type_info, value, false)?;
    }
    Ok(())
}

/// Write an NBCROW token: a null bitmap, then the non-null values.
pub fn encode_nbc_row(
    dst: &mut impl BufMut,
    columns: &[Column],
    values: &[Value],
) -> Result<(), TypeError> {
    check_arity(columns, values)?;
    dst.put_u8(TokenType::NbcRow as u8);
    dst.put_slice(NullBitmap::for_values(values).as_bytes());
    for (column, value) in columns.iter().zip(values) {
        if !value.is_null() {
            encode_value(dst, &column.type_info, value, false)?;
        }
    }
    Ok(())
}

/// Write a RETURNVALUE token for an output parameter.
pub fn encode_return_value(
    dst: &mut impl BufMut,
    ordinal: u16,
    name: &str,
    info: &TypeInfo,
    value: &Value,
) -> Result<(), TypeError> {
    dst.put_u8(TokenType::ReturnValue as u8);
    dst.put_u16_le(ordinal);
    write_b_varchar(dst, name)?;
    dst.put_u8(0x01);
    dst.put_u32_le(0);
    dst.put_u16_le(tds_wire::ColumnFlags::NULLABLE.bits());
    info.encode(dst)?;
    encode_value(dst, info, value, false)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::decode::{decode_column, decode_param};
    use crate::numeric::Numeric;
    use chrono::NaiveDate;

    fn encoded(param: &Param) -> Vec<u8> {
        let mut out = Vec::new();
        encode_param(&mut out, param, Collation::default()).unwrap();
        out
    }

    #[test]
    fn test_int_param_bytes() {
        let out = encoded(&Param::new("v", 0x0102_0304_i32));
        assert_eq!(
            out,
            [2, b'@', 0, b'v', 0, 0, 0x26, 4, 4, 0x04, 0x03, 0x02, 0x01]
        );
    }

    #[test]
    fn test_null_param_defaults_to_nvarchar() {
        let out = encoded(&Param::new("@n", Value::Null));
        assert_eq!(&out[6..], &[0xE7, 2, 0, 0x09, 0x04, 0xD0, 0x00, 0x34, 0xFF, 0xFF]);

        let typed = encoded(&Param::new("@n", Value::Null).with_type(SqlType::Int));
        assert_eq!(&typed[6..], &[0x26, 4, 0]);
    }

    #[test]
    fn test_decimal_param_rounds_to_declared_scale() {
        let param = Param::new("d", "35.8392".parse::<Numeric>().unwrap())
            .with_type(SqlType::Decimal { precision: 10, scale: 2 });
        let out = encoded(&param);
        assert_eq!(&out[6..], &[0x6A, 9, 10, 2, 9, 1, 0x00, 0x0E, 0, 0, 0, 0, 0, 0]);
        let back = decode_param(&mut &out[..]).unwrap();
        assert_eq!(back.value.to_string(), "35.84");
    }

    #[test]
    fn test_decimal_precision_overflow() {
        let param = Param::new("d", 123_456_i64).with_type(SqlType::Decimal {
            precision: 5,
            scale: 0,
        });
        let mut out = Vec::new();
        assert_eq!(
            encode_param(&mut out, &param, Collation::default()),
            Err(TypeError::OutOfRange { target: "decimal" })
        );
    }

    #[test]
    fn test_too_long_and_truncation() {
        let long = Param::new("s", "abcdef").with_type(SqlType::NVarChar(Some(4)));
        let mut out = Vec::new();
        assert_eq!(
            encode_param(&mut out, &long, Collation::default()),
            Err(TypeError::ValueTooLong {
                declared: 8,
                actual: 12
            })
        );

        let back = decode_param(&mut &encoded(&long.truncate(true))[..]).unwrap();
        assert_eq!(back.value, Value::String("abcd".into()));

        // "abc😀": the pair would straddle the 4-unit limit
        let emoji = Param::new("s", "abc😀")
            .with_type(SqlType::NVarChar(Some(4)))
            .truncate(true);
        let back = decode_param(&mut &encoded(&emoji)[..]).unwrap();
        assert_eq!(back.value, Value::String("abc".into()));
    }

    #[test]
    fn test_varchar_uses_collation_code_page() {
        let param = Param::new("s", "café").with_type(SqlType::VarChar(Some(10)));
        let out = encoded(&param);
        assert_eq!(&out[out.len() - 6..], &[4, 0, b'c', b'a', b'f', 0xE9]);
    }

    #[test]
    fn test_max_param_is_plp() {
        let param = Param::new("b", vec![7u8; 3]).with_type(SqlType::VarBinary(None));
        let out = encoded(&param);
        assert_eq!(
            &out[6..],
            &[0xA5, 0xFF, 0xFF, 3, 0, 0, 0, 0, 0, 0, 0, 3, 0, 0, 0, 7, 7, 7, 0, 0, 0, 0]
        );
        let back = decode_param(&mut &out[..]).unwrap();
        assert_eq!(back.value.as_bytes(), Some(&[7u8, 7, 7][..]));
    }

    #[test]
    fn test_temporal_params() {
        let dt = NaiveDate::from_ymd_opt(2021, 6, 30)
            .unwrap()
            .and_hms_opt(12, 30, 0)
            .unwrap();
        for ty in [
            SqlType::DateTime,
            SqlType::DateTime2(7),
            SqlType::SmallDateTime,
        ] {
            let back = decode_param(&mut &encoded(&Param::new("t", dt).with_type(ty))[..]).unwrap();
            let Value::DateTime(got) = back.value else {
                panic!("expected datetime for {ty:?}");
            };
            assert_eq!(got.date(), dt.date(), "{ty:?}");
        }
        let back = decode_param(&mut &encoded(&Param::new("d", dt).with_type(SqlType::Date))[..])
            .unwrap();
        assert_eq!(back.value, Value::Date(dt.date()));
    }

    #[test]
    fn test_declaration_list() {
        let params = [
            Param::new("a", 1_i32),
            Param::new("@b", "xy").output(),
            Param::new("c", Value::Null).with_type(SqlType::Decimal {
                precision: 38,
                scale: 4,
            }),
        ];
        assert_eq!(
            declaration_list(&params),
            "@a int, @b nvarchar(2) output, @c decimal(38,4)"
        );
    }

    #[test]
    fn test_rows_decode_back() {
        let columns = vec![
            Column::new("id", TypeInfo::new(TypeId::IntN).with_len(4)),
            Column::new(
                "name",
                TypeInfo::new(TypeId::NVarChar)
                    .with_len(40)
                    .with_collation(Collation::default()),
            ),
        ];
        let values = vec![Value::I32(9), Value::Null];

        let mut row = Vec::new();
        encode_row(&mut row, &columns, &values).unwrap();
        let mut src = &row[1..];
        assert_eq!(row[0], 0xD1);
        assert_eq!(decode_column(&columns[0].type_info, &mut src).unwrap(), values[0]);
        assert_eq!(decode_column(&columns[1].type_info, &mut src).unwrap(), Value::Null);
        assert!(src.is_empty());

        let mut nbc = Vec::new();
        encode_nbc_row(&mut nbc, &columns, &values).unwrap();
        assert_eq!(nbc, [0xD2, 0b10, 4, 9, 0, 0, 0]);

        assert!(encode_row(&mut Vec::new(), &columns, &values[..1]).is_err());
    }

    #[test]
    fn test_stream_head_announces_unknown_length() {
        let param = Param::stream("doc", &b"<a/>"[..]).with_type(SqlType::VarBinary(None));
        let mut out = Vec::new();
        let mut encoder = encode_stream_head(&mut out, &param, Collation::default()).unwrap();
        assert_eq!(&out[..6], &[4, b'@', 0, b'd', 0, b'o']);
        assert_eq!(&out[out.len() - 8..], &crate::decode::PLP_UNKNOWN.to_le_bytes());

        encoder.push(b"<a/>", &mut out).unwrap();
        encoder.finish(&mut out).unwrap();
        let back = decode_param(&mut &out[..]).unwrap();
        assert_eq!(back.value.as_bytes(), Some(&b"<a/>"[..]));
    }

    #[test]
    fn test_streamed_param_defaults_and_checks() {
        let param = Param::stream("s", &b""[..]);
        assert_eq!(param.sql_type(), SqlType::NVarChar(None));
        assert_eq!(param.declaration(), "@s nvarchar(max)");
        assert!(encode_param(&mut Vec::new(), &param, Collation::default()).is_err());

        let bounded = param.with_type(SqlType::NVarChar(Some(20)));
        assert!(encode_stream_head(&mut Vec::new(), &bounded, Collation::default()).is_err());
    }

    #[test]
    fn test_fixed_column_rejects_null() {
        let info = TypeInfo::new(TypeId::Int4);
        assert_eq!(
            encode_value(&mut Vec::new(), &info, &Value::Null, false),
            Err(TypeError::UnexpectedNull)
        );
    }
}
