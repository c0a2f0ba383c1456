//! TYPE_INFO and column descriptors.
//!
//! TYPE_INFO follows the type byte with whatever the type needs:
//!
//! - fixed types: nothing,
//! - `date`: nothing; `time`, `datetime2`, `datetimeoffset`: a scale byte,
//! - `xml`: a schema-present byte and, when set, three schema names,
//! - `udt`: a 2-byte length and four type names,
//! - everything else: a length of the registry width, then precision and
//!   scale for decimals, then five collation bytes for character types.
//!
//! [`TypeInfo::fixed_len`] reports how many bytes follow the type byte
//! before any variable-length names, so streaming readers can fetch the
//! fixed part in one go.

use bytes::{Buf, BufMut};
use tds_wire::collation::COLLATION_SIZE;
use tds_wire::registry::{self, TypeProps, decimal_width, time_width};
use tds_wire::utf16::{read_b_varchar, read_us_varchar, write_b_varchar, write_us_varchar};
use tds_wire::{Collation, ColumnFlags, ProtocolError, SqlType, TypeId};

use crate::error::TypeError;

/// `(max)` marker in a 2-byte length.
pub const MAX_LEN_MARKER: u32 = 0xFFFF;

/// How a value of a type is laid out in a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueLayout {
    /// Exactly this many bytes, never null.
    Fixed(usize),
    /// Length prefix of 1, 2 or 4 bytes, then the value.
    Prefixed(u8),
    /// Partially length-prefixed chunks.
    Plp,
    /// Text pointer, timestamp, 4-byte length, value.
    TextPtr,
}

/// Decoded TYPE_INFO.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeInfo {
    /// Wire type.
    pub id: TypeId,
    /// Declared maximum length in bytes; [`MAX_LEN_MARKER`] for `(max)`.
    pub max_len: u32,
    /// Decimal precision.
    pub precision: u8,
    /// Decimal or fractional-second scale.
    pub scale: u8,
    /// Collation of character types.
    pub collation: Option<Collation>,
    /// `database.owner.collection` of a typed `xml` column.
    pub xml_schema: Option<String>,
    /// `database.schema.type` of a CLR column.
    pub udt_name: Option<String>,
}

impl TypeInfo {
    /// Type info with no length, precision or collation.
    #[must_use]
    pub const fn new(id: TypeId) -> Self {
        Self {
            id,
            max_len: 0,
            precision: 0,
            scale: 0,
            collation: None,
            xml_schema: None,
            udt_name: None,
        }
    }

    /// Set the declared length.
    #[must_use]
    pub const fn with_len(mut self, max_len: u32) -> Self {
        self.max_len = max_len;
        self
    }

    /// Set precision and scale.
    #[must_use]
    pub const fn with_precision(mut self, precision: u8, scale: u8) -> Self {
        self.precision = precision;
        self.scale = scale;
        self
    }

    /// Set the fractional-second scale.
    #[must_use]
    pub const fn with_scale(mut self, scale: u8) -> Self {
        self.scale = scale;
        self
    }

    /// Set the collation.
    #[must_use]
    pub const fn with_collation(mut self, collation: Collation) -> Self {
        self.collation = Some(collation);
        self
    }

    /// Wire shape of a parameter declared as `ty`.
    #[must_use]
    pub fn for_sql_type(ty: SqlType, collation: Collation) -> Self {
        let info = Self::new(ty.wire()).with_len(u32::from(ty.declared_len()));
        match ty {
            SqlType::Decimal { precision, scale } => info
                .with_len(u32::from(decimal_width(precision)))
                .with_precision(precision, scale),
            SqlType::Time(s) | SqlType::DateTime2(s) | SqlType::DateTimeOffset(s) => {
                info.with_scale(s)
            }
            SqlType::Char(_) | SqlType::VarChar(_) | SqlType::NChar(_) | SqlType::NVarChar(_) => {
                info.with_collation(collation)
            }
            _ => info,
        }
    }

    /// Registry row.
    #[must_use]
    pub fn props(&self) -> &'static TypeProps {
        registry::props(self.id)
    }

    /// Whether values are sent as PLP chunks.
    #[must_use]
    pub fn is_plp(&self) -> bool {
        let props = self.props();
        props.always_plp() || (props.max && props.len_width == 2 && self.max_len == MAX_LEN_MARKER)
    }

    /// Row layout of a value.
    #[must_use]
    pub fn layout(&self) -> ValueLayout {
        let props = self.props();
        if let Some(width) = props.fixed {
            return ValueLayout::Fixed(usize::from(width));
        }
        if self.is_plp() {
            return ValueLayout::Plp;
        }
        if props.table {
            return ValueLayout::TextPtr;
        }
        ValueLayout::Prefixed(props.len_width)
    }

    /// Bytes after the type byte up to the first variable-length name.
    #[must_use]
    pub fn fixed_len(props: &TypeProps) -> usize {
        if props.is_fixed() {
            return 0;
        }
        if !props.date_time.is_empty() {
            return usize::from(props.has_scale);
        }
        match props.id {
            TypeId::Xml => 1,
            TypeId::Udt => 2,
            TypeId::Tvp => 0,
            _ => {
                usize::from(props.len_width)
                    + if props.pr_sc { 2 } else { 0 }
                    + if props.is_text { COLLATION_SIZE } else { 0 }
            }
        }
    }

    /// Decode the fixed part of TYPE_INFO for `code`.
    pub fn decode_fixed(code: u8, src: &mut impl Buf) -> Result<Self, TypeError> {
        let props = registry::lookup(code).ok_or(ProtocolError::UnknownType(code))?;
        let need = Self::fixed_len(props);
        if src.remaining() < need {
            return Err(ProtocolError::IncompletePacket {
                expected: need,
                actual: src.remaining(),
            }
            .into());
        }
        let mut info = Self::new(props.id);
        if props.is_fixed() {
            info.max_len = props.fixed.map_or(0, u32::from);
            return Ok(info);
        }
        if !props.date_time.is_empty() {
            if props.has_scale {
                info.scale = src.get_u8();
            }
            return Ok(info);
        }
        match props.id {
            TypeId::Xml => {
                // schema-present flag; names follow in decode_names
                info.max_len = u32::from(src.get_u8());
                return Ok(info);
            }
            TypeId::Udt => {
                info.max_len = u32::from(src.get_u16_le());
                return Ok(info);
            }
            TypeId::Tvp => return Err(TypeError::UnsupportedType(code)),
            _ => {}
        }
        info.max_len = match props.len_width {
            1 => u32::from(src.get_u8()),
            2 => u32::from(src.get_u16_le()),
            _ => src.get_u32_le(),
        };
        if props.pr_sc {
            info.precision = src.get_u8();
            info.scale = src.get_u8();
        }
        if props.is_text {
            info.collation = Some(Collation::decode(src)?);
        }
        Ok(info)
    }

    /// Whether [`decode_names`](Self::decode_names) has anything to read.
    #[must_use]
    pub fn has_names(&self) -> bool {
        match self.id {
            TypeId::Xml => self.max_len != 0,
            TypeId::Udt => true,
            _ => false,
        }
    }

    /// Decode the schema or CLR type names following the fixed part.
    pub fn decode_names(&mut self, src: &mut impl Buf) -> Result<(), TypeError> {
        match self.id {
            TypeId::Xml if self.max_len != 0 => {
                let db = read_b_varchar(src)?;
                let owner = read_b_varchar(src)?;
                let collection = read_us_varchar(src)?;
                self.xml_schema = Some(format!("{db}.{owner}.{collection}"));
                self.max_len = 0;
            }
            TypeId::Xml => {}
            TypeId::Udt => {
                let db = read_b_varchar(src)?;
                let schema = read_b_varchar(src)?;
                let name = read_b_varchar(src)?;
                let _assembly = read_us_varchar(src)?;
                self.udt_name = Some(format!("{db}.{schema}.{name}"));
            }
            _ => {}
        }
        Ok(())
    }

    /// Decode a complete TYPE_INFO, type byte included.
    pub fn decode(src: &mut impl Buf) -> Result<Self, TypeError> {
        if !src.has_remaining() {
            return Err(ProtocolError::UnexpectedEof.into());
        }
        let code = src.get_u8();
        let mut info = Self::decode_fixed(code, src)?;
        if info.has_names() {
            info.decode_names(src)?;
        }
        Ok(info)
    }

    /// Encode TYPE_INFO, type byte included.
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<(), TypeError> {
        let props = self.props();
        dst.put_u8(self.id as u8);
        if props.is_fixed() {
            return Ok(());
        }
        if !props.date_time.is_empty() {
            if props.has_scale {
                dst.put_u8(self.scale);
            }
            return Ok(());
        }
        match self.id {
            TypeId::Xml => {
                dst.put_u8(0);
                return Ok(());
            }
            TypeId::Udt => {
                dst.put_u16_le(u16::try_from(self.max_len).unwrap_or(u16::MAX));
                let name = self.udt_name.as_deref().unwrap_or("..");
                let mut parts = name.splitn(3, '.');
                for _ in 0..3 {
                    write_b_varchar(dst, parts.next().unwrap_or(""))?;
                }
                write_us_varchar(dst, "")?;
                return Ok(());
            }
            TypeId::Tvp => return Err(TypeError::UnsupportedType(self.id as u8)),
            _ => {}
        }
        #[allow(clippy::cast_possible_truncation)]
        match props.len_width {
            1 => dst.put_u8(self.max_len as u8),
            2 => dst.put_u16_le(self.max_len as u16),
            _ => dst.put_u32_le(self.max_len),
        }
        if props.pr_sc {
            dst.put_u8(self.precision);
            dst.put_u8(self.scale);
        }
        if props.is_text {
            self.collation.unwrap_or_default().encode(dst);
        }
        Ok(())
    }

    /// Byte width of a fixed-shape value of this type, if it has one.
    ///
    /// Covers date/time types whose width follows from the scale.
    #[must_use]
    pub fn value_width(&self) -> Option<usize> {
        let props = self.props();
        if let Some(w) = props.fixed {
            return Some(usize::from(w));
        }
        let tw = usize::from(time_width(self.scale));
        match self.id {
            TypeId::Date => Some(3),
            TypeId::Time => Some(tw),
            TypeId::DateTime2 => Some(tw + 3),
            TypeId::DateTimeOffset => Some(tw + 5),
            TypeId::Guid => Some(16),
            _ => None,
        }
    }
}

/// A result column from COLMETADATA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name, empty when the expression has none.
    pub name: String,
    /// Position in the result set.
    pub ordinal: usize,
    /// User type tag.
    pub user_type: u32,
    /// Column flags.
    pub flags: ColumnFlags,
    /// Wire type.
    pub type_info: TypeInfo,
    /// Owning table of a blob column, one entry per name part.
    pub table_name: Option<Vec<String>>,
}

impl Column {
    /// Column with default flags.
    #[must_use]
    pub fn new(name: impl Into<String>, type_info: TypeInfo) -> Self {
        Self {
            name: name.into(),
            ordinal: 0,
            user_type: 0,
            flags: ColumnFlags::NULLABLE,
            type_info,
            table_name: None,
        }
    }

    /// Whether the column admits NULL.
    #[must_use]
    pub fn is_nullable(&self) -> bool {
        self.flags.is_nullable()
    }

    /// Whether the column is a `(max)` form.
    #[must_use]
    pub fn is_max(&self) -> bool {
        self.type_info.is_plp()
    }

    /// Decode one column definition of COLMETADATA.
    pub fn decode(src: &mut impl Buf, ordinal: usize) -> Result<Self, TypeError> {
        if src.remaining() < 6 {
            return Err(ProtocolError::UnexpectedEof.into());
        }
        let user_type = src.get_u32_le();
        let flags = ColumnFlags::from_bits_retain(src.get_u16_le());
        let type_info = TypeInfo::decode(src)?;
        let table_name = if type_info.props().table {
            Some(decode_table_name(src)?)
        } else {
            None
        };
        let name = read_b_varchar(src)?;
        Ok(Self {
            name,
            ordinal,
            user_type,
            flags,
            type_info,
            table_name,
        })
    }

    /// Encode one column definition of COLMETADATA.
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<(), TypeError> {
        dst.put_u32_le(self.user_type);
        dst.put_u16_le(self.flags.bits());
        self.type_info.encode(dst)?;
        if self.type_info.props().table {
            let parts = self.table_name.as_deref().unwrap_or_default();
            dst.put_u8(u8::try_from(parts.len()).unwrap_or(u8::MAX));
            for part in parts {
                write_us_varchar(dst, part)?;
            }
        }
        write_b_varchar(dst, &self.name)?;
        Ok(())
    }
}

/// Read a multi-part table name: a part count then US_VARCHAR parts.
pub fn decode_table_name(src: &mut impl Buf) -> Result<Vec<String>, TypeError> {
    if !src.has_remaining() {
        return Err(ProtocolError::UnexpectedEof.into());
    }
    let parts = src.get_u8();
    (0..parts)
        .map(|_| read_us_varchar(src).map_err(TypeError::from))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_param_type_info_shapes() {
        let c = Collation::default();
        let mut out = Vec::new();
        TypeInfo::for_sql_type(SqlType::Int, c).encode(&mut out).unwrap();
        assert_eq!(out, [0x26, 4]);

        out.clear();
        TypeInfo::for_sql_type(SqlType::Decimal { precision: 38, scale: 4 }, c)
            .encode(&mut out)
            .unwrap();
        assert_eq!(out, [0x6A, 17, 38, 4]);

        out.clear();
        TypeInfo::for_sql_type(SqlType::NVarChar(None), c)
            .encode(&mut out)
            .unwrap();
        assert_eq!(out, [0xE7, 0xFF, 0xFF, 0x09, 0x04, 0xD0, 0x00, 0x34]);

        out.clear();
        TypeInfo::for_sql_type(SqlType::DateTimeOffset(7), c)
            .encode(&mut out)
            .unwrap();
        assert_eq!(out, [0x2B, 7]);

        out.clear();
        TypeInfo::for_sql_type(SqlType::Date, c).encode(&mut out).unwrap();
        assert_eq!(out, [0x28]);
    }

    #[test]
    fn test_decode_matches_fixed_len() {
        for ty in [
            SqlType::BigInt,
            SqlType::Decimal { precision: 9, scale: 2 },
            SqlType::VarChar(Some(20)),
            SqlType::NVarChar(None),
            SqlType::VarBinary(Some(5)),
            SqlType::Time(3),
            SqlType::Xml,
        ] {
            let info = TypeInfo::for_sql_type(ty, Collation::default());
            let mut out = Vec::new();
            info.encode(&mut out).unwrap();
            assert_eq!(out.len() - 1, TypeInfo::fixed_len(info.props()), "{ty:?}");
            let back = TypeInfo::decode(&mut &out[..]).unwrap();
            assert_eq!(back.id, info.id);
            assert_eq!(back.scale, info.scale);
            assert_eq!(back.collation, info.collation);
            assert_eq!(back.is_plp(), ty.is_plp(), "{ty:?}");
        }
    }

    #[test]
    fn test_layouts() {
        assert_eq!(TypeInfo::new(TypeId::Int4).layout(), ValueLayout::Fixed(4));
        assert_eq!(TypeInfo::new(TypeId::IntN).with_len(4).layout(), ValueLayout::Prefixed(1));
        assert_eq!(
            TypeInfo::new(TypeId::NVarChar).with_len(MAX_LEN_MARKER).layout(),
            ValueLayout::Plp
        );
        assert_eq!(TypeInfo::new(TypeId::NVarChar).with_len(40).layout(), ValueLayout::Prefixed(2));
        assert_eq!(TypeInfo::new(TypeId::Xml).layout(), ValueLayout::Plp);
        assert_eq!(TypeInfo::new(TypeId::NText).layout(), ValueLayout::TextPtr);
        assert_eq!(TypeInfo::new(TypeId::Variant).layout(), ValueLayout::Prefixed(4));
    }

    #[test]
    fn test_typed_xml_schema_names() {
        let mut wire = vec![0xF1, 0x01];
        write_b_varchar(&mut wire, "db").unwrap();
        write_b_varchar(&mut wire, "dbo").unwrap();
        write_us_varchar(&mut wire, "coll").unwrap();
        let info = TypeInfo::decode(&mut &wire[..]).unwrap();
        assert_eq!(info.xml_schema.as_deref(), Some("db.dbo.coll"));
        assert!(info.is_plp());
    }

    #[test]
    fn test_column_round_trip_with_table_name() {
        let mut col = Column::new("body", TypeInfo::new(TypeId::NText).with_len(0x7FFF_FFFF));
        col.type_info.collation = Some(Collation::default());
        col.table_name = Some(vec!["dbo".into(), "docs".into()]);
        col.ordinal = 2;

        let mut out = Vec::new();
        col.encode(&mut out).unwrap();
        let back = Column::decode(&mut &out[..], 2).unwrap();
        assert_eq!(back, col);
    }
}
