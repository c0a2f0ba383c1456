//! TDS data type codes and column flags.

use bitflags::bitflags;

/// Wire type codes as they appear in TYPE_INFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeId {
    /// Null type.
    Null = 0x1F,
    /// Unsigned 8-bit integer (`tinyint`).
    Int1 = 0x30,
    /// Bit.
    Bit = 0x32,
    /// 16-bit integer.
    Int2 = 0x34,
    /// 32-bit integer.
    Int4 = 0x38,
    /// 64-bit integer.
    Int8 = 0x7F,
    /// 4-byte small datetime.
    DateTime4 = 0x3A,
    /// 32-bit float.
    Float4 = 0x3B,
    /// 8-byte money.
    Money = 0x3C,
    /// 8-byte legacy datetime.
    DateTime = 0x3D,
    /// 64-bit float.
    Float8 = 0x3E,
    /// 4-byte money.
    Money4 = 0x7A,

    /// Unique identifier.
    Guid = 0x24,
    /// Nullable integer of declared width.
    IntN = 0x26,
    /// Legacy decimal.
    Decimal = 0x37,
    /// Legacy numeric.
    Numeric = 0x3F,
    /// Nullable bit.
    BitN = 0x68,
    /// Decimal with precision and scale.
    DecimalN = 0x6A,
    /// Numeric with precision and scale.
    NumericN = 0x6C,
    /// Nullable float of declared width.
    FloatN = 0x6D,
    /// Nullable money of declared width.
    MoneyN = 0x6E,
    /// Nullable legacy datetime of declared width.
    DateTimeN = 0x6F,

    /// Legacy fixed character.
    Char = 0x2F,
    /// Legacy variable character.
    VarChar = 0x27,
    /// Legacy fixed binary.
    Binary = 0x2D,
    /// Legacy variable binary.
    VarBinary = 0x25,

    /// `varchar(n)` / `varchar(max)`.
    BigVarChar = 0xA7,
    /// `varbinary(n)` / `varbinary(max)`.
    BigVarBinary = 0xA5,
    /// `char(n)`.
    BigChar = 0xAF,
    /// `binary(n)`.
    BigBinary = 0xAD,
    /// `nchar(n)`.
    NChar = 0xEF,
    /// `nvarchar(n)` / `nvarchar(max)`.
    NVarChar = 0xE7,

    /// `text`.
    Text = 0x23,
    /// `image`.
    Image = 0x22,
    /// `ntext`.
    NText = 0x63,

    /// `date`.
    Date = 0x28,
    /// `time(n)`.
    Time = 0x29,
    /// `datetime2(n)`.
    DateTime2 = 0x2A,
    /// `datetimeoffset(n)`.
    DateTimeOffset = 0x2B,

    /// `sql_variant`.
    Variant = 0x62,
    /// CLR user-defined type.
    Udt = 0xF0,
    /// `xml`.
    Xml = 0xF1,
    /// Table-valued parameter.
    Tvp = 0xF3,
}

impl TypeId {
    /// Create a type ID from a raw byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x1F => Self::Null,
            0x30 => Self::Int1,
            0x32 => Self::Bit,
            0x34 => Self::Int2,
            0x38 => Self::Int4,
            0x7F => Self::Int8,
            0x3A => Self::DateTime4,
            0x3B => Self::Float4,
            0x3C => Self::Money,
            0x3D => Self::DateTime,
            0x3E => Self::Float8,
            0x7A => Self::Money4,
            0x24 => Self::Guid,
            0x26 => Self::IntN,
            0x37 => Self::Decimal,
            0x3F => Self::Numeric,
            0x68 => Self::BitN,
            0x6A => Self::DecimalN,
            0x6C => Self::NumericN,
            0x6D => Self::FloatN,
            0x6E => Self::MoneyN,
            0x6F => Self::DateTimeN,
            0x2F => Self::Char,
            0x27 => Self::VarChar,
            0x2D => Self::Binary,
            0x25 => Self::VarBinary,
            0xA7 => Self::BigVarChar,
            0xA5 => Self::BigVarBinary,
            0xAF => Self::BigChar,
            0xAD => Self::BigBinary,
            0xEF => Self::NChar,
            0xE7 => Self::NVarChar,
            0x23 => Self::Text,
            0x22 => Self::Image,
            0x63 => Self::NText,
            0x28 => Self::Date,
            0x29 => Self::Time,
            0x2A => Self::DateTime2,
            0x2B => Self::DateTimeOffset,
            0x62 => Self::Variant,
            0xF0 => Self::Udt,
            0xF1 => Self::Xml,
            0xF3 => Self::Tvp,
            _ => return None,
        })
    }
}

bitflags! {
    /// Column flags from COLMETADATA.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ColumnFlags: u16 {
        /// Column accepts NULL.
        const NULLABLE = 0x0001;
        /// Comparisons are case-sensitive.
        const CASE_SENSITIVE = 0x0002;
        /// Column can be written (bits 2-3 hold the update mode).
        const UPDATEABLE = 0x0004;
        /// Update mode is unknown.
        const UPDATEABLE_UNKNOWN = 0x0008;
        /// Identity column.
        const IDENTITY = 0x0010;
        /// Computed column.
        const COMPUTED = 0x0020;
        /// Fixed-length CLR type.
        const FIXED_LEN_CLR = 0x0100;
        /// Sparse column set.
        const SPARSE_COLUMN_SET = 0x0200;
        /// Column is encrypted.
        const ENCRYPTED = 0x0400;
        /// Hidden column (browse mode).
        const HIDDEN = 0x2000;
        /// Key column (browse mode).
        const KEY = 0x4000;
        /// Nullability unknown.
        const NULLABLE_UNKNOWN = 0x8000;
    }
}

impl ColumnFlags {
    /// Whether NULL may appear in this column.
    #[must_use]
    pub const fn is_nullable(self) -> bool {
        self.contains(Self::NULLABLE)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_type_id_from_u8() {
        assert_eq!(TypeId::from_u8(0x38), Some(TypeId::Int4));
        assert_eq!(TypeId::from_u8(0xE7), Some(TypeId::NVarChar));
        assert_eq!(TypeId::from_u8(0x2B), Some(TypeId::DateTimeOffset));
        assert_eq!(TypeId::from_u8(0x99), None);
    }

    #[test]
    fn test_column_flags() {
        let flags = ColumnFlags::from_bits_retain(0x4011);
        assert!(flags.is_nullable());
        assert!(flags.contains(ColumnFlags::IDENTITY));
        assert!(flags.contains(ColumnFlags::KEY));
        assert!(!flags.contains(ColumnFlags::COMPUTED));
    }
}
