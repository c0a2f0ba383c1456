//! Type registry.
//!
//! [`lookup`] maps a wire type code to the properties the codec needs to
//! read and write it. [`SqlType`] is the caller-facing type: it picks the
//! wire type a parameter is sent as and renders the declaration used in
//! the `sp_executesql` parameter list.

use bitflags::bitflags;

use crate::types::TypeId;
use crate::version::TdsVersion;

bitflags! {
    /// Date/time components a type carries.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DateTimeParts: u8 {
        /// Time of day.
        const TIME = 0x01;
        /// Calendar date.
        const DATE = 0x02;
        /// UTC offset.
        const TZ = 0x04;
    }
}

/// Value families a wire type decodes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// Always null.
    Null,
    /// Boolean.
    Bool,
    /// Unsigned byte.
    U8,
    /// 16-bit integer.
    I16,
    /// 32-bit integer.
    I32,
    /// 64-bit integer.
    I64,
    /// Single precision float.
    F32,
    /// Double precision float.
    F64,
    /// Exact decimal.
    Decimal,
    /// Text.
    String,
    /// Opaque bytes.
    Bytes,
    /// GUID.
    Guid,
    /// Date without time.
    Date,
    /// Time of day.
    Time,
    /// Date and time without offset.
    DateTime,
    /// Date and time with offset.
    DateTimeOffset,
    /// XML document.
    Xml,
    /// `sql_variant`.
    Variant,
    /// Table-valued parameter.
    Table,
}

/// Properties of a wire type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeProps {
    /// Wire code.
    pub id: TypeId,
    /// Diagnostic name.
    pub name: &'static str,
    /// Width in bytes for fixed types.
    pub fixed: Option<u8>,
    /// Width of the length prefix of a value (0, 1, 2 or 4).
    pub len_width: u8,
    /// Value is an opaque byte stream.
    pub bytes: bool,
    /// Value bytes are UTF-16LE.
    pub nchar: bool,
    /// TYPE_INFO carries a collation.
    pub is_text: bool,
    /// Supports the `(max)` form.
    pub max: bool,
    /// Carries precision and scale.
    pub pr_sc: bool,
    /// Blob type preceded by a table name and text pointer.
    pub table: bool,
    /// TYPE_INFO carries a fractional-second scale.
    pub has_scale: bool,
    /// Date/time components.
    pub date_time: DateTimeParts,
    /// First protocol version that knows this type.
    pub min_version: Option<TdsVersion>,
    /// Exact value family.
    pub specific: ValueKind,
    /// Widened value family.
    pub generic: ValueKind,
}

impl TypeProps {
    const fn new(id: TypeId, name: &'static str, kind: ValueKind, generic: ValueKind) -> Self {
        Self {
            id,
            name,
            fixed: None,
            len_width: 0,
            bytes: false,
            nchar: false,
            is_text: false,
            max: false,
            pr_sc: false,
            table: false,
            has_scale: false,
            date_time: DateTimeParts::empty(),
            min_version: None,
            specific: kind,
            generic,
        }
    }

    const fn fixed(mut self, width: u8) -> Self {
        self.fixed = Some(width);
        self
    }

    const fn len(mut self, width: u8) -> Self {
        self.len_width = width;
        self
    }

    const fn bytes(mut self) -> Self {
        self.bytes = true;
        self
    }

    const fn text(mut self) -> Self {
        self.is_text = true;
        self
    }

    const fn nchar(mut self) -> Self {
        self.nchar = true;
        self.is_text = true;
        self
    }

    const fn max(mut self) -> Self {
        self.max = true;
        self
    }

    const fn pr_sc(mut self) -> Self {
        self.pr_sc = true;
        self
    }

    const fn table(mut self) -> Self {
        self.table = true;
        self
    }

    const fn date_time(mut self, parts: DateTimeParts, scaled: bool) -> Self {
        self.date_time = parts;
        self.has_scale = scaled;
        self.min_version = Some(TdsVersion::V7_3A);
        self
    }

    /// Whether the type has a fixed width.
    #[must_use]
    pub const fn is_fixed(&self) -> bool {
        self.fixed.is_some()
    }

    /// Whether values of this type are always sent as PLP chunks.
    #[must_use]
    pub const fn always_plp(&self) -> bool {
        matches!(self.id, TypeId::Xml | TypeId::Udt)
    }
}

use DateTimeParts as Dt;
use ValueKind as K;

static REGISTRY: [TypeProps; 43] = [
    TypeProps::new(TypeId::Null, "null", K::Null, K::Null).fixed(0),
    TypeProps::new(TypeId::Int1, "tinyint", K::U8, K::I64).fixed(1),
    TypeProps::new(TypeId::Bit, "bit", K::Bool, K::Bool).fixed(1),
    TypeProps::new(TypeId::Int2, "smallint", K::I16, K::I64).fixed(2),
    TypeProps::new(TypeId::Int4, "int", K::I32, K::I64).fixed(4),
    TypeProps::new(TypeId::Int8, "bigint", K::I64, K::I64).fixed(8),
    TypeProps::new(TypeId::DateTime4, "smalldatetime", K::DateTime, K::DateTime)
        .fixed(4),
    TypeProps::new(TypeId::Float4, "real", K::F32, K::F64).fixed(4),
    TypeProps::new(TypeId::Money, "money", K::Decimal, K::Decimal).fixed(8),
    TypeProps::new(TypeId::DateTime, "datetime", K::DateTime, K::DateTime).fixed(8),
    TypeProps::new(TypeId::Float8, "float", K::F64, K::F64).fixed(8),
    TypeProps::new(TypeId::Money4, "smallmoney", K::Decimal, K::Decimal).fixed(4),
    TypeProps::new(TypeId::Guid, "uniqueidentifier", K::Guid, K::Guid).len(1),
    TypeProps::new(TypeId::IntN, "intn", K::I64, K::I64).len(1),
    TypeProps::new(TypeId::Decimal, "decimal", K::Decimal, K::Decimal)
        .len(1)
        .pr_sc(),
    TypeProps::new(TypeId::Numeric, "numeric", K::Decimal, K::Decimal)
        .len(1)
        .pr_sc(),
    TypeProps::new(TypeId::BitN, "bitn", K::Bool, K::Bool).len(1),
    TypeProps::new(TypeId::DecimalN, "decimal", K::Decimal, K::Decimal)
        .len(1)
        .pr_sc(),
    TypeProps::new(TypeId::NumericN, "numeric", K::Decimal, K::Decimal)
        .len(1)
        .pr_sc(),
    TypeProps::new(TypeId::FloatN, "floatn", K::F64, K::F64).len(1),
    TypeProps::new(TypeId::MoneyN, "moneyn", K::Decimal, K::Decimal).len(1),
    TypeProps::new(TypeId::DateTimeN, "datetimen", K::DateTime, K::DateTime).len(1),
    TypeProps::new(TypeId::Char, "char", K::String, K::String).len(1),
    TypeProps::new(TypeId::VarChar, "varchar", K::String, K::String).len(1),
    TypeProps::new(TypeId::Binary, "binary", K::Bytes, K::Bytes)
        .len(1)
        .bytes(),
    TypeProps::new(TypeId::VarBinary, "varbinary", K::Bytes, K::Bytes)
        .len(1)
        .bytes(),
    TypeProps::new(TypeId::BigVarChar, "varchar", K::String, K::String)
        .len(2)
        .text()
        .max(),
    TypeProps::new(TypeId::BigVarBinary, "varbinary", K::Bytes, K::Bytes)
        .len(2)
        .bytes()
        .max(),
    TypeProps::new(TypeId::BigChar, "char", K::String, K::String)
        .len(2)
        .text(),
    TypeProps::new(TypeId::BigBinary, "binary", K::Bytes, K::Bytes)
        .len(2)
        .bytes(),
    TypeProps::new(TypeId::NChar, "nchar", K::String, K::String)
        .len(2)
        .nchar(),
    TypeProps::new(TypeId::NVarChar, "nvarchar", K::String, K::String)
        .len(2)
        .nchar()
        .max(),
    TypeProps::new(TypeId::Text, "text", K::String, K::String)
        .len(4)
        .text()
        .table(),
    TypeProps::new(TypeId::Image, "image", K::Bytes, K::Bytes)
        .len(4)
        .bytes()
        .table(),
    TypeProps::new(TypeId::NText, "ntext", K::String, K::String)
        .len(4)
        .nchar()
        .table(),
    TypeProps::new(TypeId::Date, "date", K::Date, K::DateTime)
        .len(1)
        .date_time(Dt::DATE, false),
    TypeProps::new(TypeId::Time, "time", K::Time, K::Time)
        .len(1)
        .date_time(Dt::TIME, true),
    TypeProps::new(TypeId::DateTime2, "datetime2", K::DateTime, K::DateTime)
        .len(1)
        .date_time(Dt::DATE.union(Dt::TIME), true),
    TypeProps::new(
        TypeId::DateTimeOffset,
        "datetimeoffset",
        K::DateTimeOffset,
        K::DateTime,
    )
    .len(1)
    .date_time(Dt::DATE.union(Dt::TIME).union(Dt::TZ), true),
    TypeProps::new(TypeId::Variant, "sql_variant", K::Variant, K::Variant).len(4),
    TypeProps::new(TypeId::Udt, "udt", K::Bytes, K::Bytes)
        .len(2)
        .bytes()
        .max(),
    TypeProps::new(TypeId::Xml, "xml", K::Xml, K::String).max(),
    TypeProps::new(TypeId::Tvp, "table", K::Table, K::Table),
];

/// Properties for a wire type code.
#[must_use]
pub fn lookup(code: u8) -> Option<&'static TypeProps> {
    REGISTRY.iter().find(|p| p.id as u8 == code)
}

/// Properties for a known [`TypeId`].
#[must_use]
pub fn props(id: TypeId) -> &'static TypeProps {
    // every TypeId variant has a row
    REGISTRY
        .iter()
        .find(|p| p.id == id)
        .unwrap_or(&REGISTRY[0])
}

/// Length of a `varchar(n)` style declaration; `None` is `(max)`.
pub type Length = Option<u16>;

/// Caller-facing SQL type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum SqlType {
    /// `bit`.
    Bit,
    /// `tinyint`.
    TinyInt,
    /// `smallint`.
    SmallInt,
    /// `int`.
    Int,
    /// `bigint`.
    BigInt,
    /// `real`.
    Real,
    /// `float`.
    Float,
    /// `decimal(p,s)`.
    Decimal {
        /// Total digits, 1 to 38.
        precision: u8,
        /// Digits after the point.
        scale: u8,
    },
    /// `money`.
    Money,
    /// `smallmoney`.
    SmallMoney,
    /// `char(n)`.
    Char(u16),
    /// `varchar(n)` or `varchar(max)`.
    VarChar(Length),
    /// `nchar(n)`.
    NChar(u16),
    /// `nvarchar(n)` or `nvarchar(max)`.
    NVarChar(Length),
    /// `binary(n)`.
    Binary(u16),
    /// `varbinary(n)` or `varbinary(max)`.
    VarBinary(Length),
    /// `uniqueidentifier`.
    UniqueIdentifier,
    /// `date`.
    Date,
    /// `time(s)`.
    Time(u8),
    /// Legacy `datetime`.
    DateTime,
    /// `smalldatetime`.
    SmallDateTime,
    /// `datetime2(s)`.
    DateTime2(u8),
    /// `datetimeoffset(s)`.
    DateTimeOffset(u8),
    /// `xml`.
    Xml,
}

/// Largest `nvarchar(n)` length before `(max)` is required.
pub const MAX_NCHAR_LEN: u16 = 4000;

/// Largest `varchar(n)`/`varbinary(n)` length before `(max)` is required.
pub const MAX_CHAR_LEN: u16 = 8000;

/// Byte width of a `time` value at a given scale.
#[must_use]
pub const fn time_width(scale: u8) -> u8 {
    match scale {
        0..=2 => 3,
        3..=4 => 4,
        _ => 5,
    }
}

/// Byte width of a decimal value for a given precision.
#[must_use]
pub const fn decimal_width(precision: u8) -> u8 {
    match precision {
        0..=9 => 5,
        10..=19 => 9,
        20..=28 => 13,
        _ => 17,
    }
}

impl SqlType {
    /// Wire type the parameter is sent as.
    #[must_use]
    pub const fn wire(&self) -> TypeId {
        match self {
            Self::Bit => TypeId::BitN,
            Self::TinyInt | Self::SmallInt | Self::Int | Self::BigInt => TypeId::IntN,
            Self::Real | Self::Float => TypeId::FloatN,
            Self::Decimal { .. } => TypeId::DecimalN,
            Self::Money | Self::SmallMoney => TypeId::MoneyN,
            Self::Char(_) => TypeId::BigChar,
            Self::VarChar(_) => TypeId::BigVarChar,
            Self::NChar(_) => TypeId::NChar,
            Self::NVarChar(_) => TypeId::NVarChar,
            Self::Binary(_) => TypeId::BigBinary,
            Self::VarBinary(_) => TypeId::BigVarBinary,
            Self::UniqueIdentifier => TypeId::Guid,
            Self::Date => TypeId::Date,
            Self::Time(_) => TypeId::Time,
            Self::DateTime | Self::SmallDateTime => TypeId::DateTimeN,
            Self::DateTime2(_) => TypeId::DateTime2,
            Self::DateTimeOffset(_) => TypeId::DateTimeOffset,
            Self::Xml => TypeId::Xml,
        }
    }

    /// Registry row of the wire type.
    #[must_use]
    pub fn props(&self) -> &'static TypeProps {
        props(self.wire())
    }

    /// Declared length in TYPE_INFO, in bytes. `0xFFFF` marks `(max)`.
    ///
    /// Zero for types whose TYPE_INFO carries no length.
    #[must_use]
    pub const fn declared_len(&self) -> u16 {
        match self {
            Self::Bit | Self::TinyInt => 1,
            Self::SmallInt => 2,
            Self::Int | Self::Real | Self::SmallMoney | Self::SmallDateTime => 4,
            Self::BigInt | Self::Float | Self::Money | Self::DateTime => 8,
            Self::Decimal { precision, .. } => decimal_width(*precision) as u16,
            Self::UniqueIdentifier => 16,
            Self::Char(n) | Self::Binary(n) => *n,
            Self::NChar(n) => n.saturating_mul(2),
            Self::VarChar(Some(n)) | Self::VarBinary(Some(n)) => *n,
            Self::NVarChar(Some(n)) => n.saturating_mul(2),
            Self::VarChar(None) | Self::VarBinary(None) | Self::NVarChar(None) => 0xFFFF,
            Self::Date
            | Self::Time(_)
            | Self::DateTime2(_)
            | Self::DateTimeOffset(_)
            | Self::Xml => 0,
        }
    }

    /// Whether values go out as PLP chunks.
    #[must_use]
    pub const fn is_plp(&self) -> bool {
        matches!(
            self,
            Self::VarChar(None) | Self::NVarChar(None) | Self::VarBinary(None) | Self::Xml
        )
    }

    /// Fractional-second scale for time types.
    #[must_use]
    pub const fn scale(&self) -> Option<u8> {
        match self {
            Self::Time(s) | Self::DateTime2(s) | Self::DateTimeOffset(s) => Some(*s),
            Self::Decimal { scale, .. } => Some(*scale),
            _ => None,
        }
    }

    /// Declaration text used in the `sp_executesql` parameter list.
    #[must_use]
    pub fn declaration(&self) -> String {
        fn len(n: Length) -> String {
            n.map_or_else(|| "max".to_owned(), |n| n.to_string())
        }
        match self {
            Self::Bit => "bit".into(),
            Self::TinyInt => "tinyint".into(),
            Self::SmallInt => "smallint".into(),
            Self::Int => "int".into(),
            Self::BigInt => "bigint".into(),
            Self::Real => "real".into(),
            Self::Float => "float".into(),
            Self::Decimal { precision, scale } => format!("decimal({precision},{scale})"),
            Self::Money => "money".into(),
            Self::SmallMoney => "smallmoney".into(),
            Self::Char(n) => format!("char({n})"),
            Self::VarChar(n) => format!("varchar({})", len(*n)),
            Self::NChar(n) => format!("nchar({n})"),
            Self::NVarChar(n) => format!("nvarchar({})", len(*n)),
            Self::Binary(n) => format!("binary({n})"),
            Self::VarBinary(n) => format!("varbinary({})", len(*n)),
            Self::UniqueIdentifier => "uniqueidentifier".into(),
            Self::Date => "date".into(),
            Self::Time(s) => format!("time({s})"),
            Self::DateTime => "datetime".into(),
            Self::SmallDateTime => "smalldatetime".into(),
            Self::DateTime2(s) => format!("datetime2({s})"),
            Self::DateTimeOffset(s) => format!("datetimeoffset({s})"),
            Self::Xml => "xml".into(),
        }
    }

    /// `nvarchar` sized for a string of `chars` UTF-16 units.
    #[must_use]
    pub fn nvarchar_for(chars: usize) -> Self {
        match u16::try_from(chars) {
            Ok(n) if n <= MAX_NCHAR_LEN => Self::NVarChar(Some(n.max(1))),
            _ => Self::NVarChar(None),
        }
    }

    /// `varbinary` sized for `len` bytes.
    #[must_use]
    pub fn varbinary_for(len: usize) -> Self {
        match u16::try_from(len) {
            Ok(n) if n <= MAX_CHAR_LEN => Self::VarBinary(Some(n.max(1))),
            _ => Self::VarBinary(None),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_every_type_id_has_a_row() {
        for code in 0u8..=255 {
            if let Some(id) = TypeId::from_u8(code) {
                let row = lookup(code).unwrap();
                assert_eq!(row.id, id);
            } else {
                assert!(lookup(code).is_none());
            }
        }
    }

    #[test]
    fn test_flags() {
        let nvarchar = lookup(0xE7).unwrap();
        assert!(nvarchar.nchar && nvarchar.is_text && nvarchar.max);
        assert_eq!(nvarchar.len_width, 2);

        let int4 = lookup(0x38).unwrap();
        assert_eq!(int4.fixed, Some(4));
        assert_eq!(int4.specific, ValueKind::I32);
        assert_eq!(int4.generic, ValueKind::I64);

        let dto = props(TypeId::DateTimeOffset);
        assert!(dto.date_time.contains(DateTimeParts::TZ));
        assert!(dto.has_scale);
        assert_eq!(dto.min_version, Some(TdsVersion::V7_3A));

        let text = props(TypeId::Text);
        assert!(text.table && text.is_text && !text.nchar);
        assert!(props(TypeId::DecimalN).pr_sc);
    }

    #[test]
    fn test_declarations() {
        assert_eq!(SqlType::NVarChar(Some(100)).declaration(), "nvarchar(100)");
        assert_eq!(SqlType::NVarChar(None).declaration(), "nvarchar(max)");
        assert_eq!(
            SqlType::Decimal {
                precision: 38,
                scale: 4
            }
            .declaration(),
            "decimal(38,4)"
        );
        assert_eq!(SqlType::DateTime2(7).declaration(), "datetime2(7)");
    }

    #[test]
    fn test_wire_mapping() {
        assert_eq!(SqlType::Int.wire(), TypeId::IntN);
        assert_eq!(SqlType::Int.declared_len(), 4);
        assert_eq!(SqlType::NVarChar(Some(10)).declared_len(), 20);
        assert_eq!(SqlType::NVarChar(None).declared_len(), 0xFFFF);
        assert!(SqlType::NVarChar(None).is_plp());
        assert_eq!(
            SqlType::Decimal {
                precision: 38,
                scale: 4
            }
            .declared_len(),
            17
        );
    }

    #[test]
    fn test_widths() {
        assert_eq!(decimal_width(9), 5);
        assert_eq!(decimal_width(10), 9);
        assert_eq!(decimal_width(28), 13);
        assert_eq!(decimal_width(38), 17);
        assert_eq!(time_width(0), 3);
        assert_eq!(time_width(4), 4);
        assert_eq!(time_width(7), 5);
    }

    #[test]
    fn test_sizing_helpers() {
        assert_eq!(SqlType::nvarchar_for(0), SqlType::NVarChar(Some(1)));
        assert_eq!(SqlType::nvarchar_for(4001), SqlType::NVarChar(None));
        assert_eq!(SqlType::varbinary_for(100_000), SqlType::VarBinary(None));
    }
}
