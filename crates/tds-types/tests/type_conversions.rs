//! Conversion edge cases across encode, decode and scan.
//!
//! - NULL handling
//! - Unicode boundaries
//! - numeric limits
//! - chunked `(max)` values

#![allow(clippy::unwrap_used, clippy::expect_used)]

use bytes::Bytes;
use tds_types::{
    FromValue, Numeric, Param, PlpReader, TypeError, TypeInfo, Value, decode_column,
    decode_param, encode_param, encode_value,
};
use tds_wire::{Collation, SqlType, TypeId};

fn round_trip(param: &Param) -> Value {
    let mut buf = Vec::new();
    encode_param(&mut buf, param, Collation::default()).unwrap();
    decode_param(&mut &buf[..]).unwrap().value
}

// ============================================================================
// NULL Handling
// ============================================================================

mod null_handling {
    use super::*;

    #[test]
    fn test_typed_nulls_survive_the_wire() {
        for ty in [
            SqlType::Int,
            SqlType::Bit,
            SqlType::Float,
            SqlType::Decimal {
                precision: 18,
                scale: 4,
            },
            SqlType::NVarChar(Some(10)),
            SqlType::NVarChar(None),
            SqlType::VarBinary(None),
            SqlType::UniqueIdentifier,
            SqlType::Date,
            SqlType::DateTimeOffset(3),
            SqlType::Xml,
        ] {
            let value = round_trip(&Param::new("p", Value::Null).with_type(ty));
            assert_eq!(value, Value::Null, "{ty:?}");
        }
    }

    #[test]
    fn test_null_scans_only_into_option() {
        assert_eq!(Option::<String>::from_value(Value::Null).unwrap(), None);
        assert!(matches!(
            String::from_value(Value::Null),
            Err(TypeError::UnexpectedNull)
        ));
        assert!(matches!(
            f64::from_value(Value::Null),
            Err(TypeError::UnexpectedNull)
        ));
    }

    #[test]
    fn test_empty_string_is_not_null() {
        let value = round_trip(&Param::new("p", ""));
        assert_eq!(value, Value::String(String::new()));
        let value = round_trip(&Param::new("p", "").with_type(SqlType::NVarChar(None)));
        assert_eq!(value, Value::String(String::new()));
    }
}

// ============================================================================
// Unicode
// ============================================================================

mod unicode {
    use super::*;

    #[test]
    fn test_supplementary_plane_characters() {
        for text in ["😀", "a😀b", "𝄞 clef", "日本語", "\u{FFFD}"] {
            assert_eq!(round_trip(&Param::new("p", text)), Value::String(text.into()));
        }
    }

    #[test]
    fn test_declared_length_counts_utf16_units() {
        // one astral character is two units
        let fits = Param::new("p", "😀").with_type(SqlType::NVarChar(Some(2)));
        assert_eq!(round_trip(&fits), Value::String("😀".into()));

        let over = Param::new("p", "😀x").with_type(SqlType::NVarChar(Some(2)));
        let mut buf = Vec::new();
        assert!(matches!(
            encode_param(&mut buf, &over, Collation::default()),
            Err(TypeError::ValueTooLong {
                declared: 4,
                actual: 6
            })
        ));
    }
}

// ============================================================================
// Numeric limits
// ============================================================================

mod numeric_limits {
    use super::*;

    #[test]
    fn test_integer_extremes() {
        for v in [i64::MIN, -1, 0, i64::MAX] {
            assert_eq!(round_trip(&Param::new("p", v)), Value::I64(v));
        }
        assert_eq!(round_trip(&Param::new("p", u8::MAX)), Value::U8(255));
    }

    #[test]
    fn test_value_out_of_range_for_declared_type() {
        let p = Param::new("p", 300_i32).with_type(SqlType::TinyInt);
        let mut buf = Vec::new();
        assert!(matches!(
            encode_param(&mut buf, &p, Collation::default()),
            Err(TypeError::OutOfRange { target: "tinyint" })
        ));
    }

    #[test]
    fn test_max_precision_decimal() {
        let text = "-9999999999999999999999999999.9999999999";
        let n: Numeric = text.parse().unwrap();
        let value = round_trip(&Param::new("p", n).with_type(SqlType::Decimal {
            precision: 38,
            scale: 10,
        }));
        assert_eq!(value.to_string(), text);
    }

    #[test]
    fn test_money_scale() {
        let value = round_trip(&Param::new("p", "12.3456".parse::<Numeric>().unwrap()).with_type(SqlType::Money));
        assert_eq!(value.to_string(), "12.3456");
        let d = rust_decimal::Decimal::from_value(value).unwrap();
        assert_eq!(d.to_string(), "12.3456");
    }
}

// ============================================================================
// Chunked values
// ============================================================================

mod chunked {
    use super::*;

    #[test]
    fn test_large_max_value_round_trips() {
        let big = "ab".repeat(50_000);
        let value = round_trip(&Param::new("p", big.as_str()).with_type(SqlType::NVarChar(None)));
        assert_eq!(value.as_str(), Some(big.as_str()));
    }

    #[test]
    fn test_reader_sees_single_known_chunk() {
        let info = TypeInfo::new(TypeId::BigVarBinary).with_len(0xFFFF);
        let mut wire = Vec::new();
        encode_value(&mut wire, &info, &Value::Bytes(Bytes::from_static(b"xyz")), false).unwrap();

        let mut src = &wire[..];
        let mut reader = PlpReader::new(&mut src).unwrap();
        let chunk = reader.next_chunk().unwrap().unwrap();
        assert_eq!(&chunk.data[..], b"xyz");
        assert!(!chunk.more);
        assert!(reader.next_chunk().unwrap().is_none());

        let mut src = &wire[..];
        assert_eq!(
            decode_column(&info, &mut src).unwrap(),
            Value::Bytes(Bytes::from_static(b"xyz"))
        );
    }
}
