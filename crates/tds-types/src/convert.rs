//! Conversions from decoded values into Rust types.
//!
//! [`FromValue`] is implemented for the scalar types a caller scans into.
//! NULL converts only into `Option<T>` (as `None`) or into [`Value`]; every
//! other target rejects it with [`TypeError::UnexpectedNull`].
//!
//! The borrowed coercion helpers are shared with the parameter encoder so
//! a value sent as a declared type follows the same rules as a value
//! scanned into a Rust type.

use std::borrow::Cow;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::TypeError;
use crate::numeric::Numeric;
use crate::value::{Value, XmlData};

/// Conversion from a decoded [`Value`].
pub trait FromValue: Sized {
    /// Convert, consuming the value.
    fn from_value(value: Value) -> Result<Self, TypeError>;
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        Ok(value)
    }
}

fn non_null(value: &Value) -> Result<(), TypeError> {
    if value.is_null() {
        Err(TypeError::UnexpectedNull)
    } else {
        Ok(())
    }
}

/// Exact integer of any integer-like value. Decimals convert only when
/// they have no fractional part.
pub(crate) fn integer(value: &Value) -> Option<i128> {
    match value {
        Value::Bool(v) => Some(i128::from(*v)),
        Value::U8(v) => Some(i128::from(*v)),
        Value::I16(v) => Some(i128::from(*v)),
        Value::I32(v) => Some(i128::from(*v)),
        Value::I64(v) => Some(i128::from(*v)),
        Value::Numeric(n) => n.to_i128(),
        _ => None,
    }
}

/// Integer narrowed to `T`, or a range error naming `target`.
pub(crate) fn integer_as<T: TryFrom<i128>>(
    value: &Value,
    target: &'static str,
) -> Result<T, TypeError> {
    non_null(value)?;
    let wide = integer(value).ok_or(TypeError::unsupported(value.type_name(), target))?;
    T::try_from(wide).map_err(|_| TypeError::OutOfRange { target })
}

/// Floating value. Decimal to float is lossy past 15 significant digits.
pub(crate) fn float(value: &Value) -> Result<f64, TypeError> {
    non_null(value)?;
    value
        .as_f64()
        .ok_or(TypeError::unsupported(value.type_name(), "f64"))
}

/// Exact decimal of a numeric or numeric-looking value.
pub(crate) fn numeric(value: &Value) -> Result<Numeric, TypeError> {
    non_null(value)?;
    match value {
        Value::Numeric(n) => Ok(*n),
        Value::F32(v) => v.to_string().parse(),
        Value::F64(v) => v.to_string().parse(),
        Value::String(s) => s.trim().parse(),
        other => integer(other)
            .ok_or(TypeError::unsupported(other.type_name(), "decimal"))
            .and_then(|v| Numeric::new(v, 0)),
    }
}

/// Text of a value. Scalars are formatted; bytes are rejected.
pub(crate) fn text(value: &Value) -> Result<Cow<'_, str>, TypeError> {
    non_null(value)?;
    match value {
        Value::String(s) => Ok(Cow::Borrowed(s)),
        Value::Xml(x) => x.to_text().map(Cow::Owned),
        Value::Bytes(_) => Err(TypeError::unsupported("bytes", "string")),
        Value::Guid(g) => Ok(Cow::Owned(g.hyphenated().to_string())),
        other => Ok(Cow::Owned(other.to_string())),
    }
}

/// Raw bytes of a binary or string value.
pub(crate) fn bytes(value: &Value) -> Result<&[u8], TypeError> {
    non_null(value)?;
    match value {
        Value::Bytes(b) => Ok(b),
        Value::String(s) => Ok(s.as_bytes()),
        other => Err(TypeError::unsupported(other.type_name(), "bytes")),
    }
}

/// GUID of a GUID or its text form.
pub(crate) fn guid(value: &Value) -> Result<Uuid, TypeError> {
    non_null(value)?;
    match value {
        Value::Guid(g) => Ok(*g),
        Value::String(s) => {
            Uuid::parse_str(s.trim()).map_err(|_| TypeError::unsupported("string", "uuid"))
        }
        other => Err(TypeError::unsupported(other.type_name(), "uuid")),
    }
}

/// Calendar date of any value with a date part.
pub(crate) fn date(value: &Value) -> Result<NaiveDate, TypeError> {
    non_null(value)?;
    match value {
        Value::Date(d) => Ok(*d),
        Value::DateTime(dt) => Ok(dt.date()),
        Value::DateTimeOffset(dt) => Ok(dt.date_naive()),
        other => Err(TypeError::unsupported(other.type_name(), "date")),
    }
}

/// Time of day of any value with a time part.
pub(crate) fn time(value: &Value) -> Result<NaiveTime, TypeError> {
    non_null(value)?;
    match value {
        Value::Time(t) => Ok(*t),
        Value::DateTime(dt) => Ok(dt.time()),
        Value::DateTimeOffset(dt) => Ok(dt.time()),
        other => Err(TypeError::unsupported(other.type_name(), "time")),
    }
}

/// Local date and time. A date alone is taken at midnight; an offset
/// value keeps its local wall-clock time.
pub(crate) fn datetime(value: &Value) -> Result<NaiveDateTime, TypeError> {
    non_null(value)?;
    match value {
        Value::DateTime(dt) => Ok(*dt),
        Value::Date(d) => Ok(d.and_time(NaiveTime::MIN)),
        Value::DateTimeOffset(dt) => Ok(dt.naive_local()),
        other => Err(TypeError::unsupported(other.type_name(), "datetime")),
    }
}

/// Date and time with offset. Values without an offset are taken as UTC.
pub(crate) fn datetime_offset(value: &Value) -> Result<DateTime<FixedOffset>, TypeError> {
    match value {
        Value::DateTimeOffset(dt) => Ok(*dt),
        other => Ok(datetime(other)?.and_utc().fixed_offset()),
    }
}

macro_rules! from_value_int {
    ($($ty:ty),* $(,)?) => {
        $(
            impl FromValue for $ty {
                fn from_value(value: Value) -> Result<Self, TypeError> {
                    integer_as(&value, stringify!($ty))
                }
            }
        )*
    };
}

from_value_int!(i8, u8, i16, i32, i64, u16, u32, u64, i128);

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        non_null(&value)?;
        match value {
            Value::Bool(v) => Ok(v),
            other => integer(&other)
                .map(|v| v != 0)
                .ok_or(TypeError::unsupported(other.type_name(), "bool")),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        float(&value)
    }
}

impl FromValue for f32 {
    #[allow(clippy::cast_possible_truncation)]
    fn from_value(value: Value) -> Result<Self, TypeError> {
        match value {
            Value::F32(v) => Ok(v),
            other => float(&other).map(|v| v as f32),
        }
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        match value {
            Value::String(s) => Ok(s),
            other => text(&other).map(Cow::into_owned),
        }
    }
}

impl FromValue for Bytes {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        match value {
            Value::Bytes(b) => Ok(b),
            Value::String(s) => Ok(Bytes::from(s.into_bytes())),
            other => {
                non_null(&other)?;
                Err(TypeError::unsupported(other.type_name(), "bytes"))
            }
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        Bytes::from_value(value).map(Vec::from)
    }
}

impl FromValue for Numeric {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        numeric(&value)
    }
}

impl FromValue for Decimal {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        numeric(&value)?.to_decimal()
    }
}

impl FromValue for Uuid {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        guid(&value)
    }
}

impl FromValue for NaiveDate {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        date(&value)
    }
}

impl FromValue for NaiveTime {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        time(&value)
    }
}

impl FromValue for NaiveDateTime {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        datetime(&value)
    }
}

impl FromValue for DateTime<FixedOffset> {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        non_null(&value)?;
        datetime_offset(&value)
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        non_null(&value)?;
        datetime_offset(&value).map(|dt| dt.with_timezone(&Utc))
    }
}

/// Time of day as the duration since midnight.
impl FromValue for Duration {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        let since_midnight = time(&value)? - NaiveTime::MIN;
        since_midnight
            .to_std()
            .map_err(|_| TypeError::OutOfRange { target: "Duration" })
    }
}

impl FromValue for XmlData {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        match value {
            Value::Xml(x) => Ok(x),
            Value::String(s) => Ok(Self::from_text(s)),
            other => {
                non_null(&other)?;
                Err(TypeError::unsupported(other.type_name(), "xml"))
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_null_only_into_option() {
        assert_eq!(Option::<i32>::from_value(Value::Null).unwrap(), None);
        assert_eq!(i32::from_value(Value::Null), Err(TypeError::UnexpectedNull));
        assert_eq!(String::from_value(Value::Null), Err(TypeError::UnexpectedNull));
        assert_eq!(Value::from_value(Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn test_integer_widening_and_narrowing() {
        assert_eq!(i64::from_value(Value::U8(200)).unwrap(), 200);
        assert_eq!(u8::from_value(Value::I32(255)).unwrap(), 255);
        assert_eq!(
            u8::from_value(Value::I32(256)),
            Err(TypeError::OutOfRange { target: "u8" })
        );
        assert_eq!(
            u32::from_value(Value::I16(-1)),
            Err(TypeError::OutOfRange { target: "u32" })
        );
        assert_eq!(i32::from_value(Value::Bool(true)).unwrap(), 1);
        assert!(i32::from_value(Value::String("1".into())).is_err());

        assert_eq!(i8::from_value(Value::I16(-128)).unwrap(), -128);
        assert_eq!(i8::from_value(Value::U8(127)).unwrap(), 127);
        assert_eq!(
            i8::from_value(Value::U8(200)),
            Err(TypeError::OutOfRange { target: "i8" })
        );
        assert_eq!(Option::<i8>::from_value(Value::Null).unwrap(), None);
    }

    #[test]
    fn test_decimal_to_integer_requires_whole_number() {
        let whole = Value::Numeric(Numeric::new(4200, 2).unwrap());
        assert_eq!(i32::from_value(whole).unwrap(), 42);
        let fraction = Value::Numeric(Numeric::new(4250, 2).unwrap());
        assert!(i32::from_value(fraction).is_err());
    }

    #[test]
    fn test_to_string_formats_scalars() {
        assert_eq!(String::from_value(Value::I32(-5)).unwrap(), "-5");
        assert_eq!(
            String::from_value(Value::Numeric(Numeric::new(3584, 2).unwrap())).unwrap(),
            "35.84"
        );
        assert!(String::from_value(Value::Bytes(Bytes::from_static(b"x"))).is_err());
    }

    #[test]
    fn test_decimal_targets() {
        let v = Value::Numeric(Numeric::new(-12345, 3).unwrap());
        assert_eq!(Decimal::from_value(v.clone()).unwrap().to_string(), "-12.345");
        assert!((f64::from_value(v).unwrap() + 12.345).abs() < 1e-9);
        assert_eq!(
            Numeric::from_value(Value::I64(7)).unwrap(),
            Numeric::new(7, 0).unwrap()
        );
    }

    #[test]
    fn test_temporal_targets() {
        let dt = NaiveDate::from_ymd_opt(2020, 2, 29)
            .unwrap()
            .and_hms_opt(13, 14, 15)
            .unwrap();
        assert_eq!(
            NaiveDate::from_value(Value::DateTime(dt)).unwrap(),
            dt.date()
        );
        assert_eq!(
            Duration::from_value(Value::Time(dt.time())).unwrap(),
            Duration::from_secs(13 * 3600 + 14 * 60 + 15)
        );
        let utc = DateTime::<Utc>::from_value(Value::DateTime(dt)).unwrap();
        assert_eq!(utc.naive_utc(), dt);

        let offset = FixedOffset::east_opt(3600).unwrap();
        let local = dt.and_local_timezone(offset).unwrap();
        assert_eq!(
            NaiveDateTime::from_value(Value::DateTimeOffset(local)).unwrap(),
            dt
        );
    }

    #[test]
    fn test_guid_from_text() {
        let g = Uuid::from_value(Value::String(
            "00112233-4455-6677-8899-aabbccddeeff".into(),
        ))
        .unwrap();
        assert_eq!(g.as_bytes()[0], 0x00);
        assert_eq!(g.as_bytes()[15], 0xFF);
    }
}
