//! Date, time and money wire layouts.
//!
//! | Type | Layout |
//! |------|--------|
//! | `date` | 3-byte day count since 0001-01-01 |
//! | `time(s)` | 3 to 5 bytes of `10^-s` second ticks since midnight |
//! | `datetime2(s)` | time, then date |
//! | `datetimeoffset(s)` | UTC time, UTC date, `i16` offset minutes |
//! | `datetime` | `i32` days since 1900-01-01, `u32` 1/300 s ticks |
//! | `smalldatetime` | `u16` days since 1900-01-01, `u16` minutes |
//! | `money` | `i64` in units of 10^-4, high half first |
//!
//! Day counts are computed directly on 64-bit integers.

use bytes::BufMut;
use chrono::{DateTime, Days, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use tds_wire::registry::time_width;

use crate::error::TypeError;
use crate::numeric::Numeric;

/// Largest fractional-second scale.
pub const MAX_TIME_SCALE: u8 = 7;

const NANOS_PER_SEC: u64 = 1_000_000_000;
const SECS_PER_DAY: u64 = 86_400;
const LEGACY_TICKS_PER_DAY: u64 = 300 * SECS_PER_DAY;

fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap_or(NaiveDate::MIN)
}

fn first_day() -> NaiveDate {
    ymd(1, 1, 1)
}

fn legacy_epoch() -> NaiveDate {
    ymd(1900, 1, 1)
}

fn read_le(bytes: &[u8]) -> u64 {
    let mut word = [0u8; 8];
    let n = bytes.len().min(8);
    word[..n].copy_from_slice(&bytes[..n]);
    u64::from_le_bytes(word)
}

fn check_len(type_name: &'static str, bytes: &[u8], expected: usize) -> Result<(), TypeError> {
    if bytes.len() == expected {
        Ok(())
    } else {
        Err(TypeError::InvalidLength {
            type_name,
            length: bytes.len(),
        })
    }
}

fn check_scale(scale: u8) -> Result<(), TypeError> {
    if scale > MAX_TIME_SCALE {
        return Err(TypeError::InvalidDateTime(format!("scale {scale} above 7")));
    }
    Ok(())
}

fn nanos_of_day(time: NaiveTime) -> u64 {
    // leap-second representations carry nanos above one second
    let nanos = u64::from(time.nanosecond()).min(NANOS_PER_SEC - 1);
    u64::from(time.num_seconds_from_midnight()) * NANOS_PER_SEC + nanos
}

fn time_from_nanos(nanos: u64) -> Result<NaiveTime, TypeError> {
    let secs = u32::try_from(nanos / NANOS_PER_SEC).unwrap_or(u32::MAX);
    let frac = u32::try_from(nanos % NANOS_PER_SEC).unwrap_or(0);
    NaiveTime::from_num_seconds_from_midnight_opt(secs, frac)
        .ok_or_else(|| TypeError::InvalidDateTime(format!("{nanos} ns past midnight")))
}

fn tick_nanos(scale: u8) -> u64 {
    10u64.pow(u32::from(9 - scale.min(MAX_TIME_SCALE)))
}

/// Encode a `date` as 3 bytes.
pub fn encode_date(dst: &mut impl BufMut, date: NaiveDate) -> Result<(), TypeError> {
    let days = date.signed_duration_since(first_day()).num_days();
    let days = u32::try_from(days)
        .ok()
        .filter(|d| *d < 1 << 24)
        .ok_or(TypeError::OutOfRange { target: "date" })?;
    dst.put_uint_le(u64::from(days), 3);
    Ok(())
}

/// Decode 3 `date` bytes.
pub fn decode_date(bytes: &[u8]) -> Result<NaiveDate, TypeError> {
    check_len("date", bytes, 3)?;
    first_day()
        .checked_add_days(Days::new(read_le(bytes)))
        .ok_or_else(|| TypeError::InvalidDateTime("day count past 9999-12-31".into()))
}

/// Encode a `time(scale)` value in [`time_width`] bytes.
pub fn encode_time(dst: &mut impl BufMut, time: NaiveTime, scale: u8) -> Result<(), TypeError> {
    check_scale(scale)?;
    let ticks = nanos_of_day(time) / tick_nanos(scale);
    dst.put_uint_le(ticks, usize::from(time_width(scale)));
    Ok(())
}

/// Decode `time(scale)` bytes.
pub fn decode_time(bytes: &[u8], scale: u8) -> Result<NaiveTime, TypeError> {
    check_scale(scale)?;
    check_len("time", bytes, usize::from(time_width(scale)))?;
    time_from_nanos(read_le(bytes).saturating_mul(tick_nanos(scale)))
}

/// Encode a `datetime2(scale)` value: time bytes then date bytes.
pub fn encode_datetime2(
    dst: &mut impl BufMut,
    value: NaiveDateTime,
    scale: u8,
) -> Result<(), TypeError> {
    encode_time(dst, value.time(), scale)?;
    encode_date(dst, value.date())
}

/// Decode `datetime2(scale)` bytes.
pub fn decode_datetime2(bytes: &[u8], scale: u8) -> Result<NaiveDateTime, TypeError> {
    check_scale(scale)?;
    let tw = usize::from(time_width(scale));
    check_len("datetime2", bytes, tw + 3)?;
    let time = decode_time(&bytes[..tw], scale)?;
    let date = decode_date(&bytes[tw..])?;
    Ok(date.and_time(time))
}

/// Encode a `datetimeoffset(scale)`: UTC date and time plus offset minutes.
pub fn encode_datetimeoffset(
    dst: &mut impl BufMut,
    value: DateTime<FixedOffset>,
    scale: u8,
) -> Result<(), TypeError> {
    encode_datetime2(dst, value.naive_utc(), scale)?;
    let minutes = value.offset().local_minus_utc() / 60;
    let minutes = i16::try_from(minutes).map_err(|_| TypeError::OutOfRange {
        target: "datetimeoffset",
    })?;
    dst.put_i16_le(minutes);
    Ok(())
}

/// Decode `datetimeoffset(scale)` bytes.
pub fn decode_datetimeoffset(bytes: &[u8], scale: u8) -> Result<DateTime<FixedOffset>, TypeError> {
    check_scale(scale)?;
    let body = usize::from(time_width(scale)) + 3;
    check_len("datetimeoffset", bytes, body + 2)?;
    let utc = decode_datetime2(&bytes[..body], scale)?;
    let minutes = i16::from_le_bytes([bytes[body], bytes[body + 1]]);
    let offset = FixedOffset::east_opt(i32::from(minutes) * 60)
        .ok_or_else(|| TypeError::InvalidDateTime(format!("offset {minutes} minutes")))?;
    Ok(DateTime::from_naive_utc_and_offset(utc, offset))
}

/// Encode a legacy 8-byte `datetime`. Dates before 1753-01-01 are rejected.
pub fn encode_datetime(dst: &mut impl BufMut, value: NaiveDateTime) -> Result<(), TypeError> {
    if value.date() < ymd(1753, 1, 1) {
        return Err(TypeError::OutOfRange { target: "datetime" });
    }
    let mut days = value.date().signed_duration_since(legacy_epoch()).num_days();
    let nanos = nanos_of_day(value.time());
    let mut ticks = (nanos * 6 + 10_000_000) / 20_000_000;
    if ticks >= LEGACY_TICKS_PER_DAY {
        days += 1;
        ticks -= LEGACY_TICKS_PER_DAY;
    }
    let days = i32::try_from(days).map_err(|_| TypeError::OutOfRange { target: "datetime" })?;
    dst.put_i32_le(days);
    dst.put_u32_le(u32::try_from(ticks).unwrap_or(0));
    Ok(())
}

/// Decode a legacy 8-byte `datetime`.
pub fn decode_datetime(bytes: &[u8]) -> Result<NaiveDateTime, TypeError> {
    check_len("datetime", bytes, 8)?;
    let days = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let ticks = u64::from(u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]));
    if ticks >= LEGACY_TICKS_PER_DAY {
        return Err(TypeError::InvalidDateTime(format!("{ticks} ticks in a day")));
    }
    let date = offset_days(legacy_epoch(), i64::from(days))?;
    let nanos = (ticks * 20_000_000 + 3) / 6;
    Ok(date.and_time(time_from_nanos(nanos)?))
}

/// Encode a 4-byte `smalldatetime`, rounding to the nearest minute.
pub fn encode_smalldatetime(dst: &mut impl BufMut, value: NaiveDateTime) -> Result<(), TypeError> {
    let mut days = value.date().signed_duration_since(legacy_epoch()).num_days();
    let mut minutes = (u64::from(value.time().num_seconds_from_midnight()) + 30) / 60;
    if minutes >= 1440 {
        days += 1;
        minutes -= 1440;
    }
    let days = u16::try_from(days).map_err(|_| TypeError::OutOfRange {
        target: "smalldatetime",
    })?;
    dst.put_u16_le(days);
    dst.put_u16_le(u16::try_from(minutes).unwrap_or(0));
    Ok(())
}

/// Decode a 4-byte `smalldatetime`.
pub fn decode_smalldatetime(bytes: &[u8]) -> Result<NaiveDateTime, TypeError> {
    check_len("smalldatetime", bytes, 4)?;
    let days = u16::from_le_bytes([bytes[0], bytes[1]]);
    let minutes = u16::from_le_bytes([bytes[2], bytes[3]]);
    let date = offset_days(legacy_epoch(), i64::from(days))?;
    Ok(date.and_time(time_from_nanos(u64::from(minutes) * 60 * NANOS_PER_SEC)?))
}

fn offset_days(base: NaiveDate, days: i64) -> Result<NaiveDate, TypeError> {
    let shifted = if days >= 0 {
        base.checked_add_days(Days::new(days.unsigned_abs()))
    } else {
        base.checked_sub_days(Days::new(days.unsigned_abs()))
    };
    shifted.ok_or_else(|| TypeError::InvalidDateTime(format!("{days} days from {base}")))
}

/// Encode `money` (8 bytes) or `smallmoney` (4 bytes).
pub fn encode_money(dst: &mut impl BufMut, value: &Numeric, width: u8) -> Result<(), TypeError> {
    let units = value.rescale(4)?.mantissa();
    if width == 4 {
        let v = i32::try_from(units).map_err(|_| TypeError::OutOfRange { target: "smallmoney" })?;
        dst.put_i32_le(v);
    } else {
        let v = i64::try_from(units).map_err(|_| TypeError::OutOfRange { target: "money" })?;
        #[allow(clippy::cast_possible_truncation)]
        {
            dst.put_i32_le((v >> 32) as i32);
            dst.put_u32_le(v as u32);
        }
    }
    Ok(())
}

/// Decode `money` or `smallmoney` bytes into a scale-4 [`Numeric`].
pub fn decode_money(bytes: &[u8]) -> Result<Numeric, TypeError> {
    let units = match bytes.len() {
        4 => i64::from(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
        8 => {
            let high = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            let low = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
            (i64::from(high) << 32) | i64::from(low)
        }
        n => {
            return Err(TypeError::InvalidLength {
                type_name: "money",
                length: n,
            });
        }
    };
    Numeric::new(i128::from(units), 4)
}
