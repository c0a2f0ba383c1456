//! Exact decimal values.
//!
//! [`Numeric`] holds a signed mantissa and a scale, the value being
//! `mantissa / 10^scale`. The mantissa is limited to 38 decimal digits,
//! the widest `decimal` SQL Server stores. On the wire a decimal is a sign
//! byte (1 positive, 0 negative) followed by the magnitude as a
//! little-endian integer padded to 4, 8, 12 or 16 bytes.

use std::fmt;
use std::str::FromStr;

use bytes::BufMut;
use rust_decimal::Decimal;

use crate::error::TypeError;

/// Largest precision and scale of a SQL `decimal`.
pub const MAX_PRECISION: u8 = 38;

const fn pow10_table() -> [i128; 39] {
    let mut table = [1i128; 39];
    let mut i = 1;
    while i < table.len() {
        table[i] = table[i - 1] * 10;
        i += 1;
    }
    table
}

static POW10: [i128; 39] = pow10_table();

/// `10^n` for `n <= 38`.
#[must_use]
pub fn pow10(n: u8) -> i128 {
    POW10[usize::from(n.min(MAX_PRECISION))]
}

fn digits(mut m: i128) -> u8 {
    m = m.abs();
    let mut n = 1;
    while n < MAX_PRECISION && m >= POW10[usize::from(n)] {
        n += 1;
    }
    n
}

/// An exact decimal number with up to 38 digits.
#[derive(Debug, Clone, Copy, Default)]
pub struct Numeric {
    mantissa: i128,
    scale: u8,
}

impl Numeric {
    /// Build from a mantissa and scale.
    pub fn new(mantissa: i128, scale: u8) -> Result<Self, TypeError> {
        if scale > MAX_PRECISION {
            return Err(TypeError::InvalidDecimal(format!("scale {scale} above 38")));
        }
        if mantissa.unsigned_abs() >= POW10[38].unsigned_abs() {
            return Err(TypeError::OutOfRange { target: "decimal" });
        }
        Ok(Self { mantissa, scale })
    }

    /// Integer value with scale zero.
    #[must_use]
    pub const fn from_i64(value: i64) -> Self {
        Self {
            mantissa: value as i128,
            scale: 0,
        }
    }

    /// Unscaled digits.
    #[must_use]
    pub const fn mantissa(&self) -> i128 {
        self.mantissa
    }

    /// Digits after the decimal point.
    #[must_use]
    pub const fn scale(&self) -> u8 {
        self.scale
    }

    /// Smallest precision able to hold this value at its scale.
    #[must_use]
    pub fn precision(&self) -> u8 {
        digits(self.mantissa).max(self.scale).max(1)
    }

    /// Whether the value is below zero.
    #[must_use]
    pub const fn is_negative(&self) -> bool {
        self.mantissa < 0
    }

    /// Convert to `scale` digits after the point.
    ///
    /// Dropped digits round half away from zero. Fails when the result
    /// would need more than 38 digits.
    pub fn rescale(&self, scale: u8) -> Result<Self, TypeError> {
        if scale > MAX_PRECISION {
            return Err(TypeError::InvalidDecimal(format!("scale {scale} above 38")));
        }
        if scale >= self.scale {
            let mantissa = self
                .mantissa
                .checked_mul(pow10(scale - self.scale))
                .ok_or(TypeError::OutOfRange { target: "decimal" })?;
            return Self::new(mantissa, scale);
        }
        let divisor = pow10(self.scale - scale);
        let quotient = self.mantissa / divisor;
        let rest = (self.mantissa % divisor).abs();
        let mantissa = if rest >= divisor - rest {
            quotient + self.mantissa.signum()
        } else {
            quotient
        };
        Self::new(mantissa, scale)
    }

    /// Same value with trailing fractional zeros removed.
    #[must_use]
    pub fn normalize(&self) -> Self {
        let mut out = *self;
        while out.scale > 0 && out.mantissa % 10 == 0 {
            out.mantissa /= 10;
            out.scale -= 1;
        }
        out
    }

    /// The integer value, if there is no fractional part.
    #[must_use]
    pub fn to_i128(&self) -> Option<i128> {
        let n = self.normalize();
        (n.scale == 0).then_some(n.mantissa)
    }

    /// Nearest `f64`. Values beyond 15 to 17 significant digits lose precision.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn to_f64(&self) -> f64 {
        self.mantissa as f64 / 10f64.powi(i32::from(self.scale))
    }

    /// Round a float to `scale` digits.
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_f64(value: f64, scale: u8) -> Result<Self, TypeError> {
        if !value.is_finite() {
            return Err(TypeError::InvalidDecimal(value.to_string()));
        }
        let scaled = (value * 10f64.powi(i32::from(scale.min(MAX_PRECISION)))).round();
        if scaled.abs() >= 1e38 {
            return Err(TypeError::OutOfRange { target: "decimal" });
        }
        Self::new(scaled as i128, scale)
    }

    /// Convert to a `rust_decimal::Decimal`, rounding scales above 28.
    pub fn to_decimal(&self) -> Result<Decimal, TypeError> {
        let fitted = if self.scale > 28 {
            self.rescale(28)?
        } else {
            *self
        };
        Decimal::try_from_i128_with_scale(fitted.mantissa, u32::from(fitted.scale))
            .map_err(|_| TypeError::OutOfRange { target: "rust_decimal::Decimal" })
    }

    /// Build from wire parts: sign byte and little-endian magnitude.
    pub fn from_wire(positive: bool, magnitude: &[u8], scale: u8) -> Result<Self, TypeError> {
        if magnitude.len() > 16 {
            return Err(TypeError::InvalidLength {
                type_name: "decimal",
                length: magnitude.len() + 1,
            });
        }
        let mut raw = [0u8; 16];
        raw[..magnitude.len()].copy_from_slice(magnitude);
        let abs = i128::try_from(u128::from_le_bytes(raw))
            .map_err(|_| TypeError::OutOfRange { target: "decimal" })?;
        Self::new(if positive { abs } else { -abs }, scale)
    }

    /// Write the sign byte and `width - 1` magnitude bytes.
    pub fn write_wire(&self, dst: &mut impl BufMut, width: u8) {
        dst.put_u8(u8::from(self.mantissa >= 0));
        let magnitude = self.mantissa.unsigned_abs().to_le_bytes();
        let n = usize::from(width.saturating_sub(1)).min(magnitude.len());
        dst.put_slice(&magnitude[..n]);
    }
}

impl PartialEq for Numeric {
    fn eq(&self, other: &Self) -> bool {
        let (a, b) = (self.normalize(), other.normalize());
        a.mantissa == b.mantissa && a.scale == b.scale
    }
}

impl Eq for Numeric {}

impl fmt::Display for Numeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let abs = self.mantissa.unsigned_abs();
        let sign = if self.mantissa < 0 { "-" } else { "" };
        if self.scale == 0 {
            return write!(f, "{sign}{abs}");
        }
        let div = pow10(self.scale).unsigned_abs();
        write!(
            f,
            "{sign}{}.{:0width$}",
            abs / div,
            abs % div,
            width = usize::from(self.scale)
        )
    }
}

impl FromStr for Numeric {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || TypeError::InvalidDecimal(s.to_owned());
        let t = s.trim();
        let (negative, body) = match t.as_bytes().first() {
            Some(b'-') => (true, &t[1..]),
            Some(b'+') => (false, &t[1..]),
            _ => (false, t),
        };
        let (int, frac) = body.split_once('.').unwrap_or((body, ""));
        if int.is_empty() && frac.is_empty() {
            return Err(bad());
        }
        if !int.bytes().chain(frac.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(bad());
        }
        let scale = u8::try_from(frac.len()).map_err(|_| bad())?;
        let mut mantissa: i128 = 0;
        for b in int.bytes().chain(frac.bytes()) {
            mantissa = mantissa
                .checked_mul(10)
                .and_then(|m| m.checked_add(i128::from(b - b'0')))
                .ok_or(TypeError::OutOfRange { target: "decimal" })?;
        }
        Self::new(if negative { -mantissa } else { mantissa }, scale)
    }
}

impl From<i64> for Numeric {
    fn from(value: i64) -> Self {
        Self::from_i64(value)
    }
}

impl From<i32> for Numeric {
    fn from(value: i32) -> Self {
        Self::from_i64(i64::from(value))
    }
}

impl From<Decimal> for Numeric {
    fn from(value: Decimal) -> Self {
        // rust_decimal carries at most 28 digits and scale 28
        Self {
            mantissa: value.mantissa(),
            scale: u8::try_from(value.scale()).unwrap_or(28),
        }
    }
}

impl TryFrom<Numeric> for Decimal {
    type Error = TypeError;

    fn try_from(value: Numeric) -> Result<Self, Self::Error> {
        value.to_decimal()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_rescale_rounds_half_away_from_zero() {
        let v = Numeric::new(35_840_000_000_000_003, 15).unwrap();
        assert_eq!(v.rescale(2).unwrap().to_string(), "35.84");

        assert_eq!(Numeric::new(125, 2).unwrap().rescale(1).unwrap().mantissa(), 13);
        assert_eq!(Numeric::new(-125, 2).unwrap().rescale(1).unwrap().mantissa(), -13);
        assert_eq!(Numeric::new(124, 2).unwrap().rescale(1).unwrap().mantissa(), 12);
        assert_eq!(Numeric::new(1234, 2).unwrap().rescale(4).unwrap().mantissa(), 123_400);
    }

    #[test]
    fn test_display() {
        assert_eq!(Numeric::new(1234, 2).unwrap().to_string(), "12.34");
        assert_eq!(Numeric::new(-5, 3).unwrap().to_string(), "-0.005");
        assert_eq!(Numeric::new(42, 0).unwrap().to_string(), "42");
    }

    #[test]
    fn test_parse() {
        let v: Numeric = "-0012.500".parse().unwrap();
        assert_eq!(v.mantissa(), -12_500);
        assert_eq!(v.scale(), 3);
        assert!("1.2.3".parse::<Numeric>().is_err());
        assert!("".parse::<Numeric>().is_err());
        assert!("12a".parse::<Numeric>().is_err());
    }

    #[test]
    fn test_equality_ignores_trailing_zeros() {
        assert_eq!(Numeric::new(1234, 2).unwrap(), Numeric::new(123_400, 4).unwrap());
        assert_ne!(Numeric::new(1234, 2).unwrap(), Numeric::new(1234, 3).unwrap());
    }

    #[test]
    fn test_limits() {
        assert!(Numeric::new(pow10(38), 0).is_err());
        assert!(Numeric::new(pow10(38) - 1, 0).is_ok());
        assert!(Numeric::new(1, 39).is_err());
        assert!(Numeric::new(pow10(37), 0).unwrap().rescale(1).is_err());
        assert_eq!(Numeric::new(pow10(38) - 1, 38).unwrap().precision(), 38);
    }

    #[test]
    fn test_wire_magnitude() {
        let v = Numeric::new(-123_400, 4).unwrap();
        let mut out = Vec::new();
        v.write_wire(&mut out, 17);
        assert_eq!(out.len(), 17);
        assert_eq!(out[0], 0);
        assert_eq!(&out[1..4], &[0x08, 0xE2, 0x01]);
        assert_eq!(Numeric::from_wire(false, &out[1..], 4).unwrap(), v);
    }

    #[test]
    fn test_rust_decimal_bridge() {
        let d = Decimal::new(-31_415, 4);
        let n = Numeric::from(d);
        assert_eq!(n.to_string(), "-3.1415");
        assert_eq!(Decimal::try_from(n).unwrap(), d);

        let wide = Numeric::new(1, 38).unwrap();
        assert_eq!(wide.to_decimal().unwrap(), Decimal::ZERO);
    }

    proptest! {
        #[test]
        fn numeric_text_round_trip(m in -(10i128.pow(30))..10i128.pow(30), scale in 0u8..=30) {
            let v = Numeric::new(m, scale).unwrap();
            let back: Numeric = v.to_string().parse().unwrap();
            prop_assert_eq!(back, v);
        }

        #[test]
        fn numeric_wire_round_trip(m in any::<i64>(), scale in 0u8..=18) {
            let v = Numeric::new(i128::from(m), scale).unwrap();
            let mut out = Vec::new();
            v.write_wire(&mut out, 17);
            let back = Numeric::from_wire(out[0] == 1, &out[1..], scale).unwrap();
            prop_assert_eq!(back, v);
        }
    }
}
