//! Protocol and server version numbers.

use core::fmt;

use bytes::Buf;

use crate::error::ProtocolError;

/// TDS protocol version as sent in LOGIN7 and echoed in LOGINACK.
///
/// The raw value is the big-endian reading of the version field, so the
/// LOGIN7 encoder writes it little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TdsVersion(u32);

impl TdsVersion {
    /// TDS 7.2 (SQL Server 2005).
    pub const V7_2: Self = Self(0x7209_0002);

    /// TDS 7.3A (SQL Server 2008).
    pub const V7_3A: Self = Self(0x730A_0003);

    /// TDS 7.3B (SQL Server 2008 R2).
    pub const V7_3B: Self = Self(0x730B_0003);

    /// TDS 7.4 (SQL Server 2012+).
    pub const V7_4: Self = Self(0x7400_0004);

    /// TDS 8.0 (strict encryption).
    pub const V8_0: Self = Self(0x0800_0000);

    /// Wrap a raw version value.
    #[must_use]
    pub const fn new(version: u32) -> Self {
        Self(version)
    }

    /// Raw version value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Whether this is the TDS 8.0 strict-encryption version.
    #[must_use]
    pub const fn is_tds_8(self) -> bool {
        self.0 == Self::V8_0.0
    }

    /// Whether DATE, TIME, DATETIME2 and DATETIMEOFFSET are available.
    #[must_use]
    pub const fn supports_date_time_types(self) -> bool {
        self.is_tds_8() || self.0 >= Self::V7_3A.0
    }

    /// Lower of two versions, ranking 8.0 above every 7.x.
    #[must_use]
    pub const fn min(self, other: Self) -> Self {
        if self.is_tds_8() && !other.is_tds_8() {
            other
        } else if !self.is_tds_8() && other.is_tds_8() {
            self
        } else if self.0 <= other.0 {
            self
        } else {
            other
        }
    }
}

impl Default for TdsVersion {
    fn default() -> Self {
        Self::V7_4
    }
}

impl fmt::Display for TdsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            0x7209_0002 => f.write_str("TDS 7.2"),
            0x730A_0003 => f.write_str("TDS 7.3A"),
            0x730B_0003 => f.write_str("TDS 7.3B"),
            0x7400_0004 => f.write_str("TDS 7.4"),
            0x0800_0000 => f.write_str("TDS 8.0"),
            other => write!(f, "TDS 0x{other:08X}"),
        }
    }
}

impl From<u32> for TdsVersion {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Product version of a client library or server.
///
/// Travels as `major, minor, build(u16 BE)` plus a little-endian sub-build
/// in PRELOGIN, and as `major, minor, build_hi, build_lo` in LOGINACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ServerVersion {
    /// Major version (16 = SQL Server 2022).
    pub major: u8,
    /// Minor version.
    pub minor: u8,
    /// Build number.
    pub build: u16,
    /// Sub-build number, PRELOGIN only.
    pub sub_build: u16,
}

impl ServerVersion {
    /// Create a version with zero sub-build.
    #[must_use]
    pub const fn new(major: u8, minor: u8, build: u16) -> Self {
        Self {
            major,
            minor,
            build,
            sub_build: 0,
        }
    }

    /// Decode the six-byte PRELOGIN VERSION payload.
    pub fn decode_prelogin(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        if src.remaining() < 6 {
            return Err(ProtocolError::IncompletePacket {
                expected: 6,
                actual: src.remaining(),
            });
        }
        Ok(Self {
            major: src.get_u8(),
            minor: src.get_u8(),
            build: src.get_u16(),
            sub_build: src.get_u16_le(),
        })
    }

    /// The six-byte PRELOGIN VERSION payload.
    #[must_use]
    pub fn prelogin_bytes(&self) -> [u8; 6] {
        let [b0, b1] = self.build.to_be_bytes();
        let [s0, s1] = self.sub_build.to_le_bytes();
        [self.major, self.minor, b0, b1, s0, s1]
    }

    /// Product name for well-known major versions.
    #[must_use]
    pub const fn product_name(&self) -> &'static str {
        match self.major {
            9 => "SQL Server 2005",
            10 => "SQL Server 2008",
            11 => "SQL Server 2012",
            12 => "SQL Server 2014",
            13 => "SQL Server 2016",
            14 => "SQL Server 2017",
            15 => "SQL Server 2019",
            16 => "SQL Server 2022",
            _ => "SQL Server",
        }
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.build)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_version_ordering() {
        assert!(TdsVersion::V7_4 > TdsVersion::V7_3B);
        assert!(TdsVersion::V7_3B > TdsVersion::V7_3A);
        assert!(TdsVersion::V7_3A > TdsVersion::V7_2);
    }

    #[test]
    fn test_min_ranks_tds8_highest() {
        assert_eq!(TdsVersion::V7_4.min(TdsVersion::V7_3A), TdsVersion::V7_3A);
        assert_eq!(TdsVersion::V8_0.min(TdsVersion::V7_4), TdsVersion::V7_4);
        assert_eq!(TdsVersion::V7_4.min(TdsVersion::V8_0), TdsVersion::V7_4);
    }

    #[test]
    fn test_date_time_support() {
        assert!(TdsVersion::V7_3A.supports_date_time_types());
        assert!(TdsVersion::V8_0.supports_date_time_types());
        assert!(!TdsVersion::V7_2.supports_date_time_types());
    }

    #[test]
    fn test_display() {
        assert_eq!(TdsVersion::V7_3B.to_string(), "TDS 7.3B");
        assert_eq!(TdsVersion::new(0x1234_5678).to_string(), "TDS 0x12345678");
    }

    #[test]
    fn test_server_version_prelogin_bytes() {
        let v = ServerVersion {
            major: 16,
            minor: 0,
            build: 1000,
            sub_build: 6,
        };
        let bytes = v.prelogin_bytes();
        assert_eq!(bytes, [16, 0, 0x03, 0xE8, 6, 0]);
        assert_eq!(ServerVersion::decode_prelogin(&mut bytes.as_ref()).unwrap(), v);
        assert_eq!(v.product_name(), "SQL Server 2022");
        assert_eq!(v.to_string(), "16.0.1000");
    }
}
