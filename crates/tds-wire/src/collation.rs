//! Collations and their single-byte/multi-byte code pages.
//!
//! `varchar`, `char` and `text` values travel in the code page of their
//! column collation. The five collation bytes are a little-endian `u32`
//! (LCID in the low 20 bits, comparison flags and version above) followed
//! by a sort id. SQL Server 2019 UTF-8 collations set bit 27.

use bytes::{Buf, BufMut};
use encoding_rs::Encoding;

use crate::error::ProtocolError;

/// Bit marking a UTF-8 collation.
pub const COLLATION_FLAG_UTF8: u32 = 0x0800_0000;

/// Mask for the LCID part of the collation info word.
pub const LCID_MASK: u32 = 0x000F_FFFF;

/// Size of a collation on the wire.
pub const COLLATION_SIZE: usize = 5;

/// A SQL collation as carried in TYPE_INFO and ENVCHANGE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Collation {
    /// LCID plus comparison flags and version.
    pub info: u32,
    /// SQL sort id, zero for Windows collations.
    pub sort_id: u8,
}

impl Default for Collation {
    /// `SQL_Latin1_General_CP1_CI_AS`.
    fn default() -> Self {
        Self {
            info: 0x00D0_0409,
            sort_id: 0x34,
        }
    }
}

impl Collation {
    /// Decode five collation bytes.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        if src.remaining() < COLLATION_SIZE {
            return Err(ProtocolError::IncompletePacket {
                expected: COLLATION_SIZE,
                actual: src.remaining(),
            });
        }
        Ok(Self {
            info: src.get_u32_le(),
            sort_id: src.get_u8(),
        })
    }

    /// Encode five collation bytes.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u32_le(self.info);
        dst.put_u8(self.sort_id);
    }

    /// Locale identifier.
    #[must_use]
    pub const fn lcid(&self) -> u32 {
        self.info & LCID_MASK
    }

    /// Whether the collation stores UTF-8.
    #[must_use]
    pub const fn is_utf8(&self) -> bool {
        self.info & COLLATION_FLAG_UTF8 != 0
    }

    /// Windows code page used by this collation.
    #[must_use]
    pub fn code_page(&self) -> u16 {
        if self.is_utf8() {
            return 65001;
        }
        code_page_for_lcid(self.lcid())
    }

    /// Encoding used for non-Unicode text under this collation.
    #[must_use]
    pub fn encoding(&self) -> &'static Encoding {
        if self.is_utf8() {
            return encoding_rs::UTF_8;
        }
        encoding_for_code_page(self.code_page())
    }

    /// Decode column bytes into text.
    #[must_use]
    pub fn decode_text(&self, bytes: &[u8]) -> String {
        let (text, _, _) = self.encoding().decode(bytes);
        text.into_owned()
    }

    /// Encode text into column bytes, replacing unmappable characters.
    #[must_use]
    pub fn encode_text(&self, text: &str) -> Vec<u8> {
        let (bytes, _, _) = self.encoding().encode(text);
        bytes.into_owned()
    }
}

/// Windows code page for an LCID, 1252 when unknown.
#[must_use]
pub fn code_page_for_lcid(lcid: u32) -> u16 {
    match lcid & 0xFFFF {
        0x0411 => 932,
        0x0804 | 0x1004 => 936,
        0x0412 => 949,
        0x0404 | 0x0C04 | 0x1404 => 950,
        0x041E => 874,
        0x0405 | 0x0415 | 0x040E | 0x041A | 0x081A | 0x141A | 0x101A | 0x041B | 0x0424
        | 0x0418 | 0x041C => 1250,
        0x0419 | 0x0422 | 0x0423 | 0x0402 | 0x042F | 0x0C1A | 0x201A | 0x0440 | 0x0843
        | 0x0444 | 0x0450 | 0x0485 => 1251,
        0x0408 => 1253,
        0x041F | 0x042C => 1254,
        0x040D => 1255,
        0x0429 | 0x0420 | 0x048C | 0x0463 => 1256,
        // Arabic locales share the 0x01 primary language
        lang if lang & 0x00FF == 0x01 => 1256,
        0x0425..=0x0427 => 1257,
        0x042A => 1258,
        _ => 1252,
    }
}

/// Encoding for a Windows code page, Windows-1252 when unknown.
#[must_use]
pub fn encoding_for_code_page(code_page: u16) -> &'static Encoding {
    match code_page {
        874 => encoding_rs::WINDOWS_874,
        932 => encoding_rs::SHIFT_JIS,
        936 => encoding_rs::GB18030,
        949 => encoding_rs::EUC_KR,
        950 => encoding_rs::BIG5,
        1250 => encoding_rs::WINDOWS_1250,
        1251 => encoding_rs::WINDOWS_1251,
        1253 => encoding_rs::WINDOWS_1253,
        1254 => encoding_rs::WINDOWS_1254,
        1255 => encoding_rs::WINDOWS_1255,
        1256 => encoding_rs::WINDOWS_1256,
        1257 => encoding_rs::WINDOWS_1257,
        1258 => encoding_rs::WINDOWS_1258,
        65001 => encoding_rs::UTF_8,
        _ => encoding_rs::WINDOWS_1252,
    }
}
