//! UTF-16LE text handling.
//!
//! SQL Server sends all Unicode text as little-endian UTF-16 code units.
//! Characters outside the Basic Multilingual Plane travel as surrogate
//! pairs. Decoding is lossy: lone surrogates and a trailing odd byte become
//! U+FFFD rather than failing the whole message.
//!
//! Length prefixes in the protocol count *characters* (code units), so a
//! one-byte prefix of 5 means 10 bytes follow.

use bytes::{Buf, BufMut};

use crate::error::ProtocolError;

/// Combine two bytes in little-endian order.
#[inline]
#[must_use]
pub const fn le_u16(lo: u8, hi: u8) -> u16 {
    (lo as u16) | ((hi as u16) << 8)
}

/// Split a `u16` into little-endian bytes.
#[inline]
#[must_use]
pub const fn split_le_u16(value: u16) -> [u8; 2] {
    [value as u8, (value >> 8) as u8]
}

/// Number of UTF-16 code units needed for `s`.
#[must_use]
pub fn utf16_len(s: &str) -> usize {
    s.encode_utf16().count()
}

/// Encode text as UTF-16LE bytes.
#[must_use]
pub fn encode_utf16(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len() * 2);
    write_utf16(&mut out, s);
    out
}

/// Append the UTF-16LE form of `s` without any length prefix.
pub fn write_utf16(dst: &mut impl BufMut, s: &str) {
    for unit in s.encode_utf16() {
        dst.put_u16_le(unit);
    }
}

/// Decode UTF-16LE bytes, replacing invalid sequences with U+FFFD.
#[must_use]
pub fn decode_utf16_lossy(bytes: &[u8]) -> String {
    let units = bytes.chunks_exact(2).map(|pair| le_u16(pair[0], pair[1]));
    let mut out: String = char::decode_utf16(units)
        .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect();
    if bytes.len() % 2 == 1 {
        out.push(char::REPLACEMENT_CHARACTER);
    }
    out
}

/// Read `chars` UTF-16 code units from `src`.
pub fn read_utf16(src: &mut impl Buf, chars: usize) -> Result<String, ProtocolError> {
    let byte_len = chars * 2;
    if src.remaining() < byte_len {
        return Err(ProtocolError::IncompletePacket {
            expected: byte_len,
            actual: src.remaining(),
        });
    }
    let raw = src.copy_to_bytes(byte_len);
    Ok(decode_utf16_lossy(&raw))
}

/// Read a string prefixed by a one-byte character count (B_VARCHAR).
pub fn read_b_varchar(src: &mut impl Buf) -> Result<String, ProtocolError> {
    if !src.has_remaining() {
        return Err(ProtocolError::UnexpectedEof);
    }
    let chars = src.get_u8() as usize;
    read_utf16(src, chars)
}

/// Read a string prefixed by a two-byte character count (US_VARCHAR).
pub fn read_us_varchar(src: &mut impl Buf) -> Result<String, ProtocolError> {
    if src.remaining() < 2 {
        return Err(ProtocolError::UnexpectedEof);
    }
    let chars = src.get_u16_le() as usize;
    read_utf16(src, chars)
}

/// Write a string prefixed by a one-byte character count (B_VARCHAR).
pub fn write_b_varchar(dst: &mut impl BufMut, s: &str) -> Result<(), ProtocolError> {
    let chars = utf16_len(s);
    let len = u8::try_from(chars).map_err(|_| ProtocolError::StringTooLong { prefix: 1, chars })?;
    dst.put_u8(len);
    write_utf16(dst, s);
    Ok(())
}

/// Write a string prefixed by a two-byte character count (US_VARCHAR).
pub fn write_us_varchar(dst: &mut impl BufMut, s: &str) -> Result<(), ProtocolError> {
    let chars = utf16_len(s);
    let len =
        u16::try_from(chars).map_err(|_| ProtocolError::StringTooLong { prefix: 2, chars })?;
    dst.put_u16_le(len);
    write_utf16(dst, s);
    Ok(())
}
