//! ALL_HEADERS and SQL batch request encoding.
//!
//! Every SqlBatch, RPC and TransactionManager body on TDS 7.2+ opens with
//! ALL_HEADERS. The only header this client sends is the transaction
//! descriptor: the 8-byte id the server handed out in the BEGIN ENVCHANGE,
//! or zero outside a transaction.

use bytes::{BufMut, Bytes, BytesMut};

use crate::utf16::write_utf16;

/// Encoded size of ALL_HEADERS with one transaction descriptor header.
pub const ALL_HEADERS_LEN: usize = 22;

const TRANSACTION_DESCRIPTOR_HEADER: u16 = 0x0002;
const TRANSACTION_DESCRIPTOR_HEADER_LEN: u32 = 18;

/// Write ALL_HEADERS carrying `transaction_descriptor`.
pub fn write_all_headers(dst: &mut impl BufMut, transaction_descriptor: u64) {
    dst.put_u32_le(ALL_HEADERS_LEN as u32);
    dst.put_u32_le(TRANSACTION_DESCRIPTOR_HEADER_LEN);
    dst.put_u16_le(TRANSACTION_DESCRIPTOR_HEADER);
    dst.put_u64_le(transaction_descriptor);
    // outstanding request count, always 1 without MARS
    dst.put_u32_le(1);
}

/// Encode a SqlBatch body.
#[must_use]
pub fn encode_sql_batch(sql: &str, transaction_descriptor: u64) -> Bytes {
    let mut buf = BytesMut::with_capacity(ALL_HEADERS_LEN + sql.len() * 2);
    write_all_headers(&mut buf, transaction_descriptor);
    write_utf16(&mut buf, sql);
    buf.freeze()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_all_headers_layout() {
        let mut buf = Vec::new();
        write_all_headers(&mut buf, 0x0102_0304_0506_0708);
        assert_eq!(buf.len(), ALL_HEADERS_LEN);
        assert_eq!(&buf[0..4], &[22, 0, 0, 0]);
        assert_eq!(&buf[4..8], &[18, 0, 0, 0]);
        assert_eq!(&buf[8..10], &[0x02, 0x00]);
        assert_eq!(&buf[10..18], &[8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(&buf[18..22], &[1, 0, 0, 0]);
    }

    #[test]
    fn test_sql_batch_body() {
        let body = encode_sql_batch("SELECT 1", 0);
        assert_eq!(body.len(), ALL_HEADERS_LEN + 16);
        assert_eq!(&body[22..24], &[b'S', 0]);
        assert_eq!(&body[10..18], &[0u8; 8]);
    }
}
