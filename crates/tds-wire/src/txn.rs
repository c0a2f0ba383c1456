//! TransactionManager requests.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::sql_batch::{write_all_headers, ALL_HEADERS_LEN};
use crate::utf16::write_b_varchar;

const TM_BEGIN_XACT: u16 = 5;
const TM_COMMIT_XACT: u16 = 7;
const TM_ROLLBACK_XACT: u16 = 8;
const TM_SAVE_XACT: u16 = 9;

/// Transaction isolation level byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum IsolationLevel {
    /// Keep the session's current level.
    #[default]
    Unchanged = 0,
    /// READ UNCOMMITTED.
    ReadUncommitted = 1,
    /// READ COMMITTED.
    ReadCommitted = 2,
    /// REPEATABLE READ.
    RepeatableRead = 3,
    /// SERIALIZABLE.
    Serializable = 4,
    /// SNAPSHOT.
    Snapshot = 5,
}

impl IsolationLevel {
    /// The T-SQL spelling of the level.
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Unchanged | Self::ReadCommitted => "READ COMMITTED",
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
            Self::Snapshot => "SNAPSHOT",
        }
    }
}

/// A TransactionManager sub-request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionRequest {
    /// Begin a transaction.
    Begin {
        /// Isolation for the new transaction.
        isolation: IsolationLevel,
        /// Optional transaction name.
        name: String,
    },
    /// Commit the active transaction.
    Commit {
        /// Transaction name, usually empty.
        name: String,
    },
    /// Roll back the transaction, or to a savepoint when `name` is one.
    Rollback {
        /// Transaction or savepoint name.
        name: String,
    },
    /// Create a savepoint.
    Save {
        /// Savepoint name.
        name: String,
    },
}

impl TransactionRequest {
    /// Encode the TransactionManager body.
    pub fn encode(&self, transaction_descriptor: u64) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::with_capacity(ALL_HEADERS_LEN + 32);
        write_all_headers(&mut buf, transaction_descriptor);
        match self {
            Self::Begin { isolation, name } => {
                buf.put_u16_le(TM_BEGIN_XACT);
                buf.put_u8(*isolation as u8);
                write_b_varchar(&mut buf, name)?;
            }
            Self::Commit { name } => {
                buf.put_u16_le(TM_COMMIT_XACT);
                write_b_varchar(&mut buf, name)?;
                // no chained begin
                buf.put_u8(0);
            }
            Self::Rollback { name } => {
                buf.put_u16_le(TM_ROLLBACK_XACT);
                write_b_varchar(&mut buf, name)?;
                buf.put_u8(0);
            }
            Self::Save { name } => {
                buf.put_u16_le(TM_SAVE_XACT);
                write_b_varchar(&mut buf, name)?;
            }
        }
        Ok(buf.freeze())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_begin() {
        let body = TransactionRequest::Begin {
            isolation: IsolationLevel::Serializable,
            name: String::new(),
        }
        .encode(0)
        .unwrap();
        assert_eq!(&body[22..], &[5, 0, 4, 0]);
    }

    #[test]
    fn test_commit_carries_descriptor() {
        let body = TransactionRequest::Commit { name: String::new() }
            .encode(0x55)
            .unwrap();
        assert_eq!(body[10], 0x55);
        assert_eq!(&body[22..], &[7, 0, 0, 0]);
    }

    #[test]
    fn test_save_and_rollback_to() {
        let save = TransactionRequest::Save { name: "A".into() }.encode(1).unwrap();
        assert_eq!(&save[22..], &[9, 0, 1, b'A', 0]);
        let rollback = TransactionRequest::Rollback { name: "A".into() }
            .encode(1)
            .unwrap();
        assert_eq!(&rollback[22..], &[8, 0, 1, b'A', 0, 0]);
    }
}
