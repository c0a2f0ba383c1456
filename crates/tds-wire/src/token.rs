//! Tabular-result tokens with a bounded size.
//!
//! Every token starts with a type byte. The ones decoded here either have a
//! fixed size (DONE and its siblings, RETURNSTATUS) or a length prefix
//! (ENVCHANGE, INFO, ERROR, LOGINACK, ORDER), so the caller can read the
//! whole token body before decoding it. COLMETADATA, ROW, NBCROW and
//! RETURNVALUE carry typed values of unbounded size and are decoded by the
//! type layer.
//!
//! The encoders exist for servers and test doubles.

use bitflags::bitflags;
use bytes::{Buf, BufMut};

use crate::collation::Collation;
use crate::error::ProtocolError;
use crate::utf16::{read_b_varchar, read_us_varchar, utf16_len, write_b_varchar, write_us_varchar};
use crate::version::{ServerVersion, TdsVersion};

/// Token type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TokenType {
    /// Offset (legacy).
    Offset = 0x78,
    /// Return status of a procedure.
    ReturnStatus = 0x79,
    /// Column metadata.
    ColMetaData = 0x81,
    /// Table names for browse mode.
    TabName = 0xA4,
    /// Column info for browse mode.
    ColInfo = 0xA5,
    /// ORDER BY columns.
    Order = 0xA9,
    /// Error message.
    Error = 0xAA,
    /// Informational message.
    Info = 0xAB,
    /// Output parameter value.
    ReturnValue = 0xAC,
    /// Login acknowledgement.
    LoginAck = 0xAD,
    /// Feature extension acknowledgement.
    FeatureExtAck = 0xAE,
    /// Row.
    Row = 0xD1,
    /// Null-bitmap compressed row.
    NbcRow = 0xD2,
    /// Environment change.
    EnvChange = 0xE3,
    /// Session state.
    SessionState = 0xE4,
    /// SSPI challenge.
    Sspi = 0xED,
    /// Federated authentication info.
    FedAuthInfo = 0xEE,
    /// End of a statement.
    Done = 0xFD,
    /// End of a procedure.
    DoneProc = 0xFE,
    /// End of a statement inside a procedure.
    DoneInProc = 0xFF,
}

/// How a token's size is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenLength {
    /// Fixed body size.
    Fixed(usize),
    /// Little-endian `u16` length prefix.
    U16,
    /// Little-endian `u32` length prefix.
    U32,
    /// Size depends on the content.
    Variable,
}

impl TokenType {
    /// Create from a raw byte.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        Ok(match value {
            0x78 => Self::Offset,
            0x79 => Self::ReturnStatus,
            0x81 => Self::ColMetaData,
            0xA4 => Self::TabName,
            0xA5 => Self::ColInfo,
            0xA9 => Self::Order,
            0xAA => Self::Error,
            0xAB => Self::Info,
            0xAC => Self::ReturnValue,
            0xAD => Self::LoginAck,
            0xAE => Self::FeatureExtAck,
            0xD1 => Self::Row,
            0xD2 => Self::NbcRow,
            0xE3 => Self::EnvChange,
            0xE4 => Self::SessionState,
            0xED => Self::Sspi,
            0xEE => Self::FedAuthInfo,
            0xFD => Self::Done,
            0xFE => Self::DoneProc,
            0xFF => Self::DoneInProc,
            _ => return Err(ProtocolError::InvalidTokenType(value)),
        })
    }

    /// How the size of this token is encoded.
    #[must_use]
    pub const fn length(self) -> TokenLength {
        match self {
            Self::Offset => TokenLength::Fixed(4),
            Self::ReturnStatus => TokenLength::Fixed(4),
            Self::Done | Self::DoneProc | Self::DoneInProc => TokenLength::Fixed(Done::SIZE),
            Self::TabName
            | Self::ColInfo
            | Self::Order
            | Self::Error
            | Self::Info
            | Self::LoginAck
            | Self::EnvChange
            | Self::Sspi => TokenLength::U16,
            Self::SessionState | Self::FedAuthInfo => TokenLength::U32,
            Self::ColMetaData
            | Self::ReturnValue
            | Self::Row
            | Self::NbcRow
            | Self::FeatureExtAck => TokenLength::Variable,
        }
    }
}

bitflags! {
    /// DONE status bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DoneStatus: u16 {
        /// More results follow.
        const MORE = 0x0001;
        /// The statement failed.
        const ERROR = 0x0002;
        /// A transaction is in progress.
        const IN_XACT = 0x0004;
        /// The row count is valid.
        const COUNT = 0x0010;
        /// Acknowledges an ATTENTION.
        const ATTN = 0x0020;
        /// Severe server error; discard the results.
        const SRVERROR = 0x0100;
    }
}

/// Which DONE token was seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DoneKind {
    /// DONE.
    Done,
    /// DONEPROC.
    Proc,
    /// DONEINPROC.
    InProc,
}

/// A DONE, DONEPROC or DONEINPROC token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Done {
    /// Token kind.
    pub kind: DoneKind,
    /// Status bits.
    pub status: DoneStatus,
    /// Current command token.
    pub cur_cmd: u16,
    /// Rows affected, valid when [`DoneStatus::COUNT`] is set.
    pub rows: u64,
}

impl Done {
    /// Body size.
    pub const SIZE: usize = 12;

    /// A final DONE with an optional row count.
    #[must_use]
    pub fn new(rows: Option<u64>) -> Self {
        Self {
            kind: DoneKind::Done,
            status: if rows.is_some() {
                DoneStatus::COUNT
            } else {
                DoneStatus::empty()
            },
            cur_cmd: 0xC1,
            rows: rows.unwrap_or(0),
        }
    }

    /// Decode the body of a DONE-family token.
    pub fn decode(kind: DoneKind, src: &mut impl Buf) -> Result<Self, ProtocolError> {
        if src.remaining() < Self::SIZE {
            return Err(ProtocolError::IncompletePacket {
                expected: Self::SIZE,
                actual: src.remaining(),
            });
        }
        Ok(Self {
            kind,
            status: DoneStatus::from_bits_retain(src.get_u16_le()),
            cur_cmd: src.get_u16_le(),
            rows: src.get_u64_le(),
        })
    }

    /// Encode the token including its type byte.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(match self.kind {
            DoneKind::Done => TokenType::Done as u8,
            DoneKind::Proc => TokenType::DoneProc as u8,
            DoneKind::InProc => TokenType::DoneInProc as u8,
        });
        dst.put_u16_le(self.status.bits());
        dst.put_u16_le(self.cur_cmd);
        dst.put_u64_le(self.rows);
    }

    /// Whether more results follow.
    #[must_use]
    pub const fn has_more(&self) -> bool {
        self.status.contains(DoneStatus::MORE)
    }

    /// Whether this is the last DONE of the response.
    #[must_use]
    pub const fn is_final(&self) -> bool {
        !self.has_more() && !matches!(self.kind, DoneKind::InProc)
    }

    /// Row count, when the server reported one.
    #[must_use]
    pub const fn row_count(&self) -> Option<u64> {
        if self.status.contains(DoneStatus::COUNT) {
            Some(self.rows)
        } else {
            None
        }
    }

    /// Whether this DONE acknowledges an ATTENTION.
    #[must_use]
    pub const fn is_attention_ack(&self) -> bool {
        self.status.contains(DoneStatus::ATTN)
    }
}

/// Severity class of a server message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// INFO token.
    Info,
    /// ERROR token.
    Error,
}

/// A message from an INFO or ERROR token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerMessage {
    /// INFO or ERROR.
    pub kind: MessageKind,
    /// Message number.
    pub number: i32,
    /// Error state.
    pub state: u8,
    /// Severity class.
    pub class: u8,
    /// Message text.
    pub message: String,
    /// Server name.
    pub server: String,
    /// Procedure name, empty outside procedures.
    pub procedure: String,
    /// Line number in the batch or procedure.
    pub line: i32,
}

impl ServerMessage {
    /// Decode the token body that follows the length prefix.
    pub fn decode(kind: MessageKind, src: &mut impl Buf) -> Result<Self, ProtocolError> {
        if src.remaining() < 6 {
            return Err(ProtocolError::UnexpectedEof);
        }
        let number = src.get_i32_le();
        let state = src.get_u8();
        let class = src.get_u8();
        let message = read_us_varchar(src)?;
        let server = read_b_varchar(src)?;
        let procedure = read_b_varchar(src)?;
        if src.remaining() < 4 {
            return Err(ProtocolError::UnexpectedEof);
        }
        let line = src.get_i32_le();
        Ok(Self {
            kind,
            number,
            state,
            class,
            message,
            server,
            procedure,
            line,
        })
    }

    /// Encode the token including type byte and length.
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<(), ProtocolError> {
        let mut body = Vec::with_capacity(32 + self.message.len() * 2);
        body.put_i32_le(self.number);
        body.put_u8(self.state);
        body.put_u8(self.class);
        write_us_varchar(&mut body, &self.message)?;
        write_b_varchar(&mut body, &self.server)?;
        write_b_varchar(&mut body, &self.procedure)?;
        body.put_i32_le(self.line);
        dst.put_u8(match self.kind {
            MessageKind::Info => TokenType::Info as u8,
            MessageKind::Error => TokenType::Error as u8,
        });
        put_u16_len(dst, body.len())?;
        dst.put_slice(&body);
        Ok(())
    }

    /// Whether the message is an error.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self.kind, MessageKind::Error)
    }

    /// Severity 20 and above terminates the connection.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        self.class >= 20
    }
}

impl std::fmt::Display for ServerMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Msg {}, Level {}, State {}, Line {}: {}",
            self.number, self.class, self.state, self.line, self.message
        )
    }
}

/// LOGINACK token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginAck {
    /// Interface (1 = T-SQL).
    pub interface: u8,
    /// Negotiated protocol version.
    pub tds_version: TdsVersion,
    /// Server program name.
    pub prog_name: String,
    /// Server product version.
    pub version: ServerVersion,
}

impl LoginAck {
    /// Decode the token body that follows the length prefix.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        if src.remaining() < 5 {
            return Err(ProtocolError::UnexpectedEof);
        }
        let interface = src.get_u8();
        let tds_version = TdsVersion::new(src.get_u32());
        let prog_name = read_b_varchar(src)?;
        if src.remaining() < 4 {
            return Err(ProtocolError::UnexpectedEof);
        }
        let major = src.get_u8();
        let minor = src.get_u8();
        let build = src.get_u16();
        Ok(Self {
            interface,
            tds_version,
            prog_name,
            version: ServerVersion::new(major, minor, build),
        })
    }

    /// Encode the token including type byte and length.
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<(), ProtocolError> {
        let mut body = Vec::with_capacity(16 + self.prog_name.len() * 2);
        body.put_u8(self.interface);
        body.put_u32(self.tds_version.raw());
        write_b_varchar(&mut body, &self.prog_name)?;
        body.put_u8(self.version.major);
        body.put_u8(self.version.minor);
        body.put_u16(self.version.build);
        dst.put_u8(TokenType::LoginAck as u8);
        put_u16_len(dst, body.len())?;
        dst.put_slice(&body);
        Ok(())
    }
}

/// ENVCHANGE token.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum EnvChange {
    /// Current database changed.
    Database {
        /// New database.
        new: String,
        /// Previous database.
        old: String,
    },
    /// Session language changed.
    Language(String),
    /// Negotiated packet size.
    PacketSize(u32),
    /// Default collation for the session.
    SqlCollation(Option<Collation>),
    /// Transaction started; carries its descriptor.
    BeginTransaction(u64),
    /// Transaction committed.
    CommitTransaction,
    /// Transaction rolled back.
    RollbackTransaction,
    /// Acknowledges a RESET_CONNECTION request.
    ResetConnectionAck,
    /// Server asks the client to reconnect elsewhere.
    Routing {
        /// Target host.
        host: String,
        /// Target port.
        port: u16,
    },
    /// Any other type; the body is kept verbatim.
    Other {
        /// ENVCHANGE type byte.
        kind: u8,
        /// Remaining bytes.
        data: Vec<u8>,
    },
}

mod env_type {
    pub const DATABASE: u8 = 1;
    pub const LANGUAGE: u8 = 2;
    pub const PACKET_SIZE: u8 = 4;
    pub const SQL_COLLATION: u8 = 7;
    pub const BEGIN_TRAN: u8 = 8;
    pub const COMMIT_TRAN: u8 = 9;
    pub const ROLLBACK_TRAN: u8 = 10;
    pub const RESET_ACK: u8 = 18;
    pub const ROUTING: u8 = 20;
}

fn read_b_varbyte(src: &mut impl Buf) -> Result<Vec<u8>, ProtocolError> {
    if !src.has_remaining() {
        return Err(ProtocolError::UnexpectedEof);
    }
    let len = src.get_u8() as usize;
    if src.remaining() < len {
        return Err(ProtocolError::IncompletePacket {
            expected: len,
            actual: src.remaining(),
        });
    }
    let mut out = vec![0u8; len];
    src.copy_to_slice(&mut out);
    Ok(out)
}

impl EnvChange {
    /// Decode the token body that follows the length prefix.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        if !src.has_remaining() {
            return Err(ProtocolError::UnexpectedEof);
        }
        let kind = src.get_u8();
        Ok(match kind {
            env_type::DATABASE => Self::Database {
                new: read_b_varchar(src)?,
                old: read_b_varchar(src)?,
            },
            env_type::LANGUAGE => Self::Language(read_b_varchar(src)?),
            env_type::PACKET_SIZE => {
                let new = read_b_varchar(src)?;
                let size = new
                    .parse()
                    .map_err(|_| ProtocolError::Malformed("packet size ENVCHANGE"))?;
                Self::PacketSize(size)
            }
            env_type::SQL_COLLATION => {
                let raw = read_b_varbyte(src)?;
                if raw.len() >= 5 {
                    Self::SqlCollation(Some(Collation::decode(&mut raw.as_slice())?))
                } else {
                    Self::SqlCollation(None)
                }
            }
            env_type::BEGIN_TRAN => {
                let new = read_b_varbyte(src)?;
                let descriptor = match new.as_slice() {
                    [] => 0,
                    bytes if bytes.len() == 8 => {
                        let mut raw = [0u8; 8];
                        raw.copy_from_slice(bytes);
                        u64::from_le_bytes(raw)
                    }
                    _ => return Err(ProtocolError::Malformed("transaction descriptor")),
                };
                Self::BeginTransaction(descriptor)
            }
            env_type::COMMIT_TRAN => Self::CommitTransaction,
            env_type::ROLLBACK_TRAN => Self::RollbackTransaction,
            env_type::RESET_ACK => Self::ResetConnectionAck,
            env_type::ROUTING => {
                if src.remaining() < 5 {
                    return Err(ProtocolError::UnexpectedEof);
                }
                let _value_len = src.get_u16_le();
                let _protocol = src.get_u8();
                let port = src.get_u16_le();
                let host = read_us_varchar(src)?;
                Self::Routing { host, port }
            }
            other => {
                let rest = src.remaining();
                Self::Other {
                    kind: other,
                    data: src.copy_to_bytes(rest).to_vec(),
                }
            }
        })
    }

    /// Encode the token including type byte and length.
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<(), ProtocolError> {
        let mut body = Vec::with_capacity(32);
        match self {
            Self::Database { new, old } => {
                body.put_u8(env_type::DATABASE);
                write_b_varchar(&mut body, new)?;
                write_b_varchar(&mut body, old)?;
            }
            Self::Language(new) => {
                body.put_u8(env_type::LANGUAGE);
                write_b_varchar(&mut body, new)?;
                body.put_u8(0);
            }
            Self::PacketSize(size) => {
                body.put_u8(env_type::PACKET_SIZE);
                write_b_varchar(&mut body, &size.to_string())?;
                body.put_u8(0);
            }
            Self::SqlCollation(collation) => {
                body.put_u8(env_type::SQL_COLLATION);
                match collation {
                    Some(c) => {
                        body.put_u8(5);
                        c.encode(&mut body);
                    }
                    None => body.put_u8(0),
                }
                body.put_u8(0);
            }
            Self::BeginTransaction(descriptor) => {
                body.put_u8(env_type::BEGIN_TRAN);
                body.put_u8(8);
                body.put_u64_le(*descriptor);
                body.put_u8(0);
            }
            Self::CommitTransaction | Self::RollbackTransaction => {
                body.put_u8(if matches!(self, Self::CommitTransaction) {
                    env_type::COMMIT_TRAN
                } else {
                    env_type::ROLLBACK_TRAN
                });
                body.put_u8(0);
                body.put_u8(0);
            }
            Self::ResetConnectionAck => {
                body.put_u8(env_type::RESET_ACK);
                body.put_u8(0);
                body.put_u8(0);
            }
            Self::Routing { host, port } => {
                body.put_u8(env_type::ROUTING);
                let value_len = 5 + utf16_len(host) * 2;
                put_u16_len(&mut body, value_len)?;
                body.put_u8(0);
                body.put_u16_le(*port);
                write_us_varchar(&mut body, host)?;
                body.put_u16_le(0);
            }
            Self::Other { kind, data } => {
                body.put_u8(*kind);
                body.put_slice(data);
            }
        }
        dst.put_u8(TokenType::EnvChange as u8);
        put_u16_len(dst, body.len())?;
        dst.put_slice(&body);
        Ok(())
    }
}

/// ORDER token: the ordinals of the ORDER BY columns.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Order {
    /// 1-based column ordinals.
    pub columns: Vec<u16>,
}

impl Order {
    /// Decode the token body that follows the length prefix.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        let columns = (0..src.remaining() / 2).map(|_| src.get_u16_le()).collect();
        Ok(Self { columns })
    }
}

/// Encode a RETURNSTATUS token.
pub fn encode_return_status(dst: &mut impl BufMut, status: i32) {
    dst.put_u8(TokenType::ReturnStatus as u8);
    dst.put_i32_le(status);
}

pub(crate) fn put_u16_len(dst: &mut impl BufMut, len: usize) -> Result<(), ProtocolError> {
    let len = u16::try_from(len).map_err(|_| ProtocolError::InvalidLength {
        type_name: "token",
        length: len,
    })?;
    dst.put_u16_le(len);
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn body_of(encoded: &[u8]) -> &[u8] {
        let len = u16::from_le_bytes([encoded[1], encoded[2]]) as usize;
        assert_eq!(encoded.len(), 3 + len);
        &encoded[3..]
    }

    #[test]
    fn test_done_status() {
        let raw = [0x11, 0x00, 0xC1, 0x00, 5, 0, 0, 0, 0, 0, 0, 0];
        let done = Done::decode(DoneKind::Done, &mut raw.as_ref()).unwrap();
        assert!(done.has_more());
        assert!(!done.is_final());
        assert_eq!(done.row_count(), Some(5));

        let mut out = Vec::new();
        Done::new(Some(3)).encode(&mut out);
        assert_eq!(out[0], 0xFD);
        assert_eq!(&out[1..3], &[0x10, 0x00]);
        assert_eq!(out.len(), 1 + Done::SIZE);
    }

    #[test]
    fn test_done_in_proc_is_not_final() {
        let done = Done {
            kind: DoneKind::InProc,
            ..Done::new(None)
        };
        assert!(!done.is_final());
    }

    #[test]
    fn test_attention_ack() {
        let raw = [0x20, 0x00, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        let done = Done::decode(DoneKind::Done, &mut raw.as_ref()).unwrap();
        assert!(done.is_attention_ack());
        assert_eq!(done.row_count(), None);
    }

    #[test]
    fn test_server_message_roundtrip() {
        let msg = ServerMessage {
            kind: MessageKind::Error,
            number: 208,
            state: 1,
            class: 16,
            message: "Invalid object name 'nope'.".into(),
            server: "db01".into(),
            procedure: String::new(),
            line: 1,
        };
        let mut out = Vec::new();
        msg.encode(&mut out).unwrap();
        assert_eq!(out[0], 0xAA);
        let decoded = ServerMessage::decode(MessageKind::Error, &mut body_of(&out)).unwrap();
        assert_eq!(decoded, msg);
        assert!(decoded.is_error());
        assert!(!decoded.is_fatal());
    }

    #[test]
    fn test_login_ack_roundtrip() {
        let ack = LoginAck {
            interface: 1,
            tds_version: TdsVersion::V7_4,
            prog_name: "Microsoft SQL Server".into(),
            version: ServerVersion::new(16, 0, 4135),
        };
        let mut out = Vec::new();
        ack.encode(&mut out).unwrap();
        // version travels big-endian in LOGINACK
        assert_eq!(&body_of(&out)[1..5], &[0x74, 0x00, 0x00, 0x04]);
        assert_eq!(LoginAck::decode(&mut body_of(&out)).unwrap(), ack);
    }

    #[test]
    fn test_env_change_transactions() {
        let mut out = Vec::new();
        EnvChange::BeginTransaction(0xABCD).encode(&mut out).unwrap();
        assert_eq!(
            EnvChange::decode(&mut body_of(&out)).unwrap(),
            EnvChange::BeginTransaction(0xABCD)
        );

        // commit: new value empty, old value carries the descriptor
        let raw = [9u8, 0, 8, 1, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(
            EnvChange::decode(&mut raw.as_ref()).unwrap(),
            EnvChange::CommitTransaction
        );

        let raw = [8u8, 0, 0];
        assert_eq!(
            EnvChange::decode(&mut raw.as_ref()).unwrap(),
            EnvChange::BeginTransaction(0)
        );
    }

    #[test]
    fn test_env_change_packet_size_and_database() {
        for change in [
            EnvChange::PacketSize(8192),
            EnvChange::Database {
                new: "master".into(),
                old: "tempdb".into(),
            },
            EnvChange::SqlCollation(Some(Collation::default())),
            EnvChange::Routing {
                host: "replica".into(),
                port: 11433,
            },
        ] {
            let mut out = Vec::new();
            change.encode(&mut out).unwrap();
            assert_eq!(EnvChange::decode(&mut body_of(&out)).unwrap(), change);
        }
    }

    #[test]
    fn test_env_change_unknown_kept() {
        let raw = [13u8, 2, 3];
        assert_eq!(
            EnvChange::decode(&mut raw.as_ref()).unwrap(),
            EnvChange::Other {
                kind: 13,
                data: vec![2, 3]
            }
        );
    }

    #[test]
    fn test_order() {
        let raw = [1u8, 0, 3, 0];
        assert_eq!(Order::decode(&mut raw.as_ref()).unwrap().columns, vec![1, 3]);
    }

    #[test]
    fn test_token_lengths() {
        assert_eq!(TokenType::from_u8(0xE3).unwrap().length(), TokenLength::U16);
        assert_eq!(TokenType::from_u8(0xE4).unwrap().length(), TokenLength::U32);
        assert_eq!(
            TokenType::from_u8(0xFE).unwrap().length(),
            TokenLength::Fixed(12)
        );
        assert!(TokenType::from_u8(0x01).is_err());
    }
}
