//! # tds-wire
//!
//! Synchronous MS-TDS wire structures for SQL Server.
//!
//! This crate owns everything that can be expressed over a byte buffer
//! without I/O: the 8-byte packet header, UTF-16LE strings, the data type
//! registry, collations, PRELOGIN and LOGIN7 messages, the SqlBatch, RPC and
//! TransactionManager request bodies, and the bounded-size tokens of a
//! tabular result. Packet reassembly and the async token stream live in
//! higher-level crates.
//!
//! ## Example
//!
//! ```rust
//! use tds_wire::{PacketHeader, PacketStatus, PacketType};
//!
//! let header = PacketHeader::new(PacketType::SqlBatch, PacketStatus::END_OF_MESSAGE, 100);
//! assert_eq!(header.payload_length(), 92);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod collation;
pub mod error;
pub mod login7;
pub mod packet;
pub mod prelogin;
pub mod registry;
pub mod rpc;
pub mod sql_batch;
pub mod token;
pub mod txn;
pub mod types;
pub mod utf16;
pub mod version;

pub use collation::Collation;
pub use error::ProtocolError;
pub use login7::{Login7, OptionFlags1, OptionFlags2, OptionFlags3, TypeFlags};
pub use packet::{
    DEFAULT_PACKET_SIZE, MAX_PACKET_SIZE, MIN_PACKET_SIZE, PACKET_HEADER_SIZE, PacketHeader,
    PacketStatus, PacketType,
};
pub use prelogin::{EncryptionLevel, PreLogin, PreLoginOption};
pub use registry::{SqlType, TypeProps, ValueKind};
pub use rpc::{ParamStatus, ProcId, RpcOptions, RpcRequest, RpcTarget};
pub use sql_batch::encode_sql_batch;
pub use token::{
    Done, DoneKind, DoneStatus, EnvChange, LoginAck, MessageKind, Order, ServerMessage,
    TokenLength, TokenType,
};
pub use txn::{IsolationLevel, TransactionRequest};
pub use types::{ColumnFlags, TypeId};
pub use version::{ServerVersion, TdsVersion};
