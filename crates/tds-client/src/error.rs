//! Client error types.

use tds_auth::AuthError;
use tds_codec::CodecError;
use tds_pool::PoolError;
use tds_tls::TlsError;
use tds_types::TypeError;
use tds_wire::{ProtocolError, ServerMessage};
use thiserror::Error;

use crate::command::Arity;

/// Errors that can occur during client operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Dialing, routing or login failed, or the server closed the connection.
    #[error("connection failed: {0}")]
    Connection(String),

    /// TLS error.
    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed or unexpected wire data.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Packet layer error.
    #[error("codec error: {0}")]
    Codec(CodecError),

    /// A wire value could not be decoded.
    #[error("value codec error: {0}")]
    Type(TypeError),

    /// Authentication challenge could not be answered.
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// ERROR tokens returned by the server, in arrival order.
    #[error("{}", join_messages(.0))]
    Server(Vec<ServerMessage>),

    /// Row count did not match the command's declared arity.
    #[error("arity {expected} violated: {rows} row(s) returned")]
    Arity {
        /// Declared arity.
        expected: Arity,
        /// Rows the server returned.
        rows: u64,
    },

    /// Parameter exceeds its declared length and truncation is off.
    #[error("parameter {param} too long: declared {declared} bytes, got {actual}")]
    ValueTooLong {
        /// Parameter name.
        param: String,
        /// Declared length in bytes.
        declared: usize,
        /// Encoded length in bytes.
        actual: usize,
    },

    /// A streamed parameter's reader failed; the request was withdrawn and
    /// the session is still usable.
    #[error("parameter {param}: stream aborted: {reason}")]
    StreamAborted {
        /// Parameter name.
        param: String,
        /// What the reader or encoder reported.
        reason: String,
    },

    /// No conversion from the decoded value to the scan target.
    #[error("field {field}: cannot convert {input} to {output}")]
    TypeNotSupported {
        /// Column name.
        field: String,
        /// Decoded value type.
        input: &'static str,
        /// Requested Rust type.
        output: &'static str,
    },

    /// NULL decoded into a target that cannot hold it.
    #[error("field {field}: NULL scanned into a non-nullable target")]
    ScanNull {
        /// Column name.
        field: String,
    },

    /// Pool is closed or acquisition gave up.
    #[error("pool error: {0}")]
    Pool(PoolError),

    /// Caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// Query or dial deadline passed.
    #[error("operation timed out")]
    Timeout,

    /// Feature deliberately not supported.
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A binding was registered after the current row was decoded.
    #[error("prep called after the row was decoded")]
    PrepAfterRow,

    /// A scan target names a column that is bound to a sink.
    #[error("column {0} is streamed to a sink and cannot be scanned")]
    ColumnStreamed(String),

    /// No column with this name or index.
    #[error("unknown column: {0}")]
    UnknownColumn(String),

    /// Savepoint or table name rejected.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Encryption was required but the server does not offer it.
    #[error("encryption required but the server does not support it")]
    EncryptionRequired,
}

fn join_messages(messages: &[ServerMessage]) -> String {
    messages
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<CodecError> for Error {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Cancelled => Self::Cancelled,
            CodecError::Timeout => Self::Timeout,
            CodecError::Io(e) => Self::Io(e),
            CodecError::Protocol(e) => Self::Protocol(e),
            CodecError::UnexpectedEof => Self::Connection("server closed the connection".into()),
            other => Self::Codec(other),
        }
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        match err {
            TypeError::Protocol(e) => Self::Protocol(e),
            other => Self::Type(other),
        }
    }
}

impl From<PoolError> for Error {
    fn from(err: PoolError) -> Self {
        match err.into_driver_error() {
            Ok(driver) => match driver.downcast::<Error>() {
                Ok(own) => *own,
                Err(other) => Self::Connection(other.to_string()),
            },
            Err(PoolError::AcquisitionTimeout(_)) => Self::Timeout,
            Err(other) => Self::Pool(other),
        }
    }
}

impl Error {
    /// Attach field context to a conversion failure.
    pub(crate) fn conversion(field: &str, err: TypeError) -> Self {
        match err {
            TypeError::UnexpectedNull => Self::ScanNull {
                field: field.to_owned(),
            },
            TypeError::UnsupportedConversion { from, to } => Self::TypeNotSupported {
                field: field.to_owned(),
                input: from,
                output: to,
            },
            TypeError::OutOfRange { target } => Self::TypeNotSupported {
                field: field.to_owned(),
                input: "out-of-range value",
                output: target,
            },
            other => Self::from(other),
        }
    }

    /// Attach the parameter name to an encoding failure.
    pub(crate) fn parameter(param: &str, err: TypeError) -> Self {
        match err {
            TypeError::ValueTooLong { declared, actual } => Self::ValueTooLong {
                param: param.to_owned(),
                declared,
                actual,
            },
            other => Self::from(other),
        }
    }

    /// The connection cannot be used again and must be closed.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Connection(_)
            | Self::Tls(_)
            | Self::Io(_)
            | Self::Protocol(_)
            | Self::Codec(_)
            | Self::Type(_)
            | Self::Auth(_)
            | Self::EncryptionRequired => true,
            Self::Server(messages) => messages.iter().any(ServerMessage::is_fatal),
            _ => false,
        }
    }

    /// Retrying the operation may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::Io(_) | Self::Connection(_) => true,
            Self::Pool(PoolError::AcquisitionTimeout(_)) => true,
            // deadlock victim, lock timeout, database unavailable
            Self::Server(messages) => messages
                .iter()
                .any(|m| matches!(m.number, 1205 | 1222 | 4060 | 40613)),
            _ => false,
        }
    }

    /// Server messages carried by this error.
    #[must_use]
    pub fn server_messages(&self) -> &[ServerMessage] {
        match self {
            Self::Server(messages) => messages,
            _ => &[],
        }
    }

    /// Whether the server reported error `number`.
    #[must_use]
    pub fn is_server_error(&self, number: i32) -> bool {
        self.server_messages().iter().any(|m| m.number == number)
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;
