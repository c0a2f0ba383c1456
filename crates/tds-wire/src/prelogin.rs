//! PRELOGIN negotiation message.
//!
//! The body is a table of `(option, offset BE u16, length BE u16)` entries
//! closed by `0xFF`, followed by the option payloads. Offsets count from the
//! start of the body. The same layout serves the client request and the
//! server response; only the meaning of VERSION differs.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::version::ServerVersion;

const OPTION_ENTRY_SIZE: usize = 5;

/// PRELOGIN option tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PreLoginOption {
    /// Product version.
    Version = 0x00,
    /// Encryption stance.
    Encryption = 0x01,
    /// Named instance to validate.
    Instance = 0x02,
    /// Client thread id.
    ThreadId = 0x03,
    /// MARS request.
    Mars = 0x04,
    /// Trace activity id.
    TraceId = 0x05,
    /// Federated authentication.
    FedAuthRequired = 0x06,
    /// Nonce.
    Nonce = 0x07,
    /// End of the option table.
    Terminator = 0xFF,
}

impl PreLoginOption {
    /// Create from a raw byte.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        Ok(match value {
            0x00 => Self::Version,
            0x01 => Self::Encryption,
            0x02 => Self::Instance,
            0x03 => Self::ThreadId,
            0x04 => Self::Mars,
            0x05 => Self::TraceId,
            0x06 => Self::FedAuthRequired,
            0x07 => Self::Nonce,
            0xFF => Self::Terminator,
            _ => return Err(ProtocolError::InvalidPreloginOption(value)),
        })
    }
}

/// Encryption stance exchanged in PRELOGIN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum EncryptionLevel {
    /// Encrypt the login packet only.
    #[default]
    Off = 0x00,
    /// Encrypt the whole session.
    On = 0x01,
    /// No TLS available.
    NotSupported = 0x02,
    /// Encryption is mandatory.
    Required = 0x03,
}

impl EncryptionLevel {
    /// Create from a raw byte; unknown values read as `Off`.
    #[must_use]
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x01 => Self::On,
            0x02 => Self::NotSupported,
            0x03 => Self::Required,
            _ => Self::Off,
        }
    }

    /// Whether this side insists on a fully encrypted session.
    #[must_use]
    pub const fn demands_encryption(self) -> bool {
        matches!(self, Self::On | Self::Required)
    }
}

/// A PRELOGIN request or response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreLogin {
    /// Client library version on send, server product version on receive.
    pub version: ServerVersion,
    /// Encryption stance.
    pub encryption: EncryptionLevel,
    /// Instance name, sent NUL-terminated.
    pub instance: Option<String>,
    /// Client thread id.
    pub thread_id: Option<u32>,
    /// MARS requested or granted.
    pub mars: bool,
}

impl PreLogin {
    /// A request advertising the given client version and encryption stance.
    #[must_use]
    pub fn new(version: ServerVersion, encryption: EncryptionLevel) -> Self {
        Self {
            version,
            encryption,
            ..Self::default()
        }
    }

    /// Ask the server to validate a named instance.
    #[must_use]
    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    /// Encode the option table and payloads.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut options: Vec<(PreLoginOption, Vec<u8>)> = vec![
            (PreLoginOption::Version, self.version.prelogin_bytes().to_vec()),
            (PreLoginOption::Encryption, vec![self.encryption as u8]),
        ];
        if let Some(instance) = &self.instance {
            let mut raw = instance.as_bytes().to_vec();
            raw.push(0);
            options.push((PreLoginOption::Instance, raw));
        }
        if let Some(thread_id) = self.thread_id {
            options.push((PreLoginOption::ThreadId, thread_id.to_be_bytes().to_vec()));
        }
        options.push((PreLoginOption::Mars, vec![u8::from(self.mars)]));

        let table_len = options.len() * OPTION_ENTRY_SIZE + 1;
        let data_len: usize = options.iter().map(|(_, d)| d.len()).sum();
        let mut buf = BytesMut::with_capacity(table_len + data_len);

        let mut offset = table_len;
        for (option, data) in &options {
            buf.put_u8(*option as u8);
            buf.put_u16(offset as u16);
            buf.put_u16(data.len() as u16);
            offset += data.len();
        }
        buf.put_u8(PreLoginOption::Terminator as u8);
        for (_, data) in &options {
            buf.put_slice(data);
        }
        buf.freeze()
    }

    /// Decode a PRELOGIN body.
    ///
    /// Unknown options and entries pointing outside the body are skipped.
    pub fn decode(body: &[u8]) -> Result<Self, ProtocolError> {
        let mut table = body;
        let mut entries = Vec::new();
        loop {
            if !table.has_remaining() {
                return Err(ProtocolError::UnexpectedEof);
            }
            let kind = table.get_u8();
            if kind == PreLoginOption::Terminator as u8 {
                break;
            }
            if table.remaining() < 4 {
                return Err(ProtocolError::UnexpectedEof);
            }
            let offset = table.get_u16() as usize;
            let length = table.get_u16() as usize;
            entries.push((kind, offset, length));
        }

        let mut prelogin = Self::default();
        for (kind, offset, length) in entries {
            let Some(mut data) = body.get(offset..offset + length) else {
                continue;
            };
            match PreLoginOption::from_u8(kind) {
                Ok(PreLoginOption::Version) if length >= 6 => {
                    prelogin.version = ServerVersion::decode_prelogin(&mut data)?;
                }
                Ok(PreLoginOption::Encryption) if length >= 1 => {
                    prelogin.encryption = EncryptionLevel::from_u8(data[0]);
                }
                Ok(PreLoginOption::Instance) => {
                    let name = data.split(|b| *b == 0).next().unwrap_or_default();
                    if !name.is_empty() {
                        prelogin.instance = Some(String::from_utf8_lossy(name).into_owned());
                    }
                }
                Ok(PreLoginOption::ThreadId) if length >= 4 => {
                    prelogin.thread_id = Some(data.get_u32());
                }
                Ok(PreLoginOption::Mars) if length >= 1 => {
                    prelogin.mars = data[0] != 0;
                }
                _ => {}
            }
        }
        Ok(prelogin)
    }
}
