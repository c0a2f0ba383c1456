//! LOGIN7 authentication request.
//!
//! A 94-byte fixed header is followed by the variable data that its
//! `(offset, length)` table points into. Offsets count from the start of the
//! LOGIN7 body and lengths count UTF-16 characters, except SSPI which counts
//! bytes.
//!
//! The password is obfuscated, not encrypted: every byte of its UTF-16 form
//! has its nibbles swapped and is XORed with `0xA5`.

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::utf16::{decode_utf16_lossy, utf16_len, write_utf16};
use crate::version::TdsVersion;

/// Size of the fixed LOGIN7 header.
pub const LOGIN7_HEADER_SIZE: usize = 94;

bitflags! {
    /// OptionFlags1.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OptionFlags1: u8 {
        /// Big-endian byte order.
        const BYTE_ORDER_BE = 0x01;
        /// EBCDIC character set.
        const CHAR_EBCDIC = 0x02;
        /// Dump/load off.
        const DUMP_LOAD_OFF = 0x10;
        /// Warn on USE database.
        const USE_DB_WARN = 0x20;
        /// Failing to switch database is fatal.
        const DATABASE_FATAL = 0x40;
        /// Warn on language change.
        const SET_LANG_WARN = 0x80;
    }
}

bitflags! {
    /// OptionFlags2.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OptionFlags2: u8 {
        /// Failing to set the language is fatal.
        const LANGUAGE_FATAL = 0x01;
        /// ODBC client semantics.
        const ODBC = 0x02;
        /// Windows integrated security.
        const INTEGRATED_SECURITY = 0x80;
    }
}

bitflags! {
    /// TypeFlags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TypeFlags: u8 {
        /// T-SQL dialect.
        const SQL_TSQL = 0x01;
        /// OLE DB client.
        const OLEDB = 0x10;
        /// Read-only application intent.
        const READ_ONLY_INTENT = 0x20;
    }
}

bitflags! {
    /// OptionFlags3.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OptionFlags3: u8 {
        /// Request a password change.
        const CHANGE_PASSWORD = 0x01;
        /// User instance.
        const USER_INSTANCE = 0x02;
        /// Accept BINXML for xml columns.
        const SEND_YUKON_BINARY_XML = 0x04;
        /// Tolerate unknown collations.
        const UNKNOWN_COLLATION_HANDLING = 0x08;
        /// Feature extension block present.
        const EXTENSION = 0x10;
    }
}

/// A LOGIN7 request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Login7 {
    /// Requested protocol version.
    pub tds_version: TdsVersion,
    /// Requested packet size.
    pub packet_size: u32,
    /// Client program version.
    pub client_prog_version: u32,
    /// Client process id.
    pub client_pid: u32,
    /// Connection id.
    pub connection_id: u32,
    /// OptionFlags1.
    pub option_flags1: OptionFlags1,
    /// OptionFlags2.
    pub option_flags2: OptionFlags2,
    /// TypeFlags.
    pub type_flags: TypeFlags,
    /// OptionFlags3.
    pub option_flags3: OptionFlags3,
    /// Client time zone offset in minutes.
    pub client_timezone: i32,
    /// Client locale id.
    pub client_lcid: u32,
    /// Client host name.
    pub hostname: String,
    /// SQL login name.
    pub username: String,
    /// SQL login password.
    pub password: String,
    /// Application name.
    pub app_name: String,
    /// Server name as the client knows it.
    pub server_name: String,
    /// Client library name.
    pub library_name: String,
    /// Initial language.
    pub language: String,
    /// Initial database.
    pub database: String,
    /// Client MAC address.
    pub client_id: [u8; 6],
    /// SSPI blob.
    pub sspi: Vec<u8>,
    /// Database file to attach.
    pub attach_db_file: String,
    /// New password for a password change.
    pub new_password: String,
}

impl Default for Login7 {
    fn default() -> Self {
        Self {
            tds_version: TdsVersion::V7_4,
            packet_size: 4096,
            client_prog_version: 0,
            client_pid: std::process::id(),
            connection_id: 0,
            option_flags1: OptionFlags1::USE_DB_WARN | OptionFlags1::DATABASE_FATAL,
            option_flags2: OptionFlags2::LANGUAGE_FATAL | OptionFlags2::ODBC,
            type_flags: TypeFlags::SQL_TSQL,
            option_flags3: OptionFlags3::SEND_YUKON_BINARY_XML
                | OptionFlags3::UNKNOWN_COLLATION_HANDLING,
            client_timezone: 0,
            client_lcid: 0x0409,
            hostname: String::new(),
            username: String::new(),
            password: String::new(),
            app_name: String::from("tds-client"),
            server_name: String::new(),
            library_name: String::from("tds-client"),
            language: String::new(),
            database: String::new(),
            client_id: [0u8; 6],
            sspi: Vec::new(),
            attach_db_file: String::new(),
            new_password: String::new(),
        }
    }
}

/// Obfuscate a password the way LOGIN7 requires.
pub fn obfuscate_password(dst: &mut impl BufMut, password: &str) {
    for unit in password.encode_utf16() {
        for b in unit.to_le_bytes() {
            dst.put_u8(b.rotate_left(4) ^ 0xA5);
        }
    }
}

/// Invert [`obfuscate_password`].
#[must_use]
pub fn deobfuscate_password(raw: &[u8]) -> String {
    let plain: Vec<u8> = raw.iter().map(|b| (b ^ 0xA5).rotate_left(4)).collect();
    decode_utf16_lossy(&plain)
}

fn slot<'a>(body: &'a [u8], src: &mut &[u8], chars: bool) -> Result<&'a [u8], ProtocolError> {
    let offset = src.get_u16_le() as usize;
    let len = src.get_u16_le() as usize;
    let bytes = if chars { len * 2 } else { len };
    body.get(offset..offset + bytes)
        .ok_or(ProtocolError::Malformed("LOGIN7 offset"))
}

enum Field<'a> {
    Text(&'a str),
    Password(&'a str),
    Raw(&'a [u8]),
}

impl Login7 {
    /// A login with default flags.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set SQL credentials.
    #[must_use]
    pub fn with_sql_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Set the initial database.
    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set the client host name.
    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Set the application name.
    #[must_use]
    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    /// Set the server name.
    #[must_use]
    pub fn with_server_name(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = server_name.into();
        self
    }

    /// Set the requested packet size.
    #[must_use]
    pub fn with_packet_size(mut self, packet_size: u32) -> Self {
        self.packet_size = packet_size;
        self
    }

    /// Encode the LOGIN7 body.
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        // table order is fixed by the protocol; client id sits between
        // database and SSPI
        let head = [
            Field::Text(&self.hostname),
            Field::Text(&self.username),
            Field::Password(&self.password),
            Field::Text(&self.app_name),
            Field::Text(&self.server_name),
            Field::Raw(&[]),
            Field::Text(&self.library_name),
            Field::Text(&self.language),
            Field::Text(&self.database),
        ];
        let tail = [
            Field::Raw(&self.sspi),
            Field::Text(&self.attach_db_file),
            Field::Password(&self.new_password),
        ];

        let mut table = BytesMut::with_capacity(64);
        let mut data = BytesMut::with_capacity(256);
        let mut put_field = |field: &Field<'_>, table: &mut BytesMut| -> Result<(), ProtocolError> {
            let offset = LOGIN7_HEADER_SIZE + data.len();
            let len = match field {
                Field::Text(s) => {
                    write_utf16(&mut data, s);
                    utf16_len(s)
                }
                Field::Password(s) => {
                    obfuscate_password(&mut data, s);
                    utf16_len(s)
                }
                Field::Raw(b) => {
                    data.put_slice(b);
                    b.len()
                }
            };
            let offset = u16::try_from(offset).map_err(|_| ProtocolError::Malformed("LOGIN7 too large"))?;
            let len = u16::try_from(len).map_err(|_| ProtocolError::Malformed("LOGIN7 field too long"))?;
            table.put_u16_le(offset);
            table.put_u16_le(len);
            Ok(())
        };
        for field in &head {
            put_field(field, &mut table)?;
        }
        table.put_slice(&self.client_id);
        for field in &tail {
            put_field(field, &mut table)?;
        }
        // cbSSPILong
        table.put_u32_le(0);

        let total = LOGIN7_HEADER_SIZE + data.len();
        let mut buf = BytesMut::with_capacity(total);
        buf.put_u32_le(total as u32);
        buf.put_u32_le(self.tds_version.raw());
        buf.put_u32_le(self.packet_size);
        buf.put_u32_le(self.client_prog_version);
        buf.put_u32_le(self.client_pid);
        buf.put_u32_le(self.connection_id);
        buf.put_u8(self.option_flags1.bits());
        buf.put_u8(self.option_flags2.bits());
        buf.put_u8(self.type_flags.bits());
        buf.put_u8(self.option_flags3.bits());
        buf.put_i32_le(self.client_timezone);
        buf.put_u32_le(self.client_lcid);
        buf.put_slice(&table);
        debug_assert_eq!(buf.len(), LOGIN7_HEADER_SIZE);
        buf.put_slice(&data);
        Ok(buf.freeze())
    }

    /// Decode a LOGIN7 body, as a server would.
    pub fn decode(body: &[u8]) -> Result<Self, ProtocolError> {
        if body.len() < LOGIN7_HEADER_SIZE {
            return Err(ProtocolError::IncompletePacket {
                expected: LOGIN7_HEADER_SIZE,
                actual: body.len(),
            });
        }
        let mut src = body;
        let _length = src.get_u32_le();
        let mut login = Self {
            tds_version: TdsVersion::new(src.get_u32_le()),
            packet_size: src.get_u32_le(),
            client_prog_version: src.get_u32_le(),
            client_pid: src.get_u32_le(),
            connection_id: src.get_u32_le(),
            option_flags1: OptionFlags1::from_bits_retain(src.get_u8()),
            option_flags2: OptionFlags2::from_bits_retain(src.get_u8()),
            type_flags: TypeFlags::from_bits_retain(src.get_u8()),
            option_flags3: OptionFlags3::from_bits_retain(src.get_u8()),
            client_timezone: src.get_i32_le(),
            client_lcid: src.get_u32_le(),
            ..Self::default()
        };

        login.hostname = decode_utf16_lossy(slot(body, &mut src, true)?);
        login.username = decode_utf16_lossy(slot(body, &mut src, true)?);
        login.password = deobfuscate_password(slot(body, &mut src, true)?);
        login.app_name = decode_utf16_lossy(slot(body, &mut src, true)?);
        login.server_name = decode_utf16_lossy(slot(body, &mut src, true)?);
        slot(body, &mut src, false)?;
        login.library_name = decode_utf16_lossy(slot(body, &mut src, true)?);
        login.language = decode_utf16_lossy(slot(body, &mut src, true)?);
        login.database = decode_utf16_lossy(slot(body, &mut src, true)?);
        src.copy_to_slice(&mut login.client_id);
        login.sspi = slot(body, &mut src, false)?.to_vec();
        login.attach_db_file = decode_utf16_lossy(slot(body, &mut src, true)?);
        login.new_password = deobfuscate_password(slot(body, &mut src, true)?);
        Ok(login)
    }
}
