//! Token stream over a tabular response.
//!
//! [`TokenStream`] is a pull parser: every call to
//! [`next_event`](TokenStream::next_event) consumes just enough of the
//! message to produce one [`FieldEvent`]. Rows are delivered one field at a
//! time followed by [`FieldEvent::Row`]; `(max)` values arrive as
//! [`FieldEvent::Chunk`] pieces unless the whole value came in a single
//! chunk whose length was announced up front.
//!
//! The stream remembers whether it stopped between two events or in the
//! middle of one. Only a stream stopped between events can be resumed
//! after an interrupted read.

use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use tds_codec::MessageReader;
use tds_types::decode::is_null_len;
use tds_types::type_info::decode_table_name;
use tds_types::{
    Chunk, Column, NullBitmap, PlpLength, TypeError, TypeInfo, Value, ValueLayout, decode_fixed,
    decode_var,
};
use tds_wire::registry;
use tds_wire::utf16::decode_utf16_lossy;
use tds_wire::{
    ColumnFlags, Done, DoneKind, EnvChange, LoginAck, MessageKind, Order, ProtocolError,
    ServerMessage, TokenType,
};
use tokio::io::AsyncRead;

use crate::error::Result;

/// Largest piece of a `(max)` value delivered in one chunk event.
pub const MAX_CHUNK: usize = 8 * 1024;

/// An output parameter returned by RETURNVALUE.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnValue {
    /// Parameter position.
    pub ordinal: u16,
    /// Parameter name including `@`.
    pub name: String,
    /// Returned value.
    pub value: Value,
}

/// One decoded step of a response.
#[derive(Debug, Clone)]
pub enum FieldEvent {
    /// A new column set; rows that follow use it.
    Columns(Arc<[Column]>),
    /// A complete field of the current row.
    Field {
        /// Column index.
        column: usize,
        /// Decoded value.
        value: Value,
    },
    /// A piece of a `(max)` field of the current row.
    Chunk {
        /// Column index.
        column: usize,
        /// Raw wire bytes and the more-follows flag.
        chunk: Chunk,
    },
    /// End of the current row.
    Row,
    /// INFO or ERROR.
    Message(ServerMessage),
    /// Rows affected by the statement just completed.
    RowCount(u64),
    /// Procedure return code.
    ReturnStatus(i32),
    /// Output parameter.
    ReturnValue(ReturnValue),
    /// DONE, DONEPROC or DONEINPROC.
    Done(Done),
    /// Session state change.
    EnvChange(EnvChange),
    /// Login accepted.
    LoginAck(LoginAck),
    /// Authentication challenge.
    Sspi(Bytes),
    /// ORDER BY columns of the current result.
    Order(Order),
}

#[derive(Debug)]
struct RowCursor {
    next: usize,
    nulls: Option<NullBitmap>,
}

#[derive(Debug)]
struct PlpCursor {
    column: usize,
    chunk_left: usize,
}

/// Pull parser for TABULAR_RESULT messages.
#[derive(Debug)]
pub struct TokenStream {
    peeked: Option<u8>,
    columns: Arc<[Column]>,
    row: Option<RowCursor>,
    plp: Option<PlpCursor>,
    queued: Option<FieldEvent>,
    clean: bool,
}

impl Default for TokenStream {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenStream {
    /// A stream positioned before the first token.
    #[must_use]
    pub fn new() -> Self {
        Self {
            peeked: None,
            columns: Arc::from(Vec::new()),
            row: None,
            plp: None,
            queued: None,
            clean: true,
        }
    }

    /// Forget all per-message state before a new response.
    pub fn reset(&mut self) {
        self.peeked = None;
        self.row = None;
        self.plp = None;
        self.queued = None;
        self.clean = true;
    }

    /// Current column set.
    #[must_use]
    pub fn columns(&self) -> &Arc<[Column]> {
        &self.columns
    }

    /// Whether the last read stopped between two events.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.clean
    }

    /// Whether a row is partially delivered.
    #[must_use]
    pub fn in_row(&self) -> bool {
        self.row.is_some()
    }

    /// Next event, or `None` at the end of the message.
    pub async fn next_event<R>(&mut self, reader: &mut MessageReader<R>) -> Result<Option<FieldEvent>>
    where
        R: AsyncRead + Unpin,
    {
        let event = self.step(reader).await?;
        self.clean = true;
        Ok(event)
    }

    async fn peek<R>(&mut self, reader: &mut MessageReader<R>) -> Result<Option<u8>>
    where
        R: AsyncRead + Unpin,
    {
        if self.peeked.is_none() {
            if reader.peek_u8().await?.is_none() {
                return Ok(None);
            }
            self.peeked = Some(reader.read_u8().await?);
        }
        Ok(self.peeked)
    }

    async fn step<R>(&mut self, reader: &mut MessageReader<R>) -> Result<Option<FieldEvent>>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            if let Some(event) = self.queued.take() {
                return Ok(Some(event));
            }
            if self.plp.is_some() {
                self.clean = false;
                return self.next_piece(reader).await.map(Some);
            }
            if let Some(row) = &self.row {
                if row.next < self.columns.len() {
                    self.clean = false;
                    return self.next_field(reader).await.map(Some);
                }
                self.row = None;
                return Ok(Some(FieldEvent::Row));
            }

            let Some(byte) = self.peek(reader).await? else {
                return Ok(None);
            };
            self.peeked = None;
            self.clean = false;
            let token = TokenType::from_u8(byte)?;
            tracing::trace!(?token, "token");
            if let Some(event) = self.read_token(token, reader).await? {
                return Ok(Some(event));
            }
        }
    }

    async fn read_token<R>(
        &mut self,
        token: TokenType,
        reader: &mut MessageReader<R>,
    ) -> Result<Option<FieldEvent>>
    where
        R: AsyncRead + Unpin,
    {
        Ok(Some(match token {
            TokenType::ColMetaData => {
                self.columns = read_colmetadata(reader).await?.into();
                FieldEvent::Columns(Arc::clone(&self.columns))
            }
            TokenType::Row => {
                self.row = Some(RowCursor {
                    next: 0,
                    nulls: None,
                });
                return Ok(None);
            }
            TokenType::NbcRow => {
                let len = NullBitmap::byte_len(self.columns.len());
                let bits = reader.fetch(len).await?;
                self.row = Some(RowCursor {
                    next: 0,
                    nulls: Some(NullBitmap::from_bytes(bits.to_vec())),
                });
                return Ok(None);
            }
            TokenType::Done | TokenType::DoneProc | TokenType::DoneInProc => {
                let kind = match token {
                    TokenType::Done => DoneKind::Done,
                    TokenType::DoneProc => DoneKind::Proc,
                    _ => DoneKind::InProc,
                };
                let body = reader.fetch(Done::SIZE).await?;
                let done = Done::decode(kind, &mut &body[..])?;
                tracing::trace!(status = ?done.status, rows = done.rows, "done");
                match done.row_count() {
                    Some(rows) => {
                        self.queued = Some(FieldEvent::Done(done));
                        FieldEvent::RowCount(rows)
                    }
                    None => FieldEvent::Done(done),
                }
            }
            TokenType::ReturnStatus => FieldEvent::ReturnStatus(reader.read_i32_le().await?),
            TokenType::ReturnValue => FieldEvent::ReturnValue(read_return_value(reader).await?),
            TokenType::Error | TokenType::Info => {
                let body = u16_body(reader).await?;
                let kind = if token == TokenType::Error {
                    MessageKind::Error
                } else {
                    MessageKind::Info
                };
                FieldEvent::Message(ServerMessage::decode(kind, &mut &body[..])?)
            }
            TokenType::EnvChange => {
                let body = u16_body(reader).await?;
                FieldEvent::EnvChange(EnvChange::decode(&mut &body[..])?)
            }
            TokenType::LoginAck => {
                let body = u16_body(reader).await?;
                FieldEvent::LoginAck(LoginAck::decode(&mut &body[..])?)
            }
            TokenType::Sspi => FieldEvent::Sspi(u16_body(reader).await?),
            TokenType::Order => {
                let body = u16_body(reader).await?;
                FieldEvent::Order(Order::decode(&mut &body[..])?)
            }
            TokenType::TabName | TokenType::ColInfo => {
                let len = reader.read_u16_le().await?;
                reader.skip(usize::from(len)).await?;
                return Ok(None);
            }
            TokenType::SessionState | TokenType::FedAuthInfo => {
                let len = reader.read_u32_le().await?;
                reader.skip(usize::try_from(len).unwrap_or(usize::MAX)).await?;
                return Ok(None);
            }
            TokenType::FeatureExtAck => {
                loop {
                    let feature = reader.read_u8().await?;
                    if feature == 0xFF {
                        break;
                    }
                    let len = reader.read_u32_le().await?;
                    reader.skip(usize::try_from(len).unwrap_or(usize::MAX)).await?;
                }
                return Ok(None);
            }
            TokenType::Offset => {
                reader.skip(4).await?;
                return Ok(None);
            }
        }))
    }

    async fn next_field<R>(&mut self, reader: &mut MessageReader<R>) -> Result<FieldEvent>
    where
        R: AsyncRead + Unpin,
    {
        let Some(row) = self.row.as_mut() else {
            return Err(ProtocolError::Malformed("field outside a row").into());
        };
        let column = row.next;
        let info = &self.columns[column].type_info;

        if row.nulls.as_ref().is_some_and(|n| n.is_null(column)) {
            row.next += 1;
            return Ok(FieldEvent::Field {
                column,
                value: Value::Null,
            });
        }

        if info.layout() != ValueLayout::Plp {
            let value = read_value(reader, info).await?;
            row.next += 1;
            return Ok(FieldEvent::Field { column, value });
        }

        let total = PlpLength::from_raw(reader.read_u64_le().await?);
        if total == PlpLength::Null {
            row.next += 1;
            return Ok(FieldEvent::Field {
                column,
                value: Value::Null,
            });
        }
        let first = to_usize(reader.read_u32_le().await?);
        if first == 0 {
            row.next += 1;
            return Ok(FieldEvent::Field {
                column,
                value: decode_var(info, &[])?,
            });
        }
        if total == PlpLength::Known(first as u64) && first <= MAX_CHUNK {
            let data = read_bytes(reader, first).await?;
            let next = to_usize(reader.read_u32_le().await?);
            if next == 0 {
                row.next += 1;
                return Ok(FieldEvent::Field {
                    column,
                    value: decode_var(info, &data)?,
                });
            }
            self.plp = Some(PlpCursor {
                column,
                chunk_left: next,
            });
            return Ok(FieldEvent::Chunk {
                column,
                chunk: Chunk { data, more: true },
            });
        }
        self.plp = Some(PlpCursor {
            column,
            chunk_left: first,
        });
        self.next_piece(reader).await
    }

    async fn next_piece<R>(&mut self, reader: &mut MessageReader<R>) -> Result<FieldEvent>
    where
        R: AsyncRead + Unpin,
    {
        let Some(cursor) = self.plp.as_mut() else {
            return Err(ProtocolError::Malformed("chunk outside a value").into());
        };
        let want = cursor.chunk_left.min(MAX_CHUNK);
        let data = read_bytes(reader, want).await?;
        cursor.chunk_left -= want;
        let column = cursor.column;

        let mut more = true;
        if cursor.chunk_left == 0 {
            let next = to_usize(reader.read_u32_le().await?);
            if next == 0 {
                more = false;
            } else {
                cursor.chunk_left = next;
            }
        }
        if !more {
            self.plp = None;
            if let Some(row) = self.row.as_mut() {
                row.next += 1;
            }
        }
        Ok(FieldEvent::Chunk {
            column,
            chunk: Chunk { data, more },
        })
    }
}

fn to_usize(len: u32) -> usize {
    usize::try_from(len).unwrap_or(usize::MAX)
}

async fn read_bytes<R>(reader: &mut MessageReader<R>, len: usize) -> Result<Bytes>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(len.min(1 << 20));
    reader.read_into(&mut buf, len).await?;
    Ok(buf.freeze())
}

async fn u16_body<R>(reader: &mut MessageReader<R>) -> Result<Bytes>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u16_le().await?;
    read_bytes(reader, usize::from(len)).await
}

/// Append a length-prefixed UTF-16 string (B_VARCHAR or US_VARCHAR) to `raw`.
async fn copy_varchar<R>(reader: &mut MessageReader<R>, raw: &mut BytesMut, wide: bool) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let chars = if wide {
        let n = reader.read_u16_le().await?;
        raw.put_u16_le(n);
        usize::from(n)
    } else {
        let n = reader.read_u8().await?;
        raw.put_u8(n);
        usize::from(n)
    };
    reader.read_into(raw, chars * 2).await?;
    Ok(())
}

async fn read_b_varchar<R>(reader: &mut MessageReader<R>) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    let chars = usize::from(reader.read_u8().await?);
    let raw = reader.fetch(chars * 2).await?;
    Ok(decode_utf16_lossy(&raw))
}

async fn read_type_info<R>(reader: &mut MessageReader<R>) -> Result<TypeInfo>
where
    R: AsyncRead + Unpin,
{
    let code = reader.read_u8().await?;
    let props = registry::lookup(code).ok_or(ProtocolError::UnknownType(code))?;
    let fixed = reader.fetch(TypeInfo::fixed_len(props)).await?;
    let mut info = TypeInfo::decode_fixed(code, &mut &fixed[..])?;
    if info.has_names() {
        // schema collection for xml, CLR type names for udt
        let mut raw = BytesMut::new();
        let shape: &[bool] = if info.id == tds_wire::TypeId::Udt {
            &[false, false, false, true]
        } else {
            &[false, false, true]
        };
        for &wide in shape {
            copy_varchar(reader, &mut raw, wide).await?;
        }
        info.decode_names(&mut raw.freeze())?;
    }
    Ok(info)
}

async fn read_colmetadata<R>(reader: &mut MessageReader<R>) -> Result<Vec<Column>>
where
    R: AsyncRead + Unpin,
{
    let count = reader.read_u16_le().await?;
    if count == 0xFFFF {
        return Ok(Vec::new());
    }
    let mut columns = Vec::with_capacity(usize::from(count));
    for ordinal in 0..usize::from(count) {
        let user_type = reader.read_u32_le().await?;
        let flags = ColumnFlags::from_bits_retain(reader.read_u16_le().await?);
        let type_info = read_type_info(reader).await?;
        let table_name = if type_info.props().table {
            let parts = reader.read_u8().await?;
            let mut raw = BytesMut::new();
            raw.put_u8(parts);
            for _ in 0..parts {
                copy_varchar(reader, &mut raw, true).await?;
            }
            Some(decode_table_name(&mut raw.freeze())?)
        } else {
            None
        };
        let name = read_b_varchar(reader).await?;
        columns.push(Column {
            name,
            ordinal,
            user_type,
            flags,
            type_info,
            table_name,
        });
    }
    tracing::trace!(columns = columns.len(), "column metadata");
    Ok(columns)
}

async fn read_len<R>(reader: &mut MessageReader<R>, width: u8) -> Result<u32>
where
    R: AsyncRead + Unpin,
{
    Ok(match width {
        1 => u32::from(reader.read_u8().await?),
        2 => u32::from(reader.read_u16_le().await?),
        _ => reader.read_u32_le().await?,
    })
}

/// Read one complete value, concatenating PLP chunks.
async fn read_value<R>(reader: &mut MessageReader<R>, info: &TypeInfo) -> Result<Value>
where
    R: AsyncRead + Unpin,
{
    match info.layout() {
        ValueLayout::Fixed(n) => {
            let data = reader.fetch(n).await?;
            Ok(decode_fixed(info, &data)?)
        }
        ValueLayout::Prefixed(0) => Err(TypeError::UnsupportedType(info.id as u8).into()),
        ValueLayout::Prefixed(width) => {
            let len = read_len(reader, width).await?;
            if is_null_len(width, len, info.id) {
                return Ok(Value::Null);
            }
            let data = read_bytes(reader, to_usize(len)).await?;
            Ok(decode_var(info, &data)?)
        }
        ValueLayout::TextPtr => {
            let ptr_len = usize::from(reader.read_u8().await?);
            if ptr_len == 0 {
                return Ok(Value::Null);
            }
            // text pointer and timestamp
            reader.skip(ptr_len + 8).await?;
            let len = reader.read_u32_le().await?;
            let data = read_bytes(reader, to_usize(len)).await?;
            Ok(decode_var(info, &data)?)
        }
        ValueLayout::Plp => {
            if PlpLength::from_raw(reader.read_u64_le().await?) == PlpLength::Null {
                return Ok(Value::Null);
            }
            let mut data = BytesMut::new();
            loop {
                let len = to_usize(reader.read_u32_le().await?);
                if len == 0 {
                    break;
                }
                reader.read_into(&mut data, len).await?;
            }
            Ok(decode_var(info, &data)?)
        }
    }
}

async fn read_return_value<R>(reader: &mut MessageReader<R>) -> Result<ReturnValue>
where
    R: AsyncRead + Unpin,
{
    let ordinal = reader.read_u16_le().await?;
    let name = read_b_varchar(reader).await?;
    let _status = reader.read_u8().await?;
    let _user_type = reader.read_u32_le().await?;
    let _flags = reader.read_u16_le().await?;
    let info = read_type_info(reader).await?;
    let value = read_value(reader, &info).await?;
    Ok(ReturnValue {
        ordinal,
        name,
        value,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tds_types::encode::{write_plp_chunk, write_plp_header, write_plp_terminator};
    use tds_types::{encode_colmetadata, encode_nbc_row, encode_return_value, encode_row};
    use tds_wire::{
        Collation, PACKET_HEADER_SIZE, PacketHeader, PacketStatus, PacketType, SqlType,
        token::encode_return_status,
    };

    /// Frame `body` as one or more TABULAR_RESULT packets.
    fn framed(body: &[u8], packet_size: usize) -> Vec<u8> {
        let mut out = Vec::new();
        let chunks: Vec<&[u8]> = body.chunks(packet_size - PACKET_HEADER_SIZE).collect();
        for (i, chunk) in chunks.iter().enumerate() {
            let status = if i + 1 == chunks.len() {
                PacketStatus::END_OF_MESSAGE
            } else {
                PacketStatus::empty()
            };
            #[allow(clippy::cast_possible_truncation)]
            let header = PacketHeader::new(
                PacketType::TabularResult,
                status,
                (chunk.len() + PACKET_HEADER_SIZE) as u16,
            );
            header.encode(&mut out);
            out.extend_from_slice(chunk);
        }
        out
    }

    async fn collect(body: &[u8], packet_size: usize) -> Vec<FieldEvent> {
        let wire = framed(body, packet_size);
        let mut reader = MessageReader::new(&wire[..], 1 << 17);
        reader.begin_message(PacketType::TabularResult);
        let mut stream = TokenStream::new();
        let mut events = Vec::new();
        while let Some(event) = stream.next_event(&mut reader).await.unwrap() {
            events.push(event);
        }
        events
    }

    fn columns() -> Vec<Column> {
        let c = Collation::default();
        vec![
            Column::new("id", TypeInfo::for_sql_type(SqlType::Int, c)),
            Column::new("name", TypeInfo::for_sql_type(SqlType::NVarChar(Some(20)), c)),
        ]
    }

    #[tokio::test]
    async fn test_rows_and_done() {
        let cols = columns();
        let mut body = Vec::new();
        encode_colmetadata(&mut body, &cols).unwrap();
        encode_row(&mut body, &cols, &[Value::I32(1), Value::from("a")]).unwrap();
        encode_nbc_row(&mut body, &cols, &[Value::I32(2), Value::Null]).unwrap();
        Done::new(Some(2)).encode(&mut body);

        let events = collect(&body, 512).await;
        assert!(matches!(&events[0], FieldEvent::Columns(c) if c.len() == 2));
        assert!(matches!(&events[1], FieldEvent::Field { column: 0, value: Value::I32(1) }));
        assert!(matches!(&events[2], FieldEvent::Field { column: 1, value: Value::String(s) } if s == "a"));
        assert!(matches!(events[3], FieldEvent::Row));
        assert!(matches!(&events[5], FieldEvent::Field { column: 1, value: Value::Null }));
        assert!(matches!(events[6], FieldEvent::Row));
        assert!(matches!(events[7], FieldEvent::RowCount(2)));
        assert!(matches!(&events[8], FieldEvent::Done(d) if d.is_final()));
        assert_eq!(events.len(), 9);
    }

    #[tokio::test]
    async fn test_small_max_value_is_not_chunked() {
        let cols = vec![Column::new(
            "v",
            TypeInfo::for_sql_type(SqlType::NVarChar(None), Collation::default()),
        )];
        let mut body = Vec::new();
        encode_colmetadata(&mut body, &cols).unwrap();
        encode_row(&mut body, &cols, &[Value::from("hello")]).unwrap();
        Done::new(None).encode(&mut body);

        let events = collect(&body, 4096).await;
        assert!(matches!(&events[1], FieldEvent::Field { value: Value::String(s), .. } if s == "hello"));
    }

    #[tokio::test]
    async fn test_large_max_value_is_chunked() {
        let cols = vec![Column::new(
            "v",
            TypeInfo::for_sql_type(SqlType::VarBinary(None), Collation::default()),
        )];
        let payload = vec![7u8; 20_000];
        let mut body = Vec::new();
        encode_colmetadata(&mut body, &cols).unwrap();
        body.push(TokenType::Row as u8);
        write_plp_header(&mut body, None);
        write_plp_chunk(&mut body, &payload[..15_000]);
        write_plp_chunk(&mut body, &payload[15_000..]);
        write_plp_terminator(&mut body);
        Done::new(None).encode(&mut body);

        let events = collect(&body, 4096).await;
        let mut data = Vec::new();
        let mut flags = Vec::new();
        for event in &events {
            if let FieldEvent::Chunk { column: 0, chunk } = event {
                data.extend_from_slice(&chunk.data);
                flags.push(chunk.more);
            }
        }
        assert_eq!(data, payload);
        assert_eq!(flags.iter().filter(|m| !**m).count(), 1);
        assert_eq!(flags.last(), Some(&false));
        assert!(events.iter().any(|e| matches!(e, FieldEvent::Row)));
    }

    #[tokio::test]
    async fn test_messages_env_and_return_values() {
        let c = Collation::default();
        let mut body = Vec::new();
        ServerMessage {
            kind: MessageKind::Info,
            number: 5701,
            state: 2,
            class: 0,
            message: "Changed database context to 'db'.".into(),
            server: "srv".into(),
            procedure: String::new(),
            line: 1,
        }
        .encode(&mut body)
        .unwrap();
        EnvChange::BeginTransaction(42).encode(&mut body).unwrap();
        encode_return_status(&mut body, 7);
        encode_return_value(
            &mut body,
            1,
            "@out",
            &TypeInfo::for_sql_type(SqlType::BigInt, c),
            &Value::I64(99),
        )
        .unwrap();
        Done::new(None).encode(&mut body);

        let events = collect(&body, 512).await;
        assert!(matches!(&events[0], FieldEvent::Message(m) if m.number == 5701));
        assert!(matches!(events[1], FieldEvent::EnvChange(EnvChange::BeginTransaction(42))));
        assert!(matches!(events[2], FieldEvent::ReturnStatus(7)));
        assert!(matches!(&events[3], FieldEvent::ReturnValue(rv) if rv.name == "@out" && rv.value == Value::I64(99)));
    }

    #[tokio::test]
    async fn test_skipped_tokens() {
        let mut body = vec![TokenType::TabName as u8, 2, 0, 0xAA, 0xBB];
        body.extend_from_slice(&[TokenType::FeatureExtAck as u8, 0x04, 1, 0, 0, 0, 0x01, 0xFF]);
        Done::new(None).encode(&mut body);
        let events = collect(&body, 512).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], FieldEvent::Done(_)));
    }

    #[tokio::test]
    async fn test_u16_token_longer_than_read_buffer() {
        let mut body = vec![TokenType::Sspi as u8, 0xFF, 0xFF];
        body.extend(std::iter::repeat_n(0x5A, usize::from(u16::MAX)));
        Done::new(None).encode(&mut body);

        let wire = framed(&body, 4096);
        let mut reader = MessageReader::new(&wire[..], 8192);
        reader.begin_message(PacketType::TabularResult);
        let mut stream = TokenStream::new();
        let event = stream.next_event(&mut reader).await.unwrap().unwrap();
        assert!(matches!(&event, FieldEvent::Sspi(b) if b.len() == 65_535 && b.iter().all(|&x| x == 0x5A)));
        assert!(matches!(
            stream.next_event(&mut reader).await.unwrap(),
            Some(FieldEvent::Done(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_token_is_protocol_error() {
        let wire = framed(&[0x01, 0x02], 512);
        let mut reader = MessageReader::new(&wire[..], 4096);
        reader.begin_message(PacketType::TabularResult);
        let err = TokenStream::new().next_event(&mut reader).await.unwrap_err();
        assert!(err.is_fatal());
    }
}
