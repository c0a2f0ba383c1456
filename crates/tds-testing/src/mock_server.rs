//! Scripted TDS server for end-to-end tests.
//!
//! The server speaks enough of the protocol to drive the client through a
//! whole session without a SQL Server instance:
//!
//! - PRELOGIN, answered with ENCRYPT_NOT_SUP
//! - LOGIN7, answered with database, collation and packet-size ENVCHANGEs,
//!   LOGINACK and DONE, or a login failure when credentials are scripted
//! - SqlBatch and RPC requests, answered from the scripted responses;
//!   unmatched RPCs echo their parameters back as a one-row result and
//!   output parameters as RETURNVALUE tokens
//! - TransactionManager requests with descriptor and savepoint tracking
//! - BulkLoad messages, whose rows are decoded and counted
//! - ATTENTION, acknowledged with DONE(ATTN), including while a scripted
//!   delay is pending
//!
//! ## Example
//!
//! ```rust,ignore
//! use tds_testing::mock_server::{MockResponse, MockTdsServer};
//!
//! #[tokio::test]
//! async fn test_query() {
//!     let server = MockTdsServer::builder()
//!         .with_response("select 1", MockResponse::scalar(1i32))
//!         .build()
//!         .await
//!         .unwrap();
//!
//!     let db = tds_client::Database::open(server.client_config()).await.unwrap();
//!     // ...
//! }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use tds_codec::{CodecError, Message, MessageAssembler, Packet, TdsCodec};
use tds_types::{
    Column, DecodedParam, TypeError, TypeInfo, Value, decode_column, decode_param,
    encode_colmetadata, encode_return_value, encode_row,
};
use tds_wire::rpc::BATCH_FLAG;
use tds_wire::token::encode_return_status;
use tds_wire::utf16::{read_b_varchar, read_utf16};
use tds_wire::{
    Collation, Done, DoneKind, DoneStatus, EncryptionLevel, EnvChange, Login7, LoginAck,
    MessageKind, PACKET_HEADER_SIZE, PacketHeader, PacketStatus, PacketType, ParamStatus,
    PreLogin, ProcId, ProtocolError, ServerMessage, ServerVersion, SqlType, TdsVersion, TokenType,
};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, broadcast};
use tokio_util::codec::Framed;

/// Error type for mock server operations.
#[derive(Debug, Error)]
pub enum MockServerError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Packet framing error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Malformed request body.
    #[error("wire error: {0}")]
    Wire(#[from] ProtocolError),

    /// A value could not be decoded or encoded.
    #[error("value error: {0}")]
    Type(#[from] TypeError),

    /// The client broke the expected message sequence.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Result type for mock server operations.
pub type Result<T> = std::result::Result<T, MockServerError>;

/// Handler computing a response from the request.
pub type Handler = Arc<dyn Fn(&Request) -> MockResponse + Send + Sync>;

/// A SqlBatch or RPC request as the server decoded it.
#[derive(Debug, Clone, Default)]
pub struct Request {
    /// Batch text, the `sp_executesql` statement, or the procedure name.
    pub sql: String,
    /// Whether the request arrived as an RPC.
    pub rpc: bool,
    /// User parameters; the statement and declaration list of
    /// `sp_executesql` are not included.
    pub params: Vec<DecodedParam>,
}

impl Request {
    /// Parameter by name, with or without the `@`.
    pub fn param(&self, name: &str) -> Option<&DecodedParam> {
        let name = name.trim_start_matches('@');
        self.params
            .iter()
            .find(|p| p.name.trim_start_matches('@') == name)
    }
}

/// Scripted response to a request.
#[derive(Clone)]
pub enum MockResponse {
    /// A final DONE without a row count.
    Done,

    /// One result set.
    Rows {
        /// Column definitions.
        columns: Vec<Column>,
        /// Row data.
        rows: Vec<Vec<Value>>,
    },

    /// An ERROR token.
    Error {
        /// Error number.
        number: i32,
        /// Error message.
        message: String,
        /// Severity class.
        severity: u8,
    },

    /// Rows affected count (for INSERT/UPDATE/DELETE).
    RowsAffected(u64),

    /// The request's parameters as a one-row result.
    Echo,

    /// Several responses, one after the other.
    Sequence(Vec<MockResponse>),

    /// Wait, then answer. An ATTENTION during the wait is acknowledged
    /// instead. Only honored for the top-level response.
    Delay {
        /// How long to wait.
        delay: Duration,
        /// Answer sent when the wait runs out.
        then: Box<MockResponse>,
    },

    /// Pre-encoded tokens, sent verbatim.
    Raw(Bytes),

    /// Computed from the request.
    Custom(Handler),
}

impl fmt::Debug for MockResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Done => f.write_str("Done"),
            Self::Rows { columns, rows } => f
                .debug_struct("Rows")
                .field("columns", &columns.len())
                .field("rows", &rows.len())
                .finish(),
            Self::Error {
                number, message, ..
            } => f
                .debug_struct("Error")
                .field("number", number)
                .field("message", message)
                .finish_non_exhaustive(),
            Self::RowsAffected(n) => f.debug_tuple("RowsAffected").field(n).finish(),
            Self::Echo => f.write_str("Echo"),
            Self::Sequence(items) => f.debug_tuple("Sequence").field(items).finish(),
            Self::Delay { delay, then } => f
                .debug_struct("Delay")
                .field("delay", delay)
                .field("then", then)
                .finish(),
            Self::Raw(data) => f.debug_tuple("Raw").field(&data.len()).finish(),
            Self::Custom(_) => f.debug_tuple("Custom").field(&"<fn>").finish(),
        }
    }
}

impl MockResponse {
    /// A one-column, one-row result; the column type follows the value.
    pub fn scalar(value: impl Into<Value>) -> Self {
        let value = value.into();
        let ty = value.infer_sql_type();
        Self::rows(vec![column("", ty)], vec![vec![value]])
    }

    /// A single result set.
    pub fn rows(columns: Vec<Column>, rows: Vec<Vec<Value>>) -> Self {
        Self::Rows { columns, rows }
    }

    /// A DONE carrying a row count.
    pub fn affected(count: u64) -> Self {
        Self::RowsAffected(count)
    }

    /// A severity 16 error.
    pub fn error(number: i32, message: impl Into<String>) -> Self {
        Self::Error {
            number,
            message: message.into(),
            severity: 16,
        }
    }

    /// Wait `delay` before answering with `then`.
    pub fn delay(delay: Duration, then: MockResponse) -> Self {
        Self::Delay {
            delay,
            then: Box::new(then),
        }
    }

    /// Answer computed per request.
    pub fn custom(f: impl Fn(&Request) -> MockResponse + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(f))
    }
}

/// A nullable result column of type `ty` in the default collation.
pub fn column(name: impl Into<String>, ty: SqlType) -> Column {
    Column::new(name, TypeInfo::for_sql_type(ty, Collation::default()))
}

/// A request the server received, in arrival order.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// Packet type of the message.
    pub packet_type: PacketType,
    /// RESET_CONNECTION was set on the message.
    pub reset: bool,
    /// Transaction descriptor from ALL_HEADERS; 0 where absent.
    pub descriptor: u64,
    /// Batch text, statement or procedure name; empty otherwise.
    pub sql: String,
    /// Rows of a BulkLoad message.
    pub bulk_rows: Vec<Vec<Value>>,
}

/// Configuration for the mock TDS server.
#[derive(Default)]
pub struct MockServerConfig {
    /// Responses keyed by normalized SQL text or procedure name.
    responses: HashMap<String, MockResponse>,
    /// Response for unmatched batches.
    default_batch: Option<MockResponse>,
    /// Response for unmatched RPCs.
    default_rpc: Option<MockResponse>,
    /// Accepted login, when checked.
    credentials: Option<(String, String)>,
    /// Program name in LOGINACK.
    server_name: String,
    /// Product version in PRELOGIN and LOGINACK.
    version: ServerVersion,
    /// Database reported when the login names none.
    database: String,
}

impl MockServerConfig {
    fn find(&self, request: &Request) -> MockResponse {
        if let Some(response) = self.responses.get(&normalize(&request.sql)) {
            return response.clone();
        }
        let fallback = if request.rpc {
            &self.default_rpc
        } else {
            &self.default_batch
        };
        fallback.clone().unwrap_or(if request.rpc {
            MockResponse::Echo
        } else {
            MockResponse::Done
        })
    }
}

/// Lower-case with runs of whitespace collapsed.
fn normalize(sql: &str) -> String {
    sql.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Builder for `MockTdsServer`.
pub struct MockServerBuilder {
    config: MockServerConfig,
}

impl MockServerBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: MockServerConfig {
                server_name: "Microsoft SQL Server".into(),
                version: ServerVersion::new(16, 0, 1000),
                database: "master".into(),
                ..MockServerConfig::default()
            },
        }
    }

    /// Answer `sql` (a batch text, statement or procedure name) with
    /// `response`. Matching ignores case and whitespace runs.
    pub fn with_response(mut self, sql: impl AsRef<str>, response: MockResponse) -> Self {
        self.config.responses.insert(normalize(sql.as_ref()), response);
        self
    }

    /// Response for batches no scripted response matches.
    pub fn with_default_response(mut self, response: MockResponse) -> Self {
        self.config.default_batch = Some(response);
        self
    }

    /// Response for RPCs no scripted response matches.
    pub fn with_default_rpc_response(mut self, response: MockResponse) -> Self {
        self.config.default_rpc = Some(response);
        self
    }

    /// Only accept this SQL login.
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.credentials = Some((user.into(), password.into()));
        self
    }

    /// Set the program name reported in LOGINACK.
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.config.server_name = name.into();
        self
    }

    /// Set the default database.
    pub fn with_database(mut self, db: impl Into<String>) -> Self {
        self.config.database = db.into();
        self
    }

    /// Build and start the mock server.
    pub async fn build(self) -> Result<MockTdsServer> {
        MockTdsServer::start(self.config).await
    }
}

impl Default for MockServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// State shared by the accept loop and every connection.
struct Shared {
    config: MockServerConfig,
    connections: AtomicUsize,
    attentions: AtomicUsize,
    next_descriptor: AtomicU64,
    requests: Mutex<Vec<RecordedRequest>>,
}

/// A scripted TDS server listening on 127.0.0.1.
///
/// Stops accepting when dropped.
pub struct MockTdsServer {
    addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    shared: Arc<Shared>,
}

impl MockTdsServer {
    /// Create a new builder for the mock server.
    pub fn builder() -> MockServerBuilder {
        MockServerBuilder::new()
    }

    /// Start the mock server on an available port.
    pub async fn start(config: MockServerConfig) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, _) = broadcast::channel(1);
        let shared = Arc::new(Shared {
            config,
            connections: AtomicUsize::new(0),
            attentions: AtomicUsize::new(0),
            next_descriptor: AtomicU64::new(1),
            requests: Mutex::new(Vec::new()),
        });

        let mut shutdown_rx = shutdown_tx.subscribe();
        let accept_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => match result {
                        Ok((stream, peer)) => {
                            let shared = Arc::clone(&accept_shared);
                            tracing::debug!(%peer, "mock server accepted connection");
                            tokio::spawn(async move {
                                shared.connections.fetch_add(1, Ordering::SeqCst);
                                if let Err(e) = handle_connection(stream, &shared).await {
                                    tracing::debug!(error = %e, "mock connection ended");
                                }
                                shared.connections.fetch_sub(1, Ordering::SeqCst);
                            });
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "mock server accept failed");
                            break;
                        }
                    },
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        Ok(Self {
            addr,
            shutdown_tx,
            shared,
        })
    }

    /// Get the server's listening address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the host string for connection configuration.
    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    /// Get the port number.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Client configuration pointing at this server: plain text, and the
    /// scripted login when there is one.
    pub fn client_config(&self) -> tds_client::Config {
        let (user, password) = self
            .shared
            .config
            .credentials
            .clone()
            .unwrap_or_else(|| ("sa".into(), "secret".into()));
        tds_client::Config::new()
            .host(self.host())
            .port(self.port())
            .credentials(user, password)
            .tls_mode(tds_client::TlsMode::Disable)
            .dial_timeout(Duration::from_secs(5))
    }

    /// Connections currently open.
    pub fn connection_count(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }

    /// ATTENTION messages received so far.
    pub fn attention_count(&self) -> usize {
        self.shared.attentions.load(Ordering::SeqCst)
    }

    /// Requests received so far over all connections.
    pub async fn requests(&self) -> Vec<RecordedRequest> {
        self.shared.requests.lock().await.clone()
    }

    /// Stop the server.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

impl Drop for MockTdsServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Server side of one client connection.
struct ServerConnection {
    framed: Framed<TcpStream, TdsCodec>,
    assembler: MessageAssembler,
    packet_size: usize,
    transaction: u64,
    savepoints: Vec<String>,
}

impl ServerConnection {
    fn new(stream: TcpStream) -> Self {
        Self {
            framed: Framed::new(stream, TdsCodec::new()),
            assembler: MessageAssembler::new(),
            packet_size: tds_wire::DEFAULT_PACKET_SIZE,
            transaction: 0,
            savepoints: Vec::new(),
        }
    }

    /// Next complete message, `None` once the client hung up.
    async fn read_message(&mut self) -> Result<Option<Message>> {
        while let Some(packet) = self.framed.next().await {
            if let Some(message) = self.assembler.push(packet?) {
                return Ok(Some(message));
            }
        }
        Ok(None)
    }

    /// Send a tabular response split into packets of the negotiated size.
    async fn send(&mut self, payload: &[u8]) -> Result<()> {
        let room = self.packet_size - PACKET_HEADER_SIZE;
        let mut chunks: Vec<&[u8]> = payload.chunks(room).collect();
        if chunks.is_empty() {
            chunks.push(&[]);
        }
        let last = chunks.len() - 1;
        let mut packet_id = 0u8;
        for (i, chunk) in chunks.into_iter().enumerate() {
            packet_id = packet_id.wrapping_add(1);
            let status = if i == last {
                PacketStatus::END_OF_MESSAGE
            } else {
                PacketStatus::empty()
            };
            let header =
                PacketHeader::new(PacketType::TabularResult, status, 0).with_packet_id(packet_id);
            self.framed
                .feed(Packet::new(header, BytesMut::from(chunk)))
                .await?;
        }
        self.framed.flush().await?;
        Ok(())
    }

    fn done_status(&self) -> DoneStatus {
        if self.transaction == 0 {
            DoneStatus::empty()
        } else {
            DoneStatus::IN_XACT
        }
    }
}

/// Handle a single client connection.
async fn handle_connection(stream: TcpStream, shared: &Shared) -> Result<()> {
    stream.set_nodelay(true)?;
    let mut conn = ServerConnection::new(stream);
    let config = &shared.config;

    let prelogin = expect_message(&mut conn, PacketType::PreLogin).await?;
    let request = PreLogin::decode(&prelogin.payload)?;
    tracing::trace!(encryption = ?request.encryption, "mock prelogin");
    let reply = PreLogin::new(config.version, EncryptionLevel::NotSupported);
    conn.send(&reply.encode()).await?;

    let login = expect_message(&mut conn, PacketType::Login7).await?;
    let login = Login7::decode(&login.payload)?;
    if !send_login_response(&mut conn, config, &login).await? {
        return Ok(());
    }

    while let Some(message) = conn.read_message().await? {
        let reset = message.status.contains(PacketStatus::RESET_CONNECTION);
        let mut out = BytesMut::new();
        if reset {
            EnvChange::ResetConnectionAck.encode(&mut out)?;
        }
        match message.packet_type {
            PacketType::SqlBatch | PacketType::Rpc => {
                let rpc = message.packet_type == PacketType::Rpc;
                let (descriptor, request, outputs) = if rpc {
                    decode_rpc(&message.payload)?
                } else {
                    let (descriptor, sql) = decode_sql_batch(&message.payload)?;
                    let request = Request {
                        sql,
                        ..Request::default()
                    };
                    (descriptor, request, Vec::new())
                };
                record(shared, &message, descriptor, &request.sql, Vec::new()).await;

                let Some(response) = await_delays(&mut conn, shared, config.find(&request)).await?
                else {
                    continue;
                };

                let status = conn.done_status();
                if rpc {
                    encode_response(&mut out, &response, &request, DoneKind::InProc, status, true)?;
                    encode_return_status(&mut out, 0);
                    for (ordinal, param) in outputs.iter().enumerate() {
                        let ordinal = u16::try_from(ordinal).unwrap_or(u16::MAX);
                        encode_return_value(
                            &mut out,
                            ordinal,
                            &param.name,
                            &param.type_info,
                            &param.value,
                        )?;
                    }
                    encode_done(&mut out, DoneKind::Proc, status, None);
                } else {
                    encode_response(&mut out, &response, &request, DoneKind::Done, status, false)?;
                }
                conn.send(&out).await?;
            }
            PacketType::TransactionManager => {
                let descriptor = transaction_request(&mut conn, shared, &message.payload, &mut out)?;
                record(shared, &message, descriptor, "", Vec::new()).await;
                conn.send(&out).await?;
            }
            PacketType::BulkLoad => {
                let rows = decode_bulk_rows(&message.payload)?;
                let count = rows.len() as u64;
                record(shared, &message, 0, "", rows).await;
                encode_done(&mut out, DoneKind::Done, conn.done_status(), Some(count));
                conn.send(&out).await?;
            }
            PacketType::Attention => {
                // nothing was running; acknowledge anyway
                shared.attentions.fetch_add(1, Ordering::SeqCst);
                send_attention_ack(&mut conn).await?;
            }
            other => {
                tracing::debug!(packet_type = ?other, "unexpected packet type");
            }
        }
    }

    Ok(())
}

/// Sit out scripted delays. Returns `None` when an ATTENTION cut the
/// wait short and has been acknowledged.
async fn await_delays(
    conn: &mut ServerConnection,
    shared: &Shared,
    mut response: MockResponse,
) -> Result<Option<MockResponse>> {
    while let MockResponse::Delay { delay, then } = response {
        match tokio::time::timeout(delay, conn.read_message()).await {
            Err(_) => response = *then,
            Ok(Err(err)) => return Err(err),
            Ok(Ok(Some(next))) if next.packet_type == PacketType::Attention => {
                shared.attentions.fetch_add(1, Ordering::SeqCst);
                tracing::debug!("mock request cancelled by attention");
                send_attention_ack(conn).await?;
                return Ok(None);
            }
            Ok(Ok(Some(next))) => {
                return Err(MockServerError::Protocol(format!(
                    "{:?} sent while a request was running",
                    next.packet_type
                )));
            }
            Ok(Ok(None)) => {
                return Err(MockServerError::Protocol(
                    "client hung up during a delay".into(),
                ));
            }
        }
    }
    Ok(Some(response))
}

async fn expect_message(conn: &mut ServerConnection, expected: PacketType) -> Result<Message> {
    match conn.read_message().await? {
        Some(message) if message.packet_type == expected => Ok(message),
        Some(message) => Err(MockServerError::Protocol(format!(
            "expected {expected:?}, got {:?}",
            message.packet_type
        ))),
        None => Err(MockServerError::Protocol(format!(
            "client hung up before {expected:?}"
        ))),
    }
}

async fn record(
    shared: &Shared,
    message: &Message,
    descriptor: u64,
    sql: &str,
    bulk_rows: Vec<Vec<Value>>,
) {
    shared.requests.lock().await.push(RecordedRequest {
        packet_type: message.packet_type,
        reset: message.status.contains(PacketStatus::RESET_CONNECTION),
        descriptor,
        sql: sql.to_owned(),
        bulk_rows,
    });
}

/// Answer LOGIN7. Returns `false` when the login was refused.
async fn send_login_response(
    conn: &mut ServerConnection,
    config: &MockServerConfig,
    login: &Login7,
) -> Result<bool> {
    let mut out = BytesMut::new();
    if let Some((user, password)) = &config.credentials {
        if login.username != *user || login.password != *password {
            encode_message(
                &mut out,
                MessageKind::Error,
                18456,
                14,
                &format!("Login failed for user '{}'.", login.username),
                &config.server_name,
            )?;
            encode_done(&mut out, DoneKind::Done, DoneStatus::ERROR, None);
            conn.send(&out).await?;
            return Ok(false);
        }
    }

    let database = if login.database.is_empty() {
        config.database.clone()
    } else {
        login.database.clone()
    };
    let packet_size = login.packet_size.clamp(512, 32767);

    EnvChange::Database {
        new: database.clone(),
        old: "master".into(),
    }
    .encode(&mut out)?;
    encode_message(
        &mut out,
        MessageKind::Info,
        5701,
        0,
        &format!("Changed database context to '{database}'."),
        &config.server_name,
    )?;
    EnvChange::SqlCollation(Some(Collation::default())).encode(&mut out)?;
    EnvChange::PacketSize(packet_size).encode(&mut out)?;
    LoginAck {
        interface: 1,
        tds_version: TdsVersion::V7_4,
        prog_name: config.server_name.clone(),
        version: config.version,
    }
    .encode(&mut out)?;
    encode_done(&mut out, DoneKind::Done, DoneStatus::empty(), None);
    conn.send(&out).await?;

    conn.packet_size = usize::try_from(packet_size).unwrap_or(tds_wire::DEFAULT_PACKET_SIZE);
    tracing::debug!(user = %login.username, %database, packet_size, "mock login accepted");
    Ok(true)
}

fn encode_done(dst: &mut BytesMut, kind: DoneKind, status: DoneStatus, rows: Option<u64>) {
    let mut done = Done::new(rows);
    done.kind = kind;
    done.status |= status;
    done.encode(dst);
}

fn encode_message(
    dst: &mut BytesMut,
    kind: MessageKind,
    number: i32,
    class: u8,
    message: &str,
    server: &str,
) -> Result<()> {
    ServerMessage {
        kind,
        number,
        state: 1,
        class,
        message: message.to_owned(),
        server: server.to_owned(),
        procedure: String::new(),
        line: 1,
    }
    .encode(dst)?;
    Ok(())
}

/// Encode `response`; every DONE but the last carries MORE unless `more`
/// asks for it on the last one too.
fn encode_response(
    dst: &mut BytesMut,
    response: &MockResponse,
    request: &Request,
    kind: DoneKind,
    status: DoneStatus,
    more: bool,
) -> Result<()> {
    let more_bit = if more {
        DoneStatus::MORE
    } else {
        DoneStatus::empty()
    };
    match response {
        MockResponse::Done => encode_done(dst, kind, status | more_bit, None),
        MockResponse::Rows { columns, rows } => {
            encode_colmetadata(dst, columns)?;
            for row in rows {
                encode_row(dst, columns, row)?;
            }
            encode_done(dst, kind, status | more_bit, Some(rows.len() as u64));
        }
        MockResponse::Error {
            number,
            message,
            severity,
        } => {
            encode_message(dst, MessageKind::Error, *number, *severity, message, "mock")?;
            encode_done(dst, kind, status | more_bit | DoneStatus::ERROR, None);
        }
        MockResponse::RowsAffected(count) => {
            encode_done(dst, kind, status | more_bit, Some(*count));
        }
        MockResponse::Echo => {
            let echo = echo_rows(request);
            encode_response(dst, &echo, request, kind, status, more)?;
        }
        MockResponse::Sequence(items) => {
            let Some(last) = items.len().checked_sub(1) else {
                encode_done(dst, kind, status | more_bit, None);
                return Ok(());
            };
            for (i, item) in items.iter().enumerate() {
                encode_response(dst, item, request, kind, status, more || i < last)?;
            }
        }
        MockResponse::Delay { then, .. } => {
            encode_response(dst, then, request, kind, status, more)?;
        }
        MockResponse::Raw(data) => dst.put_slice(data),
        MockResponse::Custom(handler) => {
            encode_response(dst, &handler(request), request, kind, status, more)?;
        }
    }
    Ok(())
}

/// The request's parameters as one row, named after the parameters.
fn echo_rows(request: &Request) -> MockResponse {
    if request.params.is_empty() {
        return MockResponse::Done;
    }
    let columns = request
        .params
        .iter()
        .map(|p| Column::new(p.name.trim_start_matches('@'), p.type_info.clone()))
        .collect();
    let row = request.params.iter().map(|p| p.value.clone()).collect();
    MockResponse::rows(columns, vec![row])
}

/// Skip ALL_HEADERS, returning the transaction descriptor it carried.
fn read_all_headers(src: &mut &[u8]) -> Result<u64> {
    if src.remaining() < 4 {
        return Err(ProtocolError::UnexpectedEof.into());
    }
    let total = src.get_u32_le() as usize;
    if total < 4 || src.remaining() < total - 4 {
        return Err(MockServerError::Protocol(format!("ALL_HEADERS length {total}")));
    }
    let mut headers = &src[..total - 4];
    src.advance(total - 4);

    let mut descriptor = 0;
    while headers.remaining() >= 6 {
        let len = headers.get_u32_le() as usize;
        let kind = headers.get_u16_le();
        let body_len = len.saturating_sub(6).min(headers.remaining());
        if kind == 0x0002 && body_len >= 8 {
            descriptor = (&headers[..8]).get_u64_le();
        }
        headers.advance(body_len);
    }
    Ok(descriptor)
}

/// Decode a SqlBatch body: ALL_HEADERS, then UTF-16LE text.
fn decode_sql_batch(payload: &[u8]) -> Result<(u64, String)> {
    let mut src = payload;
    let descriptor = read_all_headers(&mut src)?;
    if src.len() % 2 != 0 {
        return Err(MockServerError::Protocol(
            "odd SQL text length".to_string(),
        ));
    }
    let chars = src.len() / 2;
    let sql = read_utf16(&mut src, chars)?;
    Ok((descriptor, sql))
}

/// Decode an RPC body into the request and its output parameters.
fn decode_rpc(payload: &[u8]) -> Result<(u64, Request, Vec<DecodedParam>)> {
    let mut src = payload;
    let descriptor = read_all_headers(&mut src)?;
    if src.remaining() < 2 {
        return Err(ProtocolError::UnexpectedEof.into());
    }
    let name_len = src.get_u16_le();
    let proc_id = if name_len == 0xFFFF {
        if src.remaining() < 2 {
            return Err(ProtocolError::UnexpectedEof.into());
        }
        Some(src.get_u16_le())
    } else {
        None
    };
    let name = match proc_id {
        Some(_) => String::new(),
        None => read_utf16(&mut src, usize::from(name_len))?,
    };
    if src.remaining() < 2 {
        return Err(ProtocolError::UnexpectedEof.into());
    }
    let _options = src.get_u16_le();

    let mut params = Vec::new();
    while src.has_remaining() && src[0] != BATCH_FLAG {
        params.push(decode_param(&mut src)?);
    }

    let (sql, params) = match proc_id {
        Some(id) if id == ProcId::ExecuteSql as u16 => {
            let mut params = params.into_iter();
            let statement = match params.next().map(|p| p.value) {
                Some(Value::String(sql)) => sql,
                other => {
                    return Err(MockServerError::Protocol(format!(
                        "sp_executesql statement was {other:?}"
                    )));
                }
            };
            // declaration list
            params.next();
            (statement, params.collect())
        }
        Some(id) => (format!("proc#{id}"), params),
        None => (name, params),
    };
    let outputs = params
        .iter()
        .filter(|p: &&DecodedParam| p.status.contains(ParamStatus::BY_REF))
        .cloned()
        .collect();
    tracing::trace!(%sql, params = params.len(), "mock rpc");
    Ok((
        descriptor,
        Request {
            sql,
            rpc: true,
            params,
        },
        outputs,
    ))
}

const TM_BEGIN: u16 = 5;
const TM_COMMIT: u16 = 7;
const TM_ROLLBACK: u16 = 8;
const TM_SAVE: u16 = 9;

/// Apply a TransactionManager request to the connection and encode the
/// answer into `out`. Returns the descriptor the client sent.
fn transaction_request(
    conn: &mut ServerConnection,
    shared: &Shared,
    payload: &[u8],
    out: &mut BytesMut,
) -> Result<u64> {
    let mut src = payload;
    let descriptor = read_all_headers(&mut src)?;
    if src.remaining() < 2 {
        return Err(ProtocolError::UnexpectedEof.into());
    }
    let kind = src.get_u16_le();
    if descriptor != conn.transaction {
        encode_message(
            out,
            MessageKind::Error,
            3910,
            16,
            "Transaction context in use by another session.",
            "mock",
        )?;
        encode_done(out, DoneKind::Done, DoneStatus::ERROR, None);
        return Ok(descriptor);
    }

    let refuse = |out: &mut BytesMut, number: i32, message: String| -> Result<()> {
        encode_message(out, MessageKind::Error, number, 16, &message, "mock")?;
        encode_done(out, DoneKind::Done, DoneStatus::ERROR, None);
        Ok(())
    };

    match kind {
        TM_BEGIN => {
            if src.remaining() < 1 {
                return Err(ProtocolError::UnexpectedEof.into());
            }
            let isolation = src.get_u8();
            let id = shared.next_descriptor.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(id, isolation, "mock transaction started");
            conn.transaction = id;
            conn.savepoints.clear();
            EnvChange::BeginTransaction(id).encode(out)?;
            encode_done(out, DoneKind::Done, DoneStatus::IN_XACT, None);
        }
        TM_COMMIT if conn.transaction == 0 => refuse(
            out,
            3902,
            "The COMMIT TRANSACTION request has no corresponding BEGIN TRANSACTION.".into(),
        )?,
        TM_COMMIT => {
            conn.transaction = 0;
            conn.savepoints.clear();
            EnvChange::CommitTransaction.encode(out)?;
            encode_done(out, DoneKind::Done, DoneStatus::empty(), None);
        }
        TM_ROLLBACK => {
            let name = read_b_varchar(&mut src)?;
            if conn.transaction == 0 {
                refuse(
                    out,
                    3903,
                    "The ROLLBACK TRANSACTION request has no corresponding BEGIN TRANSACTION."
                        .into(),
                )?;
            } else if name.is_empty() {
                conn.transaction = 0;
                conn.savepoints.clear();
                EnvChange::RollbackTransaction.encode(out)?;
                encode_done(out, DoneKind::Done, DoneStatus::empty(), None);
            } else if let Some(at) = conn.savepoints.iter().rposition(|s| *s == name) {
                conn.savepoints.truncate(at + 1);
                encode_done(out, DoneKind::Done, DoneStatus::IN_XACT, None);
            } else {
                refuse(
                    out,
                    6401,
                    format!("Cannot roll back {name}. No transaction or savepoint of that name was found."),
                )?;
            }
        }
        TM_SAVE => {
            let name = read_b_varchar(&mut src)?;
            if conn.transaction == 0 {
                refuse(
                    out,
                    628,
                    "Cannot issue SAVE TRANSACTION when there is no active transaction.".into(),
                )?;
            } else {
                conn.savepoints.push(name);
                encode_done(out, DoneKind::Done, DoneStatus::IN_XACT, None);
            }
        }
        other => {
            return Err(MockServerError::Protocol(format!(
                "unknown transaction request {other}"
            )));
        }
    }
    Ok(descriptor)
}

/// Decode a BulkLoad body: COLMETADATA, ROW tokens, DONE.
fn decode_bulk_rows(payload: &[u8]) -> Result<Vec<Vec<Value>>> {
    let mut src = payload;
    if src.remaining() < 3 || src.get_u8() != TokenType::ColMetaData as u8 {
        return Err(MockServerError::Protocol(
            "bulk load must open with COLMETADATA".into(),
        ));
    }
    let count = usize::from(src.get_u16_le());
    let columns = (0..count)
        .map(|i| Column::decode(&mut src, i))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut rows = Vec::new();
    loop {
        if !src.has_remaining() {
            return Err(ProtocolError::UnexpectedEof.into());
        }
        match TokenType::from_u8(src.get_u8())? {
            TokenType::Row => {
                let row = columns
                    .iter()
                    .map(|c| decode_column(&c.type_info, &mut src))
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                rows.push(row);
            }
            TokenType::Done => break,
            other => {
                return Err(MockServerError::Protocol(format!(
                    "unexpected {other:?} in bulk load"
                )));
            }
        }
    }
    tracing::debug!(columns = count, rows = rows.len(), "mock bulk load");
    Ok(rows)
}

/// Send attention acknowledgment.
async fn send_attention_ack(conn: &mut ServerConnection) -> Result<()> {
    let mut buf = BytesMut::new();
    encode_done(&mut buf, DoneKind::Done, DoneStatus::ATTN, None);
    conn.send(&buf).await
}
