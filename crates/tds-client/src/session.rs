//! One logged-in connection to a server.
//!
//! A [`Session`] owns the packet connection and the token stream and moves
//! through [`SessionState`] as requests are sent and responses consumed.
//! It is used by one caller at a time; the pool hands it out.

use std::time::Duration;

use bytes::BytesMut;
use tds_auth::{AuthProvider, Challenge, SqlAuthenticator};
use tds_codec::{Interrupt, MessageReader, PacketConnection};
use tds_tls::{EncryptionScope, TlsConnector, TlsError, TlsMode};
use tds_wire::{
    Collation, DoneStatus, EnvChange, Login7, PacketType, PreLogin, RpcRequest, ServerMessage,
    ServerVersion, TdsVersion, TokenType, TransactionRequest, encode_sql_batch,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::stream::{FieldEvent, TokenStream};
use crate::transport::Transport;
use crate::upload::{StreamedRpc, UploadError};

/// Statements run after login so every session starts from the same settings.
pub const WARMUP_BATCH: &str = "SET TEXTSIZE 2147483647; SET XACT_ABORT ON; SET ANSI_NULLS ON;";

/// Client version advertised in PRELOGIN.
const CLIENT_VERSION: ServerVersion = ServerVersion::new(1, 0, 0);

/// Bound on draining the response to an ATTENTION.
const ATTENTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Bytes of a DONE token including its type byte.
const DONE_TOKEN_LEN: usize = 13;

/// Where a session is in its request cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Closed, or broken by a fatal error.
    Disconnected,
    /// PRELOGIN exchange in progress.
    PreLogin,
    /// LOGIN7 exchange in progress.
    Login,
    /// Idle and able to accept a request.
    Ready,
    /// Request sent; no result set seen yet.
    Query,
    /// Rows of a result set are being read.
    InResult,
    /// A result set ended and the response continues.
    ResultDone,
}

impl SessionState {
    /// Whether a response is being read.
    #[must_use]
    pub fn is_busy(self) -> bool {
        matches!(self, Self::Query | Self::InResult | Self::ResultDone)
    }
}

/// A logged-in TDS session.
#[derive(Debug)]
pub struct Session {
    conn: PacketConnection<Transport>,
    stream: TokenStream,
    state: SessionState,
    transaction_id: u64,
    database: Option<String>,
    collation: Collation,
    server_version: ServerVersion,
    tds_version: TdsVersion,
    reset_pending: bool,
    routing: Option<(String, u16)>,
    encrypted: bool,
}

impl Session {
    /// Dial, negotiate encryption, log in and run the warm-up batch.
    ///
    /// The whole sequence is bounded by `config.dial_timeout`. Routing
    /// redirects are followed up to `config.max_redirects` times.
    pub async fn connect(config: &Config) -> Result<Self> {
        tokio::time::timeout(config.dial_timeout, Self::connect_inner(config))
            .await
            .map_err(|_| Error::Timeout)?
    }

    async fn connect_inner(config: &Config) -> Result<Self> {
        let mut host = config.host.clone();
        let mut port = config.port;
        if port == 0 {
            let instance = config.instance.as_deref().unwrap_or("MSSQLSERVER");
            port = crate::ssrp::resolve_port(&host, instance, config.dial_timeout).await?;
        }

        let mut redirects = 0;
        loop {
            let mut session = Self::login(config, &host, port).await?;
            match session.routing.take() {
                Some((next_host, next_port)) if redirects < config.max_redirects => {
                    info!(host = %next_host, port = next_port, "server routed connection");
                    redirects += 1;
                    host = next_host;
                    port = next_port;
                }
                Some(_) => {
                    return Err(Error::Connection(format!(
                        "more than {} routing redirects",
                        config.max_redirects
                    )));
                }
                None => {
                    session.execute(WARMUP_BATCH).await?;
                    info!(
                        host = %host,
                        port,
                        server_version = %session.server_version,
                        tds_version = %session.tds_version,
                        encrypted = session.is_encrypted(),
                        "connection established"
                    );
                    return Ok(session);
                }
            }
        }
    }

    async fn login(config: &Config, host: &str, port: u16) -> Result<Self> {
        debug!(host, port, "dialing");
        let tcp = TcpStream::connect((host, port))
            .await
            .map_err(|e| Error::Connection(format!("dial {host}:{port}: {e}")))?;
        tcp.set_nodelay(true)?;

        let auth = SqlAuthenticator::new(config.login_credentials());
        let login = build_login(config, host, &auth);
        let body = login.encode()?;
        let packet_size = config.packet_bytes();

        let transport = if config.tls_mode.is_tls_first() {
            let connector = TlsConnector::new(config.tls.clone().with_tds8_alpn())?;
            let tls = connector.connect(tcp, host).await?;
            let mut transport = Transport::Tls(Box::new(tls));
            exchange_prelogin(&mut transport, config).await?;
            send_login(&mut transport, &body, packet_size).await?;
            transport
        } else {
            let mut tcp = tcp;
            let server = exchange_prelogin(&mut tcp, config).await?;
            let scope = config
                .tls_mode
                .negotiate(server.encryption)
                .map_err(encryption_error)?;
            debug!(?scope, server = ?server.encryption, "encryption negotiated");
            match scope {
                EncryptionScope::None => {
                    send_login(&mut tcp, &body, packet_size).await?;
                    Transport::Tcp(tcp)
                }
                EncryptionScope::Session => {
                    let connector = TlsConnector::new(config.tls.clone())?;
                    let tls = connector.connect_prelogin(tcp, host, packet_size).await?;
                    let mut transport = Transport::PreloginTls(Box::new(tls));
                    send_login(&mut transport, &body, packet_size).await?;
                    transport
                }
                EncryptionScope::LoginOnly => {
                    let connector = TlsConnector::new(config.tls.clone())?;
                    let mut tls = connector.connect_prelogin(tcp, host, packet_size).await?;
                    send_login(&mut tls, &body, packet_size).await?;
                    // the rest of the session is plain text
                    let (wrapper, _) = tls.into_inner();
                    Transport::Tcp(wrapper.into_inner())
                }
            }
        };

        let encrypted = transport.is_encrypted();
        let mut session = Self {
            conn: PacketConnection::with_packet_size(transport, packet_size),
            stream: TokenStream::new(),
            state: SessionState::Login,
            transaction_id: 0,
            database: config.database.clone(),
            collation: Collation::default(),
            server_version: ServerVersion::default(),
            tds_version: login.tds_version,
            reset_pending: false,
            routing: None,
            encrypted,
        };
        session.read_login_response(&auth).await?;
        Ok(session)
    }

    async fn read_login_response(&mut self, auth: &SqlAuthenticator) -> Result<()> {
        let mut acknowledged = false;
        let mut errors = Vec::new();
        loop {
            self.begin_response();
            let mut challenge = None;
            while let Some(event) = self.stream.next_event(self.conn.reader()).await? {
                match event {
                    FieldEvent::LoginAck(ack) => {
                        debug!(program = %ack.prog_name, version = %ack.version, "login acknowledged");
                        self.server_version = ack.version;
                        self.tds_version = ack.tds_version;
                        acknowledged = true;
                    }
                    FieldEvent::EnvChange(change) => self.apply_env_change(change),
                    FieldEvent::Message(msg) if msg.is_error() => errors.push(msg),
                    FieldEvent::Message(msg) => debug!(number = msg.number, "{}", msg.message),
                    FieldEvent::Sspi(data) => challenge = Some(Challenge::decode(&data)?),
                    _ => {}
                }
            }
            let Some(challenge) = challenge else {
                break;
            };
            let response = auth.respond(&challenge)?;
            self.conn
                .send_message(PacketType::Sspi, false, &response)
                .await?;
        }

        if !errors.is_empty() {
            self.state = SessionState::Disconnected;
            return Err(Error::Server(errors));
        }
        if !acknowledged && self.routing.is_none() {
            self.state = SessionState::Disconnected;
            return Err(Error::Connection("login was not acknowledged".into()));
        }
        self.state = SessionState::Ready;
        Ok(())
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Descriptor of the open transaction, 0 outside one.
    #[must_use]
    pub fn transaction_id(&self) -> u64 {
        self.transaction_id
    }

    /// Current database as last reported by the server.
    #[must_use]
    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    /// Default collation for `varchar` parameters.
    #[must_use]
    pub fn collation(&self) -> Collation {
        self.collation
    }

    /// Server product version from LOGINACK.
    #[must_use]
    pub fn server_version(&self) -> ServerVersion {
        self.server_version
    }

    /// Negotiated protocol version.
    #[must_use]
    pub fn tds_version(&self) -> TdsVersion {
        self.tds_version
    }

    /// Server process id of this session.
    #[must_use]
    pub fn spid(&mut self) -> u16 {
        self.conn.reader().spid()
    }

    /// Negotiated packet size.
    #[must_use]
    pub fn packet_size(&self) -> usize {
        self.conn.packet_size()
    }

    /// Whether session traffic is encrypted.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    /// Whether the session can be handed to another caller.
    #[must_use]
    pub fn is_reusable(&self) -> bool {
        self.state == SessionState::Ready && self.transaction_id == 0
    }

    /// Columns of the current result set.
    #[must_use]
    pub fn columns(&self) -> &std::sync::Arc<[tds_types::Column]> {
        self.stream.columns()
    }

    /// Set RESET_CONNECTION on the next request.
    pub fn reset_connection(&mut self) {
        self.reset_pending = true;
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state {
            SessionState::Ready => Ok(()),
            SessionState::Disconnected => Err(Error::Connection("session is closed".into())),
            other => Err(Error::Connection(format!(
                "request sent while session is {other:?}"
            ))),
        }
    }

    fn begin_response(&mut self) {
        self.stream.reset();
        self.conn.begin_response();
    }

    async fn send(&mut self, packet_type: PacketType, body: &[u8], interrupt: Interrupt) -> Result<()> {
        self.ensure_ready()?;
        let reset = std::mem::take(&mut self.reset_pending);
        trace!(?packet_type, len = body.len(), reset, "sending request");
        if let Err(e) = self.conn.send_message(packet_type, reset, body).await {
            self.state = SessionState::Disconnected;
            return Err(e.into());
        }
        self.conn.set_interrupt(interrupt);
        self.begin_response();
        self.state = SessionState::Query;
        Ok(())
    }

    /// Send a SQL batch.
    pub async fn send_batch(&mut self, sql: &str, interrupt: Interrupt) -> Result<()> {
        debug!(len = sql.len(), "sql batch");
        let body = encode_sql_batch(sql, self.transaction_id);
        self.send(PacketType::SqlBatch, &body, interrupt).await
    }

    /// Send an RPC request.
    pub async fn send_rpc(&mut self, rpc: &RpcRequest, interrupt: Interrupt) -> Result<()> {
        debug!(target = ?rpc.target(), "rpc");
        let body = rpc.encode(self.transaction_id)?;
        self.send(PacketType::Rpc, &body, interrupt).await
    }

    /// Send an RPC whose streamed parameters are read while it is written.
    ///
    /// When a parameter's reader fails the partial message is withdrawn
    /// with IGNORE_EVENT, the error is returned and the session stays
    /// Ready.
    pub async fn send_streamed_rpc(
        &mut self,
        request: StreamedRpc,
        interrupt: Interrupt,
    ) -> Result<()> {
        self.ensure_ready()?;
        debug!(target = ?request.target(), streams = request.streamed_params(), "streamed rpc");
        let reset = std::mem::take(&mut self.reset_pending);
        let descriptor = self.transaction_id;
        let writer = self.conn.writer();
        writer.begin_message(PacketType::Rpc, reset);
        match request.write(writer, descriptor).await {
            Ok(()) => {}
            Err(UploadError::Source(err)) => {
                if let Err(e) = self.conn.writer().abandon_message().await {
                    self.state = SessionState::Disconnected;
                    return Err(e.into());
                }
                warn!(error = %err, "streamed request withdrawn");
                self.reset_pending = reset;
                return Err(err);
            }
            Err(UploadError::Transport(e)) => {
                self.state = SessionState::Disconnected;
                return Err(e.into());
            }
        }
        self.conn.set_interrupt(interrupt);
        self.begin_response();
        self.state = SessionState::Query;
        Ok(())
    }

    /// Send a TransactionManager request.
    pub async fn send_transaction(
        &mut self,
        request: &TransactionRequest,
        interrupt: Interrupt,
    ) -> Result<()> {
        debug!(?request, "transaction manager request");
        let body = request.encode(self.transaction_id)?;
        self.send(PacketType::TransactionManager, &body, interrupt).await
    }

    /// Send a BulkLoad message: COLMETADATA, rows and DONE.
    pub async fn send_bulk(&mut self, body: &[u8], interrupt: Interrupt) -> Result<()> {
        debug!(len = body.len(), "bulk load");
        self.send(PacketType::BulkLoad, body, interrupt).await
    }

    /// Next event of the current response, `None` once it has ended.
    ///
    /// Environment changes are applied before they are returned. An
    /// interrupted read cancels the request and returns
    /// [`Error::Cancelled`] or [`Error::Timeout`] with the session Ready.
    pub async fn next_event(&mut self) -> Result<Option<FieldEvent>> {
        if !self.state.is_busy() {
            return Ok(None);
        }
        let event = match self.stream.next_event(self.conn.reader()).await {
            Ok(event) => event,
            Err(err @ (Error::Cancelled | Error::Timeout)) => {
                debug!(error = %err, "read interrupted");
                self.cancel().await?;
                return Err(err);
            }
            Err(err) => {
                warn!(error = %err, "session broken");
                self.state = SessionState::Disconnected;
                return Err(err);
            }
        };
        match &event {
            None => {
                self.conn.clear_interrupt();
                self.state = SessionState::Ready;
            }
            Some(FieldEvent::Columns(_)) => self.state = SessionState::InResult,
            Some(FieldEvent::Done(done)) => {
                if done.status.contains(DoneStatus::SRVERROR) {
                    warn!("server discarded the rest of the response");
                }
                if self.state == SessionState::InResult {
                    self.state = SessionState::ResultDone;
                }
            }
            Some(FieldEvent::EnvChange(change)) => self.apply_env_change(change.clone()),
            Some(FieldEvent::Message(msg)) if !msg.is_error() => {
                debug!(number = msg.number, "{}", msg.message);
            }
            _ => {}
        }
        Ok(event)
    }

    /// Read the rest of the response, returning the server errors it carried.
    pub async fn drain(&mut self) -> Result<Vec<ServerMessage>> {
        let mut errors = Vec::new();
        while let Some(event) = self.next_event().await? {
            if let FieldEvent::Message(msg) = event {
                if msg.is_error() {
                    errors.push(msg);
                }
            }
        }
        Ok(errors)
    }

    /// Run a batch to completion, discarding rows.
    pub async fn execute(&mut self, sql: &str) -> Result<()> {
        self.send_batch(sql, Interrupt::none()).await?;
        let errors = self.drain().await?;
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Server(errors))
        }
    }

    /// Round-trip a trivial batch.
    pub async fn ping(&mut self) -> Result<()> {
        self.execute("SELECT 1").await
    }

    /// Cancel the running request.
    ///
    /// Sends ATTENTION and reads until the server acknowledges it with a
    /// DONE carrying the attention bit. The session is Ready afterwards, or
    /// Disconnected if the acknowledgement never arrives.
    pub async fn cancel(&mut self) -> Result<()> {
        self.conn.clear_interrupt();
        debug!(state = ?self.state, "cancelling request");
        match tokio::time::timeout(ATTENTION_TIMEOUT, self.await_attention_ack()).await {
            Ok(Ok(())) => {
                self.stream.reset();
                self.state = SessionState::Ready;
                debug!("attention acknowledged");
                Ok(())
            }
            Ok(Err(err)) => {
                self.state = SessionState::Disconnected;
                Err(err)
            }
            Err(_) => {
                self.state = SessionState::Disconnected;
                Err(Error::Connection("attention was not acknowledged".into()))
            }
        }
    }

    async fn await_attention_ack(&mut self) -> Result<()> {
        self.conn.send_attention().await?;
        loop {
            if !self.stream.is_clean() {
                // stopped inside a token; the message can only be skipped
                let acked = drain_for_attention(self.conn.reader()).await?;
                if acked {
                    return Ok(());
                }
                self.begin_response();
                continue;
            }
            match self.stream.next_event(self.conn.reader()).await? {
                Some(FieldEvent::Done(done)) if done.is_attention_ack() => {
                    self.conn.reader().drain().await?;
                    return Ok(());
                }
                Some(FieldEvent::EnvChange(change)) => self.apply_env_change(change),
                Some(_) => {}
                None => self.begin_response(),
            }
        }
    }

    fn apply_env_change(&mut self, change: EnvChange) {
        match change {
            EnvChange::BeginTransaction(id) => {
                trace!(id, "transaction started");
                self.transaction_id = id;
            }
            EnvChange::CommitTransaction | EnvChange::RollbackTransaction => {
                trace!(id = self.transaction_id, "transaction ended");
                self.transaction_id = 0;
            }
            EnvChange::PacketSize(size) => {
                self.conn
                    .set_packet_size(usize::try_from(size).unwrap_or(usize::MAX));
            }
            EnvChange::Database { new, .. } => {
                debug!(database = %new, "database changed");
                self.database = Some(new);
            }
            EnvChange::SqlCollation(Some(collation)) => self.collation = collation,
            EnvChange::SqlCollation(None) | EnvChange::Language(_) => {}
            EnvChange::ResetConnectionAck => trace!("connection reset acknowledged"),
            EnvChange::Routing { host, port } => self.routing = Some((host, port)),
            other => warn!(change = ?other, "ignoring environment change"),
        }
    }

    /// Close the session.
    pub fn close(&mut self) {
        self.state = SessionState::Disconnected;
    }
}

fn encryption_error(err: TlsError) -> Error {
    match err {
        TlsError::EncryptionRequired { .. } => Error::EncryptionRequired,
        other => Error::Tls(other),
    }
}

fn build_login(config: &Config, host: &str, auth: &SqlAuthenticator) -> Login7 {
    let hostname = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_default();
    let mut login = Login7::new()
        .with_hostname(hostname)
        .with_app_name(config.app_name.clone())
        .with_server_name(host)
        .with_packet_size(config.packet_size);
    if let Some(database) = &config.database {
        login = login.with_database(database.clone());
    }
    login.library_name.clone_from(&config.driver);
    auth.prepare_login(&mut login);
    login
}

/// Exchange PRELOGIN on `stream`, returning the server's answer.
async fn exchange_prelogin<S>(stream: &mut S, config: &Config) -> Result<PreLogin>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut request = PreLogin::new(CLIENT_VERSION, config.tls_mode.prelogin_encryption());
    if let Some(instance) = &config.instance {
        request = request.with_instance(instance.clone());
    }
    let mut conn = PacketConnection::new(&mut *stream);
    conn.send_message(PacketType::PreLogin, false, &request.encode())
        .await?;
    conn.begin_response();
    let mut body = BytesMut::new();
    while let Some(packet) = conn.reader().next_packet().await? {
        body.extend_from_slice(&packet);
    }
    let response = PreLogin::decode(&body)?;
    trace!(version = %response.version, encryption = ?response.encryption, "prelogin response");
    if config.tls_mode == TlsMode::Disable && response.encryption.demands_encryption() {
        return Err(Error::Tls(TlsError::EncryptionRefused));
    }
    Ok(response)
}

async fn send_login<S>(stream: &mut S, body: &[u8], packet_size: usize) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    trace!(len = body.len(), "sending login");
    let mut conn = PacketConnection::with_packet_size(&mut *stream, packet_size);
    conn.send_message(PacketType::Login7, false, body).await?;
    Ok(())
}

/// Skip the rest of the message, reporting whether it ended with an
/// attention acknowledgement.
async fn drain_for_attention<R>(reader: &mut MessageReader<R>) -> Result<bool>
where
    R: AsyncRead + Unpin,
{
    let mut tail = Vec::with_capacity(2 * DONE_TOKEN_LEN);
    while let Some(chunk) = reader.read_chunk(usize::MAX).await? {
        tail.extend_from_slice(&chunk);
        if tail.len() > DONE_TOKEN_LEN {
            tail.drain(..tail.len() - DONE_TOKEN_LEN);
        }
    }
    Ok(tail.len() == DONE_TOKEN_LEN
        && tail[0] == TokenType::Done as u8
        && DoneStatus::from_bits_retain(u16::from_le_bytes([tail[1], tail[2]]))
            .contains(DoneStatus::ATTN))
}
