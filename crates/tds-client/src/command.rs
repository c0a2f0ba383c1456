//! Commands and how they are put on the wire.
//!
//! A [`Command`] is SQL text, a procedure name or a prepared handle plus
//! its parameters and execution options. Dispatch is decided by the
//! command's shape, never by looking at the SQL:
//!
//! | Command | Request |
//! |---------|---------|
//! | SQL text, no parameters | SqlBatch |
//! | SQL text with parameters | RPC `sp_executesql` |
//! | [`Command::procedure`] | RPC by name |
//! | [`Command::execute_handle`] | RPC `sp_execute` |

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use bytes::BytesMut;
use tds_codec::{CancellationToken, Interrupt};
use tds_types::{Param, Value, declaration_list, encode_param, encode_stream_head};
use tds_wire::{Collation, ProcId, RpcRequest, SqlType};

use crate::error::{Error, Result};
use crate::session::Session;
use crate::upload::{RpcPart, StreamedRpc};

/// Expected number of rows a command returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Arity {
    /// Any number of rows.
    #[default]
    Any,
    /// At most one row is read; the rest are discarded.
    One,
    /// Exactly one row, otherwise an arity error.
    OneMust,
    /// Rows are not read.
    Zero,
    /// No rows, otherwise an arity error.
    ZeroMust,
}

impl Arity {
    /// Whether reading stops after the first row.
    #[must_use]
    pub fn caps_at_one(self) -> bool {
        matches!(self, Self::One | Self::OneMust)
    }

    /// Whether the whole response is consumed by the query call.
    #[must_use]
    pub fn is_zero(self) -> bool {
        matches!(self, Self::Zero | Self::ZeroMust)
    }

    /// Check the final row count.
    pub fn check(self, rows: u64) -> Result<()> {
        let ok = match self {
            Self::OneMust => rows == 1,
            Self::ZeroMust => rows == 0,
            Self::Any | Self::One | Self::Zero => true,
        };
        if ok {
            Ok(())
        } else {
            Err(Error::Arity {
                expected: self,
                rows,
            })
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Any => "any",
            Self::One => "one",
            Self::OneMust => "one-must",
            Self::Zero => "zero",
            Self::ZeroMust => "zero-must",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Target {
    Sql(String),
    Procedure(String),
    Handle(i32),
}

/// A statement with parameters and options.
#[derive(Debug, Clone)]
pub struct Command {
    target: Target,
    params: Vec<Param>,
    arity: Arity,
    null_as: HashMap<String, Value>,
    timeout: Option<Duration>,
    cancel: Option<CancellationToken>,
    prepare: bool,
}

impl Command {
    fn with_target(target: Target) -> Self {
        Self {
            target,
            params: Vec::new(),
            arity: Arity::Any,
            null_as: HashMap::new(),
            timeout: None,
            cancel: None,
            prepare: false,
        }
    }

    /// SQL text.
    pub fn new(sql: impl Into<String>) -> Self {
        Self::with_target(Target::Sql(sql.into()))
    }

    /// Call a stored procedure by name.
    pub fn procedure(name: impl Into<String>) -> Self {
        Self::with_target(Target::Procedure(name.into()))
    }

    /// Execute a statement prepared earlier through `sp_prepare`.
    pub fn execute_handle(handle: i32) -> Self {
        Self::with_target(Target::Handle(handle))
    }

    /// Declare the expected row count.
    #[must_use]
    pub fn arity(mut self, arity: Arity) -> Self {
        self.arity = arity;
        self
    }

    /// Add a named parameter with an inferred type.
    #[must_use]
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.push(Param::new(name, value));
        self
    }

    /// Add a parameter named `@p1`, `@p2`, ... by position.
    #[must_use]
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        let name = format!("p{}", self.params.len() + 1);
        self.params.push(Param::new(name, value));
        self
    }

    /// Add a fully specified parameter.
    #[must_use]
    pub fn bind(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    /// Add an `nvarchar(max)` parameter read from `reader` as the request
    /// is sent. Use [`Command::bind`] with [`Param::stream`] for other
    /// `(max)` types.
    #[must_use]
    pub fn stream(
        mut self,
        name: impl Into<String>,
        reader: impl tokio::io::AsyncRead + Send + Unpin + 'static,
    ) -> Self {
        self.params.push(Param::stream(name, reader));
        self
    }

    /// Substitute `value` when column `column` is NULL.
    #[must_use]
    pub fn null_as(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.null_as.insert(column.into(), value.into());
        self
    }

    /// Per-command deadline, overriding the configured default.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Cancel the command when `token` fires.
    #[must_use]
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Ask for server-side prepare. Not supported; the command fails.
    #[must_use]
    pub fn prepare(mut self, prepare: bool) -> Self {
        self.prepare = prepare;
        self
    }

    /// Declared arity.
    #[must_use]
    pub fn expected_arity(&self) -> Arity {
        self.arity
    }

    /// Parameters in order.
    #[must_use]
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub(crate) fn cancellation(&self) -> Option<&CancellationToken> {
        self.cancel.as_ref()
    }

    pub(crate) fn null_substitutes(&self) -> HashMap<String, Value> {
        self.null_as.clone()
    }

    fn interrupt(&self, default_timeout: Option<Duration>) -> Interrupt {
        let mut interrupt = Interrupt::none();
        if let Some(timeout) = self.timeout.or(default_timeout) {
            interrupt = interrupt.with_timeout(timeout);
        }
        if let Some(token) = &self.cancel {
            interrupt = interrupt.with_cancel(token.clone());
        }
        interrupt
    }

    /// The RPC to call and the parameters that precede the user's.
    fn rpc_shape(&self) -> Option<(RpcRequest, Vec<Param>)> {
        Some(match &self.target {
            Target::Sql(_) if self.params.is_empty() => return None,
            Target::Sql(sql) => (
                RpcRequest::by_id(ProcId::ExecuteSql),
                vec![
                    Param::positional(sql.as_str()).with_type(SqlType::NVarChar(None)),
                    Param::positional(declaration_list(&self.params))
                        .with_type(SqlType::NVarChar(None)),
                ],
            ),
            Target::Procedure(name) => (RpcRequest::named(name.as_str()), Vec::new()),
            Target::Handle(handle) => (
                RpcRequest::by_id(ProcId::Execute),
                vec![Param::positional(*handle)],
            ),
        })
    }

    /// Whether any parameter is read from a stream.
    #[must_use]
    pub fn has_streams(&self) -> bool {
        self.params.iter().any(Param::is_streamed)
    }

    /// Build the RPC request for a command that needs one. Commands with
    /// streamed parameters are built by [`Command::to_streamed_rpc`].
    pub fn to_rpc(&self, collation: Collation) -> Result<Option<RpcRequest>> {
        let Some((mut rpc, leading)) = self.rpc_shape() else {
            return Ok(None);
        };
        for param in leading.iter().chain(&self.params) {
            let mut buf = BytesMut::new();
            encode_param(&mut buf, param, collation)
                .map_err(|e| Error::parameter(&param.at_name(), e))?;
            rpc.push_param(buf.freeze());
        }
        Ok(Some(rpc))
    }

    /// Build an RPC whose streamed parameters are read while it is sent.
    pub fn to_streamed_rpc(&self, collation: Collation) -> Result<StreamedRpc> {
        let (rpc, leading) = self
            .rpc_shape()
            .ok_or(Error::NotImplemented("streamed parameters without an RPC"))?;
        let mut request = StreamedRpc::new(rpc);
        for param in leading.iter().chain(&self.params) {
            let name = param.at_name();
            let mut buf = BytesMut::new();
            let part = match &param.stream {
                Some(stream) => {
                    let encoder = encode_stream_head(&mut buf, param, collation)
                        .map_err(|e| Error::parameter(&name, e))?;
                    RpcPart::Streamed {
                        name,
                        head: buf.freeze(),
                        stream: stream.clone(),
                        encoder,
                    }
                }
                None => {
                    encode_param(&mut buf, param, collation)
                        .map_err(|e| Error::parameter(&name, e))?;
                    RpcPart::Encoded(buf.freeze())
                }
            };
            request.push(part);
        }
        Ok(request)
    }

    /// Send the command on `session`.
    pub(crate) async fn dispatch(
        &self,
        session: &mut Session,
        default_timeout: Option<Duration>,
    ) -> Result<()> {
        if self.prepare {
            return Err(Error::NotImplemented("server-side prepare"));
        }
        let interrupt = self.interrupt(default_timeout);
        if self.has_streams() {
            let request = self.to_streamed_rpc(session.collation())?;
            return session.send_streamed_rpc(request, interrupt).await;
        }
        match self.to_rpc(session.collation())? {
            Some(rpc) => session.send_rpc(&rpc, interrupt).await,
            None => {
                let Target::Sql(sql) = &self.target else {
                    return Err(Error::NotImplemented("command without a request"));
                };
                session.send_batch(sql, interrupt).await
            }
        }
    }
}

impl From<&str> for Command {
    fn from(sql: &str) -> Self {
        Self::new(sql)
    }
}

impl From<String> for Command {
    fn from(sql: String) -> Self {
        Self::new(sql)
    }
}
