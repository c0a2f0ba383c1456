//! Result cursor over one response.
//!
//! A [`QueryResult`] owns the connection its command was sent on until the
//! response has been read to the end. Rows are pulled with
//! [`next`](QueryResult::next) or [`scan`](QueryResult::scan); further
//! result sets with [`next_result`](QueryResult::next_result). Closing, or
//! dropping, drains what is left and hands the connection back.

use std::io::Write;
use std::time::Duration;

use tds_pool::PooledConnection;
use tds_types::{Column, Value};
use tds_wire::ServerMessage;
use tracing::{debug, trace};

use crate::command::{Arity, Command};
use crate::driver::TdsDriver;
use crate::error::{Error, Result};
use crate::session::Session;
use crate::stream::{FieldEvent, ReturnValue};
use crate::valuer::{Bindable, ScanInto, Sink, Valuer};

enum ConnRef<'a> {
    Pooled(PooledConnection<TdsDriver>),
    Borrowed(&'a mut Session),
    Released,
}

impl ConnRef<'_> {
    fn session(&mut self) -> Result<&mut Session> {
        match self {
            Self::Pooled(conn) => Ok(conn.session_mut()),
            Self::Borrowed(session) => Ok(&mut **session),
            Self::Released => Err(Error::Connection("result is closed".into())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    // a column set is active and rows may follow
    Rows,
    // between column sets; `pending` marks one already announced
    Between { pending: bool },
    // the response has been read to the end
    Finished,
}

enum Step {
    Columns,
    Row,
    EndOfSet,
    End,
}

/// Rows and side information of one command.
pub struct QueryResult<'a> {
    conn: ConnRef<'a>,
    valuer: Valuer,
    arity: Arity,
    phase: Phase,
    total_rows: u64,
    discarding: bool,
}

impl std::fmt::Debug for QueryResult<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryResult")
            .field("arity", &self.arity)
            .field("phase", &self.phase)
            .field("total_rows", &self.total_rows)
            .field("valuer", &self.valuer)
            .finish_non_exhaustive()
    }
}

impl QueryResult<'static> {
    pub(crate) async fn start_pooled(
        conn: PooledConnection<TdsDriver>,
        command: &Command,
        default_timeout: Option<Duration>,
    ) -> Result<Self> {
        Self::start(ConnRef::Pooled(conn), command, default_timeout).await
    }
}

impl<'a> QueryResult<'a> {
    pub(crate) async fn start_borrowed(
        session: &'a mut Session,
        command: &Command,
        default_timeout: Option<Duration>,
    ) -> Result<Self> {
        Self::start(ConnRef::Borrowed(session), command, default_timeout).await
    }

    async fn start(
        mut conn: ConnRef<'a>,
        command: &Command,
        default_timeout: Option<Duration>,
    ) -> Result<Self> {
        command.dispatch(conn.session()?, default_timeout).await?;
        let mut result = Self {
            conn,
            valuer: Valuer::new(command.null_substitutes()),
            arity: command.expected_arity(),
            phase: Phase::Between { pending: false },
            total_rows: 0,
            discarding: false,
        };
        if result.arity.is_zero() {
            result.finish().await?;
            return Ok(result);
        }
        result.next_result().await?;
        Ok(result)
    }

    fn session(&mut self) -> Result<&mut Session> {
        self.conn.session()
    }

    /// Pull the next event the caller cares about, feeding the valuer.
    async fn step(&mut self) -> Result<Step> {
        loop {
            let event = match self.session()?.next_event().await {
                Ok(Some(event)) => event,
                Ok(None) => return Ok(Step::End),
                Err(err) => {
                    self.phase = Phase::Finished;
                    return Err(err);
                }
            };
            match event {
                FieldEvent::Columns(columns) => {
                    self.valuer.set_columns(columns);
                    return Ok(Step::Columns);
                }
                FieldEvent::Field { column, value } if !self.discarding => {
                    self.valuer.field(column, value)?;
                }
                FieldEvent::Chunk { column, chunk } if !self.discarding => {
                    self.valuer.chunk(column, chunk)?;
                }
                FieldEvent::Field { .. } | FieldEvent::Chunk { .. } => {}
                FieldEvent::Row => {
                    self.total_rows += 1;
                    if !self.discarding {
                        self.valuer.end_row();
                    }
                    return Ok(Step::Row);
                }
                FieldEvent::Done(_) if self.phase == Phase::Rows => return Ok(Step::EndOfSet),
                FieldEvent::Message(msg) => self.valuer.message(msg),
                FieldEvent::RowCount(rows) => self.valuer.add_rows_affected(rows),
                FieldEvent::ReturnStatus(status) => self.valuer.set_return_status(status),
                FieldEvent::ReturnValue(value) => self.valuer.output(value),
                other => trace!(event = ?other, "skipping event"),
            }
        }
    }

    /// Read the rest of the response without delivering rows, then check
    /// server errors and arity.
    async fn finish(&mut self) -> Result<()> {
        if self.phase == Phase::Finished {
            return Ok(());
        }
        self.discarding = true;
        loop {
            if let Step::End = self.step().await? {
                break;
            }
        }
        self.phase = Phase::Finished;
        self.check_outcome()
    }

    fn check_outcome(&mut self) -> Result<()> {
        let errors = self.valuer.take_errors();
        if !errors.is_empty() {
            debug!(count = errors.len(), "response carried server errors");
            return Err(Error::Server(errors));
        }
        self.arity.check(self.total_rows)
    }

    /// Advance to the next row of the current result set.
    ///
    /// Returns `false` at the end of the set. Under [`Arity::One`] and
    /// [`Arity::OneMust`] the first row is the only one delivered.
    pub async fn next(&mut self) -> Result<bool> {
        if self.phase != Phase::Rows {
            return Ok(false);
        }
        if self.arity.caps_at_one() && self.total_rows >= 1 {
            self.finish().await?;
            return Ok(false);
        }
        match self.step().await? {
            Step::Row => Ok(true),
            Step::EndOfSet => {
                self.phase = Phase::Between { pending: false };
                Ok(false)
            }
            Step::Columns => {
                self.phase = Phase::Between { pending: true };
                Ok(false)
            }
            Step::End => {
                self.phase = Phase::Finished;
                self.check_outcome()?;
                Ok(false)
            }
        }
    }

    /// Read the next row into `targets`, by position.
    ///
    /// Columns already bound with [`prep`](Self::prep) still deliver to
    /// their binding as well. A column bound to a [`Sink`] cannot be
    /// scanned.
    ///
    /// Returns `false` once the current result set has no more rows.
    pub async fn scan(&mut self, targets: &mut [&mut dyn ScanInto]) -> Result<bool> {
        if targets.len() > self.valuer.columns().len() {
            return Err(Error::UnknownColumn(format!("#{}", targets.len() - 1)));
        }
        if let Some(i) = (0..targets.len()).find(|&i| self.valuer.is_streamed(i)) {
            return Err(Error::ColumnStreamed(self.valuer.columns()[i].name.clone()));
        }
        if !self.next().await? {
            return Ok(false);
        }
        for (i, target) in targets.iter_mut().enumerate() {
            let value = self.valuer.get(i)?.cloned().unwrap_or(Value::Null);
            target
                .scan_value(value)
                .map_err(|e| Error::conversion(&self.valuer.columns()[i].name, e))?;
        }
        Ok(true)
    }

    /// Bind column `name` to `target` for every following row.
    pub fn prep(&mut self, name: &str, target: &impl Bindable) -> Result<()> {
        let index = self.valuer.column_index(name)?;
        self.valuer.prep(index, target.bound())
    }

    /// Bind column `index` to `target` for every following row.
    pub fn prepx(&mut self, index: usize, target: &impl Bindable) -> Result<()> {
        self.valuer.prep(index, target.bound())
    }

    /// Bind columns by position, one target per column from the first.
    pub fn prep_all(&mut self, targets: &[&dyn Bindable]) -> Result<()> {
        for (index, target) in targets.iter().enumerate() {
            self.valuer.prep(index, target.bound())?;
        }
        Ok(())
    }

    /// Stream column `name` into `sink` for every following row.
    pub fn prep_sink<W: Write + Send + 'static>(&mut self, name: &str, sink: &Sink<W>) -> Result<()> {
        self.prep(name, sink)
    }

    /// Value of unbound column `name` in the current row.
    pub fn get(&self, name: &str) -> Result<Option<&Value>> {
        let index = self.valuer.column_index(name)?;
        self.valuer.get(index)
    }

    /// Value of unbound column `index` in the current row.
    pub fn getx(&self, index: usize) -> Result<Option<&Value>> {
        self.valuer.get(index)
    }

    /// Columns of the current result set.
    #[must_use]
    pub fn schema(&self) -> &[Column] {
        self.valuer.columns()
    }

    /// INFO messages received so far.
    #[must_use]
    pub fn info(&self) -> &[ServerMessage] {
        self.valuer.info()
    }

    /// Rows affected as reported by the server so far.
    #[must_use]
    pub fn rows_affected(&self) -> u64 {
        self.valuer.rows_affected()
    }

    /// Rows read so far over all result sets.
    #[must_use]
    pub fn rows_read(&self) -> u64 {
        self.valuer.rows_read()
    }

    /// Return status of a procedure call, once read.
    #[must_use]
    pub fn return_status(&self) -> Option<i32> {
        self.valuer.return_status()
    }

    /// Output parameter `name`, with or without the leading `@`.
    #[must_use]
    pub fn output(&self, name: &str) -> Option<&Value> {
        self.valuer.output_value(name)
    }

    /// All output parameters read so far.
    #[must_use]
    pub fn outputs(&self) -> &[ReturnValue] {
        self.valuer.outputs()
    }

    /// Whether the response has been read to the end.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Finished
    }

    /// Skip what is left of the current result set and move to the next.
    ///
    /// Returns `false` when the response has no more result sets. Server
    /// errors and arity violations are reported here once the end of the
    /// response is reached.
    pub async fn next_result(&mut self) -> Result<bool> {
        loop {
            match self.phase {
                Phase::Finished => return Ok(false),
                Phase::Between { pending: true } => {
                    self.phase = Phase::Rows;
                    return Ok(true);
                }
                Phase::Rows => {
                    self.discarding = true;
                    let step = self.step().await;
                    self.discarding = false;
                    match step? {
                        Step::Row => {}
                        Step::EndOfSet => self.phase = Phase::Between { pending: false },
                        Step::Columns => self.phase = Phase::Between { pending: true },
                        Step::End => {
                            self.phase = Phase::Finished;
                            self.check_outcome()?;
                        }
                    }
                }
                Phase::Between { pending: false } => match self.step().await? {
                    Step::Columns => self.phase = Phase::Between { pending: true },
                    Step::Row | Step::EndOfSet => {}
                    Step::End => {
                        self.phase = Phase::Finished;
                        self.check_outcome()?;
                    }
                },
            }
        }
    }

    /// Drain the rest of the response and release the connection.
    ///
    /// Calling it again is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        if matches!(self.conn, ConnRef::Released) {
            return Ok(());
        }
        let outcome = self.finish().await;
        match std::mem::replace(&mut self.conn, ConnRef::Released) {
            ConnRef::Pooled(conn) => conn.release().await,
            ConnRef::Borrowed(_) | ConnRef::Released => {}
        }
        outcome
    }
}
