//! Pool-backed entry point.

use std::sync::Arc;

use tds_codec::{CancellationToken, Interrupt};
use tds_pool::{Pool, PoolStatus, PooledConnection};
use tds_wire::IsolationLevel;
use tracing::{debug, info};

use crate::batch::split_batches;
use crate::bulk::BulkInsert;
use crate::command::{Arity, Command};
use crate::config::Config;
use crate::driver::TdsDriver;
use crate::error::{Error, Result};
use crate::result::QueryResult;
use crate::stream::FieldEvent;
use crate::transaction::Transaction;

/// A pool of sessions to one server.
///
/// Cloning is cheap; clones share the pool. Every operation checks a
/// connection out for its own duration: a [`QueryResult`] until it is
/// closed or dropped, a [`Transaction`] until commit or rollback.
#[derive(Clone)]
pub struct Database {
    pool: Pool<TdsDriver>,
    config: Arc<Config>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("status", &self.pool.status())
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Validate `config`, open the pool and its initial connections.
    pub async fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let driver = TdsDriver::new(Arc::clone(&config));
        let pool = Pool::open(driver, config.pool.clone()).await?;
        info!(
            driver = %config.driver,
            host = %config.host,
            port = config.port,
            "database opened"
        );
        Ok(Self { pool, config })
    }

    /// The configuration the pool dials with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    async fn acquire(
        &self,
        cancel: Option<&CancellationToken>,
    ) -> Result<PooledConnection<TdsDriver>> {
        let mut conn = match cancel {
            Some(token) => tokio::select! {
                biased;
                () = token.cancelled() => return Err(Error::Cancelled),
                conn = self.pool.acquire() => conn?,
            },
            None => self.pool.acquire().await?,
        };
        if self.config.reset_connection && conn.metadata().checkout_count > 1 {
            conn.session_mut().reset_connection();
        }
        Ok(conn)
    }

    /// Run a command and return a cursor over its response.
    pub async fn query(&self, command: impl Into<Command>) -> Result<QueryResult<'static>> {
        let command = command.into();
        let conn = self.acquire(command.cancellation()).await?;
        QueryResult::start_pooled(conn, &command, self.config.query_timeout).await
    }

    /// Run a command for its side effects and return the rows affected.
    ///
    /// Commands left at [`Arity::Any`] run as [`Arity::Zero`].
    pub async fn exec(&self, command: impl Into<Command>) -> Result<u64> {
        let mut command = command.into();
        if command.expected_arity() == Arity::Any {
            command = command.arity(Arity::Zero);
        }
        let mut result = self.query(command).await?;
        result.close().await?;
        Ok(result.rows_affected())
    }

    /// Split `script` on `go` lines and run the batches in order on one
    /// connection, stopping at the first failure.
    ///
    /// Returns the rows affected over all batches.
    pub async fn query_batches(&self, script: &str) -> Result<u64> {
        let mut conn = self.acquire(None).await?;
        let mut affected = 0;
        for (i, batch) in split_batches(script).iter().enumerate() {
            debug!(batch = i, len = batch.len(), "running batch");
            let command = Command::new(batch.as_str()).arity(Arity::Zero);
            let mut result =
                QueryResult::start_borrowed(conn.session_mut(), &command, self.config.query_timeout)
                    .await?;
            result.close().await?;
            affected += result.rows_affected();
        }
        conn.release().await;
        Ok(affected)
    }

    /// Round-trip a trivial batch on a pooled connection.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.acquire(None).await?;
        conn.session_mut().ping().await?;
        conn.release().await;
        Ok(())
    }

    /// Begin a transaction at the session's isolation level.
    pub async fn begin(&self) -> Result<Transaction> {
        self.begin_level(IsolationLevel::Unchanged).await
    }

    /// Begin a transaction at `level`.
    pub async fn begin_level(&self, level: IsolationLevel) -> Result<Transaction> {
        let conn = self.acquire(None).await?;
        Transaction::begin(conn, level, self.config.query_timeout).await
    }

    /// Load `bulk`'s rows and return the count the server reports.
    pub async fn bulk_insert(&self, bulk: &BulkInsert) -> Result<u64> {
        let mut conn = self.acquire(None).await?;
        let session = conn.session_mut();
        let body = bulk.encode(session.collation())?;
        session.execute(&bulk.statement()).await?;

        let mut interrupt = Interrupt::none();
        if let Some(timeout) = self.config.query_timeout {
            interrupt = interrupt.with_timeout(timeout);
        }
        session.send_bulk(&body, interrupt).await?;
        let mut rows = 0;
        let mut errors = Vec::new();
        while let Some(event) = session.next_event().await? {
            match event {
                FieldEvent::RowCount(n) => rows += n,
                FieldEvent::Message(msg) if msg.is_error() => errors.push(msg),
                _ => {}
            }
        }
        conn.release().await;
        if !errors.is_empty() {
            return Err(Error::Server(errors));
        }
        debug!(table = bulk.table(), rows, "bulk load finished");
        Ok(rows)
    }

    /// Pool counters.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        self.pool.status()
    }

    /// Close the pool. Checked-out connections close when released.
    pub async fn close(&self) {
        self.pool.close().await;
        info!(host = %self.config.host, "database closed");
    }
}
