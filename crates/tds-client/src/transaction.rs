//! Transactions.
//!
//! A [`Transaction`] holds one pooled connection from BEGIN until COMMIT or
//! ROLLBACK. Every bracket is a TransactionManager request; the server
//! answers with an ENVCHANGE carrying the new transaction descriptor, which
//! the session stamps on every later request.
//!
//! ```rust,ignore
//! let mut tx = db.begin().await?;
//! tx.exec(Command::new("insert orders (customer) values (@p1)").arg(42)).await?;
//! tx.save_point("before_items").await?;
//! tx.exec("insert items (order_id) values (1)").await?;
//! tx.rollback_to("before_items").await?;
//! tx.commit().await?;
//! ```

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tds_codec::Interrupt;
use tds_pool::PooledConnection;
use tds_wire::{IsolationLevel, TransactionRequest};
use tracing::{debug, warn};

use crate::command::{Arity, Command};
use crate::driver::TdsDriver;
use crate::error::{Error, Result};
use crate::result::QueryResult;
use crate::session::Session;

/// Validate a savepoint name.
fn validate_identifier(name: &str) -> Result<()> {
    #[allow(clippy::unwrap_used)]
    static IDENTIFIER_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_@#$]{0,31}$").unwrap());

    if IDENTIFIER_RE.is_match(name) {
        Ok(())
    } else {
        Err(Error::InvalidIdentifier(format!(
            "'{name}': must start with a letter or underscore, contain only \
             alphanumerics, _, @, # or $, and be 1-32 characters"
        )))
    }
}

/// Send a TransactionManager request and read its response.
async fn bracket(
    session: &mut Session,
    request: &TransactionRequest,
    timeout: Option<Duration>,
) -> Result<()> {
    let mut interrupt = Interrupt::none();
    if let Some(timeout) = timeout {
        interrupt = interrupt.with_timeout(timeout);
    }
    session.send_transaction(request, interrupt).await?;
    let errors = session.drain().await?;
    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::Server(errors))
    }
}

/// An open transaction.
///
/// Dropping it without [`commit`](Self::commit) or
/// [`rollback`](Self::rollback) closes the connection, which makes the
/// server roll back.
pub struct Transaction {
    conn: Option<PooledConnection<TdsDriver>>,
    isolation: IsolationLevel,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("isolation", &self.isolation)
            .field("descriptor", &self.descriptor())
            .finish_non_exhaustive()
    }
}

impl Transaction {
    pub(crate) async fn begin(
        mut conn: PooledConnection<TdsDriver>,
        isolation: IsolationLevel,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let session = conn.session_mut();
        let request = TransactionRequest::Begin {
            isolation,
            name: String::new(),
        };
        bracket(session, &request, timeout).await?;
        if session.transaction_id() == 0 {
            return Err(Error::Connection(
                "server did not report a transaction descriptor".into(),
            ));
        }
        debug!(descriptor = session.transaction_id(), ?isolation, "transaction started");
        Ok(Self {
            conn: Some(conn),
            isolation,
            timeout,
        })
    }

    fn session(&mut self) -> Result<&mut Session> {
        self.conn
            .as_mut()
            .map(|c| c.session_mut())
            .ok_or_else(|| Error::Connection("transaction is finished".into()))
    }

    /// Isolation level requested at BEGIN.
    #[must_use]
    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    /// Current transaction descriptor, 0 once finished.
    #[must_use]
    pub fn descriptor(&self) -> u64 {
        self.conn
            .as_ref()
            .map_or(0, |c| c.session().transaction_id())
    }

    /// Run a command inside the transaction.
    pub async fn query(&mut self, command: impl Into<Command>) -> Result<QueryResult<'_>> {
        let command = command.into();
        let timeout = self.timeout;
        QueryResult::start_borrowed(self.session()?, &command, timeout).await
    }

    /// Run a command for its side effects and return the rows affected.
    pub async fn exec(&mut self, command: impl Into<Command>) -> Result<u64> {
        let mut command = command.into();
        if command.expected_arity() == Arity::Any {
            command = command.arity(Arity::Zero);
        }
        let mut result = self.query(command).await?;
        result.close().await?;
        Ok(result.rows_affected())
    }

    /// Create savepoint `name`.
    pub async fn save_point(&mut self, name: &str) -> Result<()> {
        validate_identifier(name)?;
        let timeout = self.timeout;
        let request = TransactionRequest::Save {
            name: name.to_owned(),
        };
        bracket(self.session()?, &request, timeout).await?;
        debug!(name, "savepoint created");
        Ok(())
    }

    /// Undo everything after savepoint `name`; the transaction stays open.
    pub async fn rollback_to(&mut self, name: &str) -> Result<()> {
        validate_identifier(name)?;
        let timeout = self.timeout;
        let request = TransactionRequest::Rollback {
            name: name.to_owned(),
        };
        bracket(self.session()?, &request, timeout).await?;
        debug!(name, "rolled back to savepoint");
        Ok(())
    }

    /// Commit and return the connection to the pool.
    pub async fn commit(mut self) -> Result<()> {
        self.finish(TransactionRequest::Commit {
            name: String::new(),
        })
        .await
    }

    /// Roll back and return the connection to the pool.
    pub async fn rollback(mut self) -> Result<()> {
        self.finish(TransactionRequest::Rollback {
            name: String::new(),
        })
        .await
    }

    async fn finish(&mut self, request: TransactionRequest) -> Result<()> {
        let timeout = self.timeout;
        let outcome = bracket(self.session()?, &request, timeout).await;
        if let Some(conn) = self.conn.take() {
            let descriptor = conn.session().transaction_id();
            if descriptor != 0 {
                warn!(descriptor, "transaction still open after {request:?}");
            }
            conn.release().await;
        }
        outcome
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if let Some(conn) = &self.conn {
            warn!(
                descriptor = conn.session().transaction_id(),
                "transaction dropped without commit or rollback; closing its connection"
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("before_items").is_ok());
        assert!(validate_identifier("_sp1").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("1abc").is_err());
        assert!(validate_identifier("a; drop table t").is_err());
        assert!(validate_identifier(&"a".repeat(33)).is_err());
    }
}
