//! The pool's view of a session.

use std::sync::Arc;

use async_trait::async_trait;
use tds_pool::{BoxError, Driver, ManagedConnection};

use crate::config::Config;
use crate::session::Session;

/// Opens logged-in sessions for the pool.
#[derive(Debug, Clone)]
pub struct TdsDriver {
    config: Arc<Config>,
}

impl TdsDriver {
    /// A driver dialing with `config`.
    #[must_use]
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    /// Configuration new sessions are opened with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }
}

#[async_trait]
impl Driver for TdsDriver {
    type Connection = Connection;

    async fn connect(&self) -> Result<Connection, BoxError> {
        let session = Session::connect(&self.config).await?;
        Ok(Connection { session })
    }
}

/// A pooled session.
#[derive(Debug)]
pub struct Connection {
    session: Session,
}

impl Connection {
    /// The session.
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The session, mutably.
    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }
}

#[async_trait]
impl ManagedConnection for Connection {
    fn is_reusable(&self) -> bool {
        self.session.is_reusable()
    }

    async fn reset(&mut self, query: &str) -> Result<(), BoxError> {
        self.session.execute(query).await?;
        Ok(())
    }
}
