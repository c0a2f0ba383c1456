//! Driver seam and per-connection bookkeeping.

use std::time::Duration;

use tokio::time::Instant;

use crate::error::BoxError;

/// Opens connections for the pool.
///
/// The pool is handed a driver at construction; it never looks drivers up
/// by name.
#[async_trait::async_trait]
pub trait Driver: Send + Sync + 'static {
    /// Connection type produced by this driver.
    type Connection: ManagedConnection;

    /// Open and log in a new connection.
    async fn connect(&self) -> Result<Self::Connection, BoxError>;
}

/// What the pool needs to know about a connection it holds.
#[async_trait::async_trait]
pub trait ManagedConnection: Send + 'static {
    /// Whether the connection is idle and healthy enough to hand out again.
    fn is_reusable(&self) -> bool;

    /// Run the configured reset statement before the connection goes idle.
    async fn reset(&mut self, query: &str) -> Result<(), BoxError>;
}

/// Metadata about a pooled connection.
#[derive(Debug, Clone)]
pub struct ConnectionMetadata {
    /// Unique identifier for this connection.
    pub id: u64,
    /// When the connection was opened.
    pub created_at: Instant,
    /// When the connection was last handed out or returned.
    pub last_used_at: Instant,
    /// Number of times the connection has been checked out.
    pub checkout_count: u64,
}

impl ConnectionMetadata {
    /// Create metadata for a new connection.
    pub fn new(id: u64) -> Self {
        let now = Instant::now();
        Self {
            id,
            created_at: now,
            last_used_at: now,
            checkout_count: 0,
        }
    }

    /// Check if the connection has exceeded its maximum lifetime.
    #[must_use]
    pub fn is_expired(&self, max_lifetime: Duration) -> bool {
        self.created_at.elapsed() > max_lifetime
    }

    /// Check if the connection has been idle too long.
    #[must_use]
    pub fn is_idle_expired(&self, idle_timeout: Duration) -> bool {
        self.last_used_at.elapsed() > idle_timeout
    }

    /// Mark the connection as checked out.
    pub fn mark_checkout(&mut self) {
        self.last_used_at = Instant::now();
        self.checkout_count += 1;
    }

    /// Mark the connection as returned to idle.
    pub fn mark_checkin(&mut self) {
        self.last_used_at = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_expiry_follows_clock() {
        let meta = ConnectionMetadata::new(1);
        assert!(!meta.is_expired(Duration::from_secs(10)));
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(meta.is_expired(Duration::from_secs(10)));
        assert!(meta.is_idle_expired(Duration::from_secs(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_checkin_refreshes_idle_clock() {
        let mut meta = ConnectionMetadata::new(1);
        meta.mark_checkout();
        assert_eq!(meta.checkout_count, 1);

        tokio::time::advance(Duration::from_secs(5)).await;
        meta.mark_checkin();
        assert!(!meta.is_idle_expired(Duration::from_secs(1)));
        assert!(meta.is_expired(Duration::from_secs(1)));
    }
}
