//! Pool error types.

use thiserror::Error;

/// Error produced by a driver while opening or resetting a connection.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur during pool operations.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Failed to acquire a connection within the timeout.
    #[error("connection acquisition timeout after {0:?}")]
    AcquisitionTimeout(std::time::Duration),

    /// Pool is closed.
    #[error("pool is closed")]
    PoolClosed,

    /// The driver could not open a connection.
    #[error("failed to create connection: {0}")]
    ConnectionCreation(#[source] BoxError),

    /// Pool configuration error.
    #[error("pool configuration error: {0}")]
    Configuration(String),
}

impl PoolError {
    /// The driver's own error, when the failure came from it.
    #[must_use]
    pub fn driver_error(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            Self::ConnectionCreation(e) => Some(e.as_ref()),
            _ => None,
        }
    }

    /// Take the driver's own error out of this one.
    pub fn into_driver_error(self) -> Result<BoxError, Self> {
        match self {
            Self::ConnectionCreation(e) => Ok(e),
            other => Err(other),
        }
    }
}
