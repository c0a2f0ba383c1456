//! # tds-pool
//!
//! Elastic connection pool over an injected [`Driver`].
//!
//! - Opens `init_capacity` connections up front
//! - Grows by `expand_by` (default 6) when an acquire has waited
//!   `soft_wait`, never past `max_capacity`
//! - Closes connections that are not reusable on release, optionally
//!   running a reset statement on the ones that are
//! - A background reaper closes idle and over-age connections
//!
//! ## Example
//!
//! ```rust,ignore
//! use tds_pool::{Pool, PoolConfig};
//!
//! let config = PoolConfig::new()
//!     .init_capacity(2)
//!     .max_capacity(20)
//!     .idle_timeout(Duration::from_secs(300));
//!
//! let pool = Pool::open(driver, config).await?;
//! let conn = pool.acquire().await?;
//! // Use connection...
//! conn.release().await;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod pool;

pub use config::{DEFAULT_EXPAND_BY, PoolConfig};
pub use error::{BoxError, PoolError};
pub use lifecycle::{ConnectionMetadata, Driver, ManagedConnection};
pub use pool::{Pool, PoolStatus, PooledConnection};
