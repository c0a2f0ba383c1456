//! # tds-client
//!
//! Pooled async SQL Server client speaking TDS 7.x over tokio.
//!
//! - **Pooled**: every operation checks a session out of an elastic pool
//!   and returns it when done
//! - **Cursor results**: rows are decoded field by field as they arrive;
//!   `(max)` columns can be streamed into a writer
//! - **Explicit dispatch**: SQL without parameters runs as a batch, SQL
//!   with parameters through `sp_executesql`, procedures by name
//! - **Cancellation**: timeouts and cancellation tokens send ATTENTION and
//!   leave the session usable
//! - **Transactions** with savepoints through TransactionManager requests
//!
//! ## Example
//!
//! ```rust,ignore
//! use tds_client::{Arity, Command, Config, Database, Slot};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), tds_client::Error> {
//!     let db = Database::open(
//!         Config::new()
//!             .host("localhost")
//!             .credentials("sa", "secret")
//!             .database("test"),
//!     )
//!     .await?;
//!
//!     let mut rows = db
//!         .query(Command::new("select id, name from users where id > @p1").arg(10))
//!         .await?;
//!     let name: Slot<String> = Slot::default();
//!     rows.prep("name", &name)?;
//!     while rows.next().await? {
//!         println!("{}", name.get());
//!     }
//!     rows.close().await?;
//!
//!     let mut tx = db.begin().await?;
//!     tx.exec(Command::new("update users set active = 1").arity(Arity::Zero)).await?;
//!     tx.commit().await?;
//!
//!     db.close().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod batch;
pub mod bulk;
pub mod command;
pub mod config;
pub mod database;
pub mod driver;
pub mod error;
pub mod must;
pub mod result;
pub mod session;
pub mod ssrp;
pub mod stream;
pub mod transaction;
pub mod transport;
pub mod upload;
pub mod valuer;

pub use batch::split_batches;
pub use bulk::{BulkColumn, BulkInsert, BulkOptions};
pub use command::{Arity, Command};
pub use config::Config;
pub use database::Database;
pub use driver::{Connection, TdsDriver};
pub use error::{Error, Result};
pub use must::{Must, MustError};
pub use result::QueryResult;
pub use session::{Session, SessionState};
pub use stream::{FieldEvent, ReturnValue};
pub use transaction::Transaction;
pub use upload::StreamedRpc;
pub use valuer::{Bindable, BoundTarget, ScanInto, Sink, Slot, Valuer};

pub use tds_auth::Credentials;
pub use tds_codec::CancellationToken;
pub use tds_pool::{PoolConfig, PoolStatus};
pub use tds_tls::{TlsConfig, TlsMode};
pub use tds_types::{Column, FromValue, Numeric, Param, ParamStream, TypeError, Value, XmlData};
pub use tds_wire::{IsolationLevel, ServerMessage, SqlType};
