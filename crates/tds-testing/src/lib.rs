//! # tds-testing
//!
//! Test infrastructure for the TDS client.
//!
//! [`MockTdsServer`] is an in-process TCP listener that plays the server
//! side of a TDS 7.4 session from scripted responses. It needs no SQL
//! Server instance and no TLS: it answers PRELOGIN with ENCRYPT_NOT_SUP
//! and [`MockTdsServer::client_config`] hands out a matching
//! plain-text client configuration.
//!
//! ## Example
//!
//! ```rust,ignore
//! use tds_client::{Arity, Command, Database};
//! use tds_testing::{MockResponse, MockTdsServer};
//!
//! #[tokio::test]
//! async fn test_with_mock_server() {
//!     let server = MockTdsServer::builder()
//!         .with_response("select count(*) from users", MockResponse::scalar(3i32))
//!         .build()
//!         .await
//!         .unwrap();
//!
//!     let db = Database::open(server.client_config()).await.unwrap();
//!     let mut rows = db
//!         .query(Command::new("select count(*) from users").arity(Arity::OneMust))
//!         .await
//!         .unwrap();
//!     let mut count = 0i32;
//!     rows.scan(&mut [&mut count]).await.unwrap();
//!     assert_eq!(count, 3);
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod mock_server;

pub use mock_server::{
    MockResponse, MockServerBuilder, MockServerConfig, MockServerError, MockTdsServer,
    RecordedRequest, Request, column,
};
