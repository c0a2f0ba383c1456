//! # tds-auth
//!
//! SQL login credentials and the responses to server authentication
//! challenges.
//!
//! | Challenge | Response |
//! |-----------|----------|
//! | cleartext | the password, NUL-terminated |
//! | MD5 + 4-byte salt | `"md5" + hex(md5(hex(md5(password + user)) + salt))`, NUL-terminated |
//! | SCM, GSS, SSPI | [`AuthError::UnsupportedMethod`] |
//!
//! The password itself travels in LOGIN7, obfuscated by `tds-wire`.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod challenge;
pub mod credentials;
pub mod error;
pub mod provider;
pub mod sql_auth;

pub use challenge::Challenge;
pub use credentials::Credentials;
pub use error::AuthError;
pub use provider::{AuthMethod, AuthProvider};
pub use sql_auth::SqlAuthenticator;
