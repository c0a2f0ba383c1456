//! # tds-tls
//!
//! TLS for TDS sessions.
//!
//! Two placements of the handshake are supported:
//!
//! ### Classical (TDS 7.x)
//! ```text
//! TCP Connect → PreLogin (cleartext) → TLS Handshake in PRELOGIN packets → Login7 (encrypted)
//! ```
//! After LOGIN7 the session either stays on TLS or, when only the login
//! was to be protected, drops back to the raw socket.
//!
//! ### Strict (TDS 8.0)
//! ```text
//! TCP Connect → TLS Handshake (ALPN tds/8.0) → PreLogin → Login7 → ...
//! ```
//!
//! Trust is decided by the configured certificate authorities, falling
//! back to the Mozilla root store. `skip_verify` accepts any certificate
//! and logs a warning.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod connector;
pub mod error;
pub mod prelogin_wrapper;

use std::fmt;
use std::str::FromStr;

use tds_wire::EncryptionLevel;

pub use config::{TDS8_ALPN, TlsConfig};
pub use connector::TlsConnector;
pub use error::TlsError;
pub use prelogin_wrapper::TlsPreloginWrapper;

pub use tokio_rustls::client::TlsStream;

/// Client encryption preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TlsMode {
    /// Never encrypt; fails if the server requires it.
    Disable,
    /// Encrypt the whole session; fails if the server cannot.
    Enable,
    /// TLS on the raw socket before any TDS traffic (TDS 8.0).
    Strict,
    /// Encrypt the login, and the session too if the server asks.
    #[default]
    Auto,
}

/// How much of the session ends up encrypted after PRELOGIN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionScope {
    /// Nothing is encrypted.
    None,
    /// Only the LOGIN7 exchange is encrypted.
    LoginOnly,
    /// Every packet after PRELOGIN is encrypted.
    Session,
}

impl TlsMode {
    /// Stance advertised in the PRELOGIN request.
    #[must_use]
    pub fn prelogin_encryption(self) -> EncryptionLevel {
        match self {
            Self::Disable => EncryptionLevel::NotSupported,
            Self::Enable | Self::Strict => EncryptionLevel::On,
            Self::Auto => EncryptionLevel::Off,
        }
    }

    /// Whether the handshake runs on the raw socket before PRELOGIN.
    #[must_use]
    pub fn is_tls_first(self) -> bool {
        matches!(self, Self::Strict)
    }

    /// Whether a session without encryption is unacceptable.
    #[must_use]
    pub fn requires_encryption(self) -> bool {
        matches!(self, Self::Enable | Self::Strict)
    }

    /// Combine this preference with the server's PRELOGIN answer.
    pub fn negotiate(self, server: EncryptionLevel) -> Result<EncryptionScope, TlsError> {
        use EncryptionLevel::{NotSupported, Off, On, Required};

        match (self, server) {
            (Self::Strict, _) => Ok(EncryptionScope::Session),
            (Self::Disable, NotSupported | Off) => Ok(EncryptionScope::None),
            (Self::Disable, On | Required) => Err(TlsError::EncryptionRefused),
            (Self::Enable, On | Required) => Ok(EncryptionScope::Session),
            (Self::Enable, Off | NotSupported) => Err(TlsError::EncryptionRequired { server }),
            (Self::Auto, Off) => Ok(EncryptionScope::LoginOnly),
            (Self::Auto, On | Required) => Ok(EncryptionScope::Session),
            (Self::Auto, NotSupported) => Ok(EncryptionScope::None),
        }
    }
}

impl FromStr for TlsMode {
    type Err = TlsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disable" | "false" | "no" => Ok(Self::Disable),
            "enable" | "true" | "yes" => Ok(Self::Enable),
            "strict" | "only" => Ok(Self::Strict),
            "auto" | "" => Ok(Self::Auto),
            other => Err(TlsError::Configuration(format!("unknown TLS mode {other:?}"))),
        }
    }
}

impl fmt::Display for TlsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disable => "disable",
            Self::Enable => "enable",
            Self::Strict => "strict",
            Self::Auto => "auto",
        })
    }
}
