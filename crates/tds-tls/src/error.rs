//! TLS-related error types.

use tds_wire::EncryptionLevel;
use thiserror::Error;

/// Errors that can occur while negotiating or running TLS.
#[derive(Debug, Error)]
pub enum TlsError {
    /// TLS handshake failed.
    #[error("TLS handshake failed: {0}")]
    HandshakeFailed(String),

    /// A trusted certificate could not be parsed or added to the root store.
    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    /// The host name is not usable for SNI or certificate validation.
    #[error("invalid server name: {0}")]
    InvalidServerName(String),

    /// TLS configuration error.
    #[error("TLS configuration error: {0}")]
    Configuration(String),

    /// IO error during TLS operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Rustls error.
    #[error("rustls error: {0}")]
    Rustls(#[from] rustls::Error),

    /// The client asked for encryption and the server declined it.
    #[error("encryption required but server answered {server:?}")]
    EncryptionRequired {
        /// Stance from the server's PRELOGIN response.
        server: EncryptionLevel,
    },

    /// The server insists on encryption and the client disabled it.
    #[error("server requires encryption but TLS is disabled")]
    EncryptionRefused,

    /// Unexpected packet while the handshake was framed in PRELOGIN.
    #[error("unexpected packet type 0x{0:02X} during TLS handshake")]
    UnexpectedPacket(u8),
}
