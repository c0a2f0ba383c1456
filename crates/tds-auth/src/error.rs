//! Authentication error types.

use thiserror::Error;

/// Errors that can occur during authentication.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Invalid credentials provided.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// The server asked for a mechanism this client does not implement.
    #[error("unsupported authentication method: {0}")]
    UnsupportedMethod(String),

    /// A challenge payload could not be parsed.
    #[error("malformed authentication challenge: {0}")]
    MalformedChallenge(&'static str),
}
