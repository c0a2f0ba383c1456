//! Authentication challenges a server may raise during login.
//!
//! A challenge arrives as the payload of an SSPI token (0xED). Its first
//! byte selects the mechanism; MD5 is followed by a 4-byte salt.

use bytes::Buf;

use crate::error::AuthError;

const CLEARTEXT: u8 = 3;
const MD5: u8 = 5;
const SCM: u8 = 6;
const GSS: u8 = 7;
const SSPI: u8 = 9;

/// A server authentication request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Challenge {
    /// Send the password as is.
    Cleartext,
    /// Send the salted double MD5 digest.
    Md5 {
        /// Per-connection salt.
        salt: [u8; 4],
    },
    /// SCM credential exchange.
    Scm,
    /// GSSAPI negotiation.
    Gss,
    /// Windows SSPI negotiation.
    Sspi,
}

impl Challenge {
    /// Parse an SSPI token payload.
    pub fn decode(mut src: &[u8]) -> Result<Self, AuthError> {
        if !src.has_remaining() {
            return Err(AuthError::MalformedChallenge("empty challenge"));
        }
        match src.get_u8() {
            CLEARTEXT => Ok(Self::Cleartext),
            MD5 => {
                if src.remaining() < 4 {
                    return Err(AuthError::MalformedChallenge("MD5 salt is 4 bytes"));
                }
                let mut salt = [0u8; 4];
                src.copy_to_slice(&mut salt);
                Ok(Self::Md5 { salt })
            }
            SCM => Ok(Self::Scm),
            GSS => Ok(Self::Gss),
            SSPI => Ok(Self::Sspi),
            _ => Err(AuthError::MalformedChallenge("unknown mechanism")),
        }
    }

    /// Mechanism name for logs and errors.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cleartext => "cleartext",
            Self::Md5 { .. } => "md5",
            Self::Scm => "scm",
            Self::Gss => "gss",
            Self::Sspi => "sspi",
        }
    }
}
