//! SQL Server authentication.

use md5::{Digest, Md5};
use tds_wire::Login7;

use crate::challenge::Challenge;
use crate::credentials::Credentials;
use crate::error::AuthError;
use crate::provider::{AuthMethod, AuthProvider};

/// Authenticates with a SQL login.
#[derive(Debug, Clone)]
pub struct SqlAuthenticator {
    credentials: Credentials,
}

impl SqlAuthenticator {
    /// Create an authenticator for the given credentials.
    #[must_use]
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }

    /// Salted MD5 response: `"md5" + hex(md5(hex(md5(password + user)) + salt))`.
    #[must_use]
    pub fn md5_response(username: &str, password: &str, salt: [u8; 4]) -> String {
        let inner = Md5::new()
            .chain_update(password.as_bytes())
            .chain_update(username.as_bytes())
            .finalize();
        let outer = Md5::new()
            .chain_update(format!("{inner:x}").as_bytes())
            .chain_update(salt)
            .finalize();
        format!("md5{outer:x}")
    }
}

impl AuthProvider for SqlAuthenticator {
    fn method(&self) -> AuthMethod {
        AuthMethod::SqlServer
    }

    fn prepare_login(&self, login: &mut Login7) {
        self.credentials.apply_to(login);
    }

    fn respond(&self, challenge: &Challenge) -> Result<Vec<u8>, AuthError> {
        tracing::debug!(mechanism = challenge.name(), "answering authentication challenge");

        let mut response = match challenge {
            Challenge::Cleartext => self.credentials.password().as_bytes().to_vec(),
            Challenge::Md5 { salt } => Self::md5_response(
                self.credentials.username(),
                self.credentials.password(),
                *salt,
            )
            .into_bytes(),
            other => return Err(AuthError::UnsupportedMethod(other.name().into())),
        };
        response.push(0);
        Ok(response)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn auth() -> SqlAuthenticator {
        SqlAuthenticator::new(Credentials::sql_server("md5_user", "md5_pass"))
    }

    #[test]
    fn test_md5_known_answer() {
        let inner = format!("{:x}", Md5::digest(b"md5_passmd5_user"));
        let mut outer_input = inner.into_bytes();
        outer_input.extend_from_slice(&[0x01, 0x02, 0x03, 0x04]);
        let expected = format!("md5{:x}", Md5::digest(&outer_input));

        let got = SqlAuthenticator::md5_response("md5_user", "md5_pass", [1, 2, 3, 4]);
        assert_eq!(got, expected);
        assert_eq!(got.len(), 35);
    }

    #[test]
    fn test_md5_depends_on_salt() {
        let a = SqlAuthenticator::md5_response("u", "p", [0, 0, 0, 0]);
        let b = SqlAuthenticator::md5_response("u", "p", [0, 0, 0, 1]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_cleartext_response_is_nul_terminated() {
        let response = auth().respond(&Challenge::Cleartext).unwrap();
        assert_eq!(response, b"md5_pass\0");
    }

    #[test]
    fn test_md5_response_bytes() {
        let response = auth().respond(&Challenge::Md5 { salt: [9, 8, 7, 6] }).unwrap();
        assert!(response.starts_with(b"md5"));
        assert_eq!(response.last(), Some(&0));
    }

    #[test]
    fn test_unsupported_mechanisms() {
        for challenge in [Challenge::Scm, Challenge::Gss, Challenge::Sspi] {
            assert!(matches!(
                auth().respond(&challenge),
                Err(AuthError::UnsupportedMethod(_))
            ));
        }
    }

    #[test]
    fn test_prepare_login() {
        let mut login = Login7::new();
        auth().prepare_login(&mut login);
        assert_eq!(login.username, "md5_user");
    }
}
