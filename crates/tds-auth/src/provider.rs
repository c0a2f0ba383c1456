//! Authentication provider trait.

use crate::challenge::Challenge;
use crate::error::AuthError;
use tds_wire::Login7;

/// Which authentication flow a provider drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// User name and password carried in LOGIN7.
    SqlServer,
}

/// Produces login credentials and answers server challenges.
pub trait AuthProvider: Send + Sync {
    /// Get the authentication method this provider uses.
    fn method(&self) -> AuthMethod;

    /// Fill the credential fields of the LOGIN7 request.
    fn prepare_login(&self, login: &mut Login7);

    /// Answer a challenge raised before LOGINACK.
    ///
    /// The returned bytes are sent back in an SSPI packet.
    fn respond(&self, challenge: &Challenge) -> Result<Vec<u8>, AuthError>;
}
