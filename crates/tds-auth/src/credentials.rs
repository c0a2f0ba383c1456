//! Credential types for authentication.

use std::borrow::Cow;

use tds_wire::Login7;

/// SQL Server login credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: Cow<'static, str>,
    password: Cow<'static, str>,
}

impl Credentials {
    /// Create SQL Server credentials.
    pub fn sql_server(
        username: impl Into<Cow<'static, str>>,
        password: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Login name.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Clear-text password.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Whether a login name is present. Empty credentials mean trusted or SSPI login.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.username.is_empty()
    }

    /// Copy the user name and password into a LOGIN7 request.
    pub fn apply_to(&self, login: &mut Login7) {
        login.username = self.username.to_string();
        login.password = self.password.to_string();
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}
