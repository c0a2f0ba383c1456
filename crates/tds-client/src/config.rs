//! Client configuration.

use std::time::Duration;

use tds_auth::Credentials;
use tds_pool::PoolConfig;
use tds_tls::{TlsConfig, TlsMode};
use tds_wire::{DEFAULT_PACKET_SIZE, MAX_PACKET_SIZE, MIN_PACKET_SIZE};

use crate::error::{Error, Result};

/// Default SQL Server TCP port.
pub const DEFAULT_PORT: u16 = 1433;

/// Everything needed to open a [`Database`](crate::Database).
///
/// Marked `#[non_exhaustive]`; build it from [`Config::new()`] and the
/// setter methods. Connection strings are not parsed here.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct Config {
    /// Driver name, used in logs and reported as the client library.
    pub driver: String,

    /// Server host name or address.
    pub host: String,

    /// TCP port. `0` resolves the port of [`instance`](Self::instance)
    /// through the SQL Server Browser.
    pub port: u16,

    /// Named instance.
    pub instance: Option<String>,

    /// SQL login name.
    pub user: String,

    /// SQL login password.
    pub password: String,

    /// Initial database.
    pub database: Option<String>,

    /// Application name reported at login.
    pub app_name: String,

    /// Requested packet size.
    pub packet_size: u32,

    /// Bound on TCP connect, TLS handshake and login together.
    pub dial_timeout: Duration,

    /// Default per-query deadline; commands may override it.
    pub query_timeout: Option<Duration>,

    /// Encryption policy.
    pub tls_mode: TlsMode,

    /// Trust anchors, certificate verification and protocol versions.
    pub tls: TlsConfig,

    /// Pool sizing and lifecycle.
    pub pool: PoolConfig,

    /// Set RESET_CONNECTION on the first request after a connection is
    /// reused, instead of running a reset query.
    pub reset_connection: bool,

    /// Routing redirects followed during login.
    pub max_redirects: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            driver: "mssql".into(),
            host: "localhost".into(),
            port: DEFAULT_PORT,
            instance: None,
            user: String::new(),
            password: String::new(),
            database: None,
            app_name: "tds-client".into(),
            #[allow(clippy::cast_possible_truncation)]
            packet_size: DEFAULT_PACKET_SIZE as u32,
            dial_timeout: Duration::from_secs(15),
            query_timeout: None,
            tls_mode: TlsMode::default(),
            tls: TlsConfig::default(),
            pool: PoolConfig::default(),
            reset_connection: false,
            max_redirects: 2,
        }
    }
}

impl Config {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the server host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the TCP port; `0` asks the SQL Server Browser.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Connect to a named instance.
    #[must_use]
    pub fn instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    /// Set SQL login credentials.
    #[must_use]
    pub fn credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = user.into();
        self.password = password.into();
        self
    }

    /// Set the initial database.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the application name.
    #[must_use]
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Set the driver name.
    #[must_use]
    pub fn driver(mut self, name: impl Into<String>) -> Self {
        self.driver = name.into();
        self
    }

    /// Request a packet size.
    #[must_use]
    pub fn packet_size(mut self, size: u32) -> Self {
        self.packet_size = size;
        self
    }

    /// Bound the time spent opening a connection.
    #[must_use]
    pub fn dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    /// Default deadline for every query.
    #[must_use]
    pub fn query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = Some(timeout);
        self
    }

    /// Set the encryption policy.
    #[must_use]
    pub fn tls_mode(mut self, mode: TlsMode) -> Self {
        self.tls_mode = mode;
        self
    }

    /// Replace the TLS settings.
    #[must_use]
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    /// Accept any server certificate.
    #[must_use]
    pub fn skip_verify(mut self, skip: bool) -> Self {
        self.tls = self.tls.skip_verify(skip);
        self
    }

    /// Trust the certificate authorities in a PEM bundle.
    pub fn trust_pem(mut self, pem: &[u8]) -> Result<Self> {
        self.tls = self.tls.add_pem_certificates(pem)?;
        Ok(self)
    }

    /// Replace the pool settings.
    #[must_use]
    pub fn pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Reset reused connections with the RESET_CONNECTION status bit.
    #[must_use]
    pub fn reset_connection(mut self, enabled: bool) -> Self {
        self.reset_connection = enabled;
        self
    }

    /// Limit routing redirects followed during login.
    #[must_use]
    pub fn max_redirects(mut self, max: u8) -> Self {
        self.max_redirects = max;
        self
    }

    /// Login credentials.
    #[must_use]
    pub fn login_credentials(&self) -> Credentials {
        Credentials::sql_server(self.user.clone(), self.password.clone())
    }

    /// Packet size as a byte count.
    #[must_use]
    pub fn packet_bytes(&self) -> usize {
        usize::try_from(self.packet_size).unwrap_or(MAX_PACKET_SIZE)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::Config("host must not be empty".into()));
        }
        if self.port == 0 && self.instance.is_none() {
            return Err(Error::Config(
                "port 0 requires an instance name to resolve".into(),
            ));
        }
        let size = self.packet_bytes();
        if !(MIN_PACKET_SIZE..=MAX_PACKET_SIZE).contains(&size) {
            return Err(Error::Config(format!(
                "packet size {size} outside {MIN_PACKET_SIZE}..={MAX_PACKET_SIZE}"
            )));
        }
        if self.dial_timeout.is_zero() {
            return Err(Error::Config("dial_timeout must be non-zero".into()));
        }
        self.pool.validate()?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 1433);
        assert_eq!(config.packet_size, 4096);
        assert_eq!(config.tls_mode, TlsMode::Auto);
        assert_eq!(config.pool.expand_by, 6);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_methods() {
        let config = Config::new()
            .host("db.internal")
            .port(14330)
            .credentials("sa", "secret")
            .database("orders")
            .app_name("billing")
            .packet_size(8192)
            .query_timeout(Duration::from_secs(5))
            .tls_mode("strict".parse().unwrap())
            .skip_verify(true)
            .reset_connection(true);

        assert_eq!(config.host, "db.internal");
        assert_eq!(config.port, 14330);
        assert_eq!(config.login_credentials().username(), "sa");
        assert_eq!(config.database.as_deref(), Some("orders"));
        assert_eq!(config.packet_bytes(), 8192);
        assert_eq!(config.query_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.tls_mode, TlsMode::Strict);
        assert!(config.tls.skip_verify);
        assert!(config.reset_connection);
    }

    #[test]
    fn test_validation() {
        assert!(Config::new().host("").validate().is_err());
        assert!(Config::new().port(0).validate().is_err());
        assert!(Config::new().port(0).instance("SQLEXPRESS").validate().is_ok());
        assert!(Config::new().packet_size(100).validate().is_err());

        let err = Config::new()
            .pool(PoolConfig::new().init_capacity(5).max_capacity(2))
            .validate()
            .unwrap_err();
        assert!(matches!(err, Error::Pool(_)));
    }

    #[test]
    fn test_trust_pem_rejects_garbage() {
        let pem = b"-----BEGIN CERTIFICATE-----\n!!!!\n-----END CERTIFICATE-----\n";
        assert!(Config::new().trust_pem(pem).is_err());
    }
}
