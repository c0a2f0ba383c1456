//! Pool configuration.

use std::sync::Arc;
use std::time::Duration;

/// Default number of slots added when the pool expands.
pub const DEFAULT_EXPAND_BY: u32 = 6;

/// Configuration for the connection pool.
///
/// Marked `#[non_exhaustive]`; build it from [`Default::default()`] and the
/// setter methods.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Slots at open. That many connections are opened up front.
    pub init_capacity: u32,

    /// Upper bound on capacity.
    pub max_capacity: u32,

    /// Slots added per expansion, clamped to `max_capacity`.
    pub expand_by: u32,

    /// How long an acquire waits for a free slot before expanding.
    pub soft_wait: Duration,

    /// Idle connections older than this are closed by the reaper.
    pub idle_timeout: Duration,

    /// Connections older than this are closed instead of reused.
    pub max_lifetime: Duration,

    /// Period of the reaper task.
    pub reaper_interval: Duration,

    /// Statement run on every released connection. Failure closes it.
    pub reset_query: Option<Arc<str>>,

    /// Give up acquiring after this long. `None` waits until cancelled.
    pub acquire_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            init_capacity: 1,
            max_capacity: 10,
            expand_by: DEFAULT_EXPAND_BY,
            soft_wait: Duration::from_millis(5),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
            reaper_interval: Duration::from_secs(30),
            reset_query: None,
            acquire_timeout: None,
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the initial capacity.
    #[must_use]
    pub fn init_capacity(mut self, count: u32) -> Self {
        self.init_capacity = count;
        self
    }

    /// Set the maximum capacity.
    #[must_use]
    pub fn max_capacity(mut self, count: u32) -> Self {
        self.max_capacity = count;
        self
    }

    /// Set the expansion step.
    #[must_use]
    pub fn expand_by(mut self, count: u32) -> Self {
        self.expand_by = count;
        self
    }

    /// Set the soft wait before expanding.
    #[must_use]
    pub fn soft_wait(mut self, wait: Duration) -> Self {
        self.soft_wait = wait;
        self
    }

    /// Set the idle connection timeout.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the maximum connection lifetime.
    #[must_use]
    pub fn max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    /// Set the reaper period.
    #[must_use]
    pub fn reaper_interval(mut self, interval: Duration) -> Self {
        self.reaper_interval = interval;
        self
    }

    /// Run `query` on every released connection.
    #[must_use]
    pub fn reset_query(mut self, query: impl Into<Arc<str>>) -> Self {
        self.reset_query = Some(query.into());
        self
    }

    /// Bound the time spent acquiring.
    #[must_use]
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), crate::error::PoolError> {
        if self.max_capacity == 0 {
            return Err(crate::error::PoolError::Configuration(
                "max_capacity must be greater than 0".into(),
            ));
        }
        if self.init_capacity > self.max_capacity {
            return Err(crate::error::PoolError::Configuration(
                "init_capacity cannot be greater than max_capacity".into(),
            ));
        }
        if self.reaper_interval.is_zero() {
            return Err(crate::error::PoolError::Configuration(
                "reaper_interval must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PoolConfig::default();
        assert_eq!(config.init_capacity, 1);
        assert_eq!(config.max_capacity, 10);
        assert_eq!(config.expand_by, 6);
        assert!(config.reset_query.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder_methods() {
        let config = PoolConfig::new()
            .init_capacity(2)
            .max_capacity(20)
            .expand_by(3)
            .soft_wait(Duration::from_millis(50))
            .idle_timeout(Duration::from_secs(120))
            .max_lifetime(Duration::from_secs(3600))
            .reset_query("EXEC sp_reset_connection");

        assert_eq!(config.init_capacity, 2);
        assert_eq!(config.max_capacity, 20);
        assert_eq!(config.expand_by, 3);
        assert_eq!(config.soft_wait, Duration::from_millis(50));
        assert_eq!(config.idle_timeout, Duration::from_secs(120));
        assert_eq!(config.max_lifetime, Duration::from_secs(3600));
        assert_eq!(config.reset_query.as_deref(), Some("EXEC sp_reset_connection"));
    }

    #[test]
    fn test_config_validation_init_greater_than_max() {
        let result = PoolConfig::new().init_capacity(20).max_capacity(10).validate();
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("init_capacity cannot be greater than max_capacity")
        );
    }

    #[test]
    fn test_config_validation_zero_max() {
        let mut config = PoolConfig::new();
        config.max_capacity = 0;
        config.init_capacity = 0;
        assert!(
            config
                .validate()
                .unwrap_err()
                .to_string()
                .contains("max_capacity must be greater than 0")
        );
    }

    #[test]
    fn test_config_equal_init_max() {
        assert!(PoolConfig::new().init_capacity(5).max_capacity(5).validate().is_ok());
    }
}
