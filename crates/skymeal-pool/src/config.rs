//! Pool configuration.

use std::time::Duration;

use crate::error::PoolError;

/// Default number of resources held by a pool.
pub const DEFAULT_CAPACITY: usize = 3;

/// Default upper bound for [`Pool::acquire`](crate::Pool::acquire).
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_millis(3000);

/// Configuration for a resource pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of resources created at construction. Fixed for the pool's lifetime.
    pub capacity: usize,

    /// Wait bound used by [`Pool::acquire`](crate::Pool::acquire).
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
        }
    }
}

impl PoolConfig {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `key=value` pairs into a configuration.
    ///
    /// Pairs are separated by `;` or newlines, so both inline strings and
    /// `.env`-style files are accepted:
    /// ```text
    /// DB_POOL_SIZE=5
    /// DB_POOL_TIMEOUT_MS=1500
    /// ```
    /// Lines starting with `#` are comments. Keys are case-insensitive.
    pub fn from_properties(input: &str) -> Result<Self, PoolError> {
        let mut config = Self::default();

        for part in input.split(['\n', ';']) {
            let part = part.trim();
            if part.is_empty() || part.starts_with('#') {
                continue;
            }

            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| PoolError::Config(format!("invalid key-value: {part}")))?;

            let key = key.trim().to_lowercase();
            let value = value.trim().trim_matches('"');

            match key.as_str() {
                "capacity" | "pool size" | "db_pool_size" => {
                    config.capacity = value
                        .parse()
                        .map_err(|_| PoolError::Config(format!("invalid capacity: {value}")))?;
                }
                "acquire timeout" | "db_pool_timeout_ms" => {
                    let millis: u64 = value
                        .parse()
                        .map_err(|_| PoolError::Config(format!("invalid timeout: {value}")))?;
                    config.acquire_timeout = Duration::from_millis(millis);
                }
                _ => {
                    tracing::debug!(key = key, "ignoring unknown pool option");
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Check that the configuration describes a usable pool.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.capacity == 0 {
            return Err(PoolError::Config(
                "capacity must be greater than zero".to_string(),
            ));
        }
        if self.capacity > tokio::sync::Semaphore::MAX_PERMITS {
            return Err(PoolError::Config(format!(
                "capacity {} exceeds the maximum of {}",
                self.capacity,
                tokio::sync::Semaphore::MAX_PERMITS
            )));
        }
        Ok(())
    }

    /// Set the pool capacity.
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the default acquire timeout.
    #[must_use]
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }
}
