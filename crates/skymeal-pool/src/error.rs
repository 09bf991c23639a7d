//! Pool error types.

use std::time::Duration;

use thiserror::Error;

/// Boxed error produced by a [`ResourceFactory`](crate::ResourceFactory).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by the pool to its callers.
///
/// Release and shutdown never return errors; failures on those paths are
/// logged and counted in [`PoolMetrics`](crate::PoolMetrics) instead.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// The factory failed while populating the pool. No pool was created.
    #[error("unable to initialize pool: created {created} of {capacity} resources: {source}")]
    Construction {
        /// Resources successfully created before the failure.
        created: usize,
        /// Requested pool capacity.
        capacity: usize,
        /// Underlying factory error.
        #[source]
        source: BoxError,
    },

    /// No resource became idle before the deadline.
    #[error("timeout while waiting for a pooled resource after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The pool has been shut down.
    #[error("pool is shut down")]
    PoolClosed,

    /// The waiter was cancelled before a resource became idle.
    #[error("cancelled while waiting for a pooled resource")]
    Cancelled,

    /// Invalid pool configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl PoolError {
    /// Returns true if this error is an acquire timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Returns true if retrying the same operation may succeed.
    ///
    /// Only timeouts are retryable; a closed pool stays closed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.is_timeout()
    }

    pub(crate) fn construction(
        created: usize,
        capacity: usize,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Construction {
            created,
            capacity,
            source: source.into(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_mentions_timeout() {
        let err = PoolError::Timeout(Duration::from_millis(1000));
        let message = err.to_string();
        assert!(message.to_lowercase().starts_with("timeout"));
        assert!(message.contains("1000ms"));
        assert!(err.is_timeout());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_closed_is_not_retryable() {
        assert!(!PoolError::PoolClosed.is_retryable());
        assert!(!PoolError::Cancelled.is_retryable());
    }

    #[test]
    fn test_construction_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = PoolError::construction(2, 3, io);
        assert_eq!(
            err.to_string(),
            "unable to initialize pool: created 2 of 3 resources: refused"
        );
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "refused");
    }
}
