//! Lock error types.

use std::sync::Arc;
use thiserror::Error;

/// Distributed lock errors.
///
/// Errors are `Clone` so that every caller collapsed onto one in-flight
/// acquisition receives the same outcome.
#[derive(Debug, Clone, Error)]
pub enum LockError {
    /// The store reports the key is held by another owner.
    #[error("Failed to acquire lock: {key} is held by another owner")]
    AcquireFailed { key: String },

    /// The retry strategy gave up; `last` is the final attempt's failure.
    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<LockError>,
    },

    /// Token mismatch on refresh or release: expired, taken over, or never held.
    #[error("Lock not held")]
    NotHeld,

    /// The caller cancelled the operation.
    #[error("Lock operation cancelled")]
    Cancelled,

    /// A deadline expired before the store replied.
    #[error("Lock timeout")]
    Timeout,

    #[error("Redis error: {0}")]
    Redis(Arc<redis::RedisError>),

    /// Invalid lock or retry configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    /// Any other store failure.
    #[error("Store error: {0}")]
    Store(String),
}

impl LockError {
    /// Whether the outcome of the store call is unknown because of a deadline.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout => true,
            Self::Redis(e) => e.is_timeout(),
            _ => false,
        }
    }

    /// Whether this lease has been lost.
    pub fn is_not_held(&self) -> bool {
        matches!(self, Self::NotHeld)
    }

    /// Whether `lock` should consult its retry strategy after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::AcquireFailed { .. } | Self::Timeout | Self::Redis(_) | Self::Store(_)
        )
    }
}

impl From<redis::RedisError> for LockError {
    fn from(err: redis::RedisError) -> Self {
        Self::Redis(Arc::new(err))
    }
}

impl From<leasehold_redis::RedisError> for LockError {
    fn from(err: leasehold_redis::RedisError) -> Self {
        match err {
            leasehold_redis::RedisError::Redis(e) => Self::from(e),
            leasehold_redis::RedisError::Timeout => Self::Timeout,
            other => Self::Store(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for LockError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            Self::Cancelled
        } else {
            Self::Store(format!("in-flight acquisition aborted: {}", err))
        }
    }
}

/// Invalid retry strategy or lock configuration parameters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("interval must be positive, got {0:?}")]
    InvalidInterval(std::time::Duration),

    #[error("max interval {max:?} is shorter than initial interval {initial:?}")]
    InvalidMaxInterval {
        max: std::time::Duration,
        initial: std::time::Duration,
    },

    #[error("lease TTL must be positive")]
    InvalidTtl,

    #[error("timeout must be positive, got {0:?}")]
    InvalidTimeout(std::time::Duration),

    #[error("refresh interval {interval:?} must be positive and shorter than TTL {ttl:?}")]
    InvalidRefreshInterval {
        interval: std::time::Duration,
        ttl: std::time::Duration,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_retries_exhausted_keeps_source() {
        let err = LockError::RetriesExhausted {
            attempts: 4,
            last: Box::new(LockError::AcquireFailed { key: "orders".into() }),
        };

        assert_eq!(
            err.to_string(),
            "Retries exhausted after 4 attempts: Failed to acquire lock: orders is held by another owner"
        );
        let source = err.source().unwrap();
        assert!(source.to_string().contains("orders"));
    }

    #[test]
    fn test_classification() {
        assert!(LockError::Timeout.is_timeout());
        assert!(!LockError::NotHeld.is_timeout());
        assert!(LockError::NotHeld.is_not_held());
        assert!(!LockError::NotHeld.is_retryable());
        assert!(!LockError::Cancelled.is_retryable());
        assert!(LockError::AcquireFailed { key: "k".into() }.is_retryable());
        assert!(LockError::Store("down".into()).is_retryable());
        assert!(!LockError::from(ConfigError::InvalidTtl).is_retryable());
    }

    #[test]
    fn test_from_redis_crate_error() {
        let err: LockError = leasehold_redis::RedisError::Timeout.into();
        assert!(matches!(err, LockError::Timeout));

        let err: LockError = leasehold_redis::RedisError::Connection("refused".into()).into();
        assert!(matches!(err, LockError::Store(_)));
    }
}
