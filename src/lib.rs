// Leasehold - distributed locks for Rust on Redis
//
// This library re-exports the lock client, leases and retry policies, plus the
// Redis connection configuration they are built on.

// Re-export lock functionality
pub use leasehold_lock::*;

// Re-export Redis configuration
pub use leasehold_redis::{RedisConfig, RedisConfigBuilder, RedisError};

pub use leasehold_lock;
pub use leasehold_redis;

/// Prelude for common imports.
///
/// ```
/// use leasehold::prelude::*;
/// ```
pub mod prelude {
    pub use leasehold_lock::{
        CancellationToken, ExponentialBackoffRetry, FixedIntervalRetry, Lease, LockClient,
        LockConfig, LockError, NoRetry, RetryStrategy,
    };
    pub use leasehold_redis::RedisConfig;
}
