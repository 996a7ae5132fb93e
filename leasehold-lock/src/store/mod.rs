//! Atomic lock contracts and their backends.

use async_trait::async_trait;
use std::time::Duration;

use crate::LockError;

mod memory;
mod redis_store;

pub use memory::MemoryLockStore;
pub use redis_store::RedisLockStore;

/// The three check-and-mutate operations a lock backend must perform
/// atomically.
///
/// Each call is one indivisible step at the store. Composing them from
/// separate reads and writes reintroduces the races the token check exists
/// to prevent.
#[async_trait]
pub trait LockStore: Send + Sync + 'static {
    /// Map `key` to `token` with expiry `ttl` if the key is free or already
    /// holds `token`. Returns whether the caller now owns the key.
    async fn acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, LockError>;

    /// Reset the expiry of `key` to `ttl` if it still holds `token`.
    async fn refresh(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, LockError>;

    /// Delete `key` if it still holds `token`.
    async fn release(&self, key: &str, token: &str) -> Result<bool, LockError>;
}
