//! Redis backend using server-side Lua scripts.

use async_trait::async_trait;
use leasehold_redis::{ConnectionManager, RedisConfig};
use redis::Script;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use super::LockStore;
use crate::LockError;

const ACQUIRE_SCRIPT: &str = r#"
    local current = redis.call("get", KEYS[1])
    if current == false then
        redis.call("set", KEYS[1], ARGV[1], "PX", ARGV[2])
        return "OK"
    elseif current == ARGV[1] then
        redis.call("pexpire", KEYS[1], ARGV[2])
        return "OK"
    else
        return false
    end
"#;

const REFRESH_SCRIPT: &str = r#"
    if redis.call("get", KEYS[1]) == ARGV[1] then
        return redis.call("pexpire", KEYS[1], ARGV[2])
    else
        return 0
    end
"#;

const RELEASE_SCRIPT: &str = r#"
    if redis.call("get", KEYS[1]) == ARGV[1] then
        return redis.call("del", KEYS[1])
    else
        return 0
    end
"#;

/// Lock store backed by a single logical Redis endpoint.
///
/// Scripts are sent with `EVALSHA` and loaded on the first `NOSCRIPT` reply.
/// Every script call is bounded by the command timeout and fails with
/// [`LockError::Timeout`] once it passes.
#[derive(Clone)]
pub struct RedisLockStore {
    conn: ConnectionManager,
    command_timeout: Duration,
    acquire: Script,
    refresh: Script,
    release: Script,
}

impl RedisLockStore {
    /// Create a store from an existing connection, using the default
    /// command timeout of [`RedisConfig`].
    pub fn new(conn: ConnectionManager) -> Self {
        Self::with_command_timeout(conn, RedisConfig::default().command_timeout)
    }

    /// Create a store whose script calls give up after `command_timeout`.
    pub fn with_command_timeout(conn: ConnectionManager, command_timeout: Duration) -> Self {
        Self {
            conn,
            command_timeout,
            acquire: Script::new(ACQUIRE_SCRIPT),
            refresh: Script::new(REFRESH_SCRIPT),
            release: Script::new(RELEASE_SCRIPT),
        }
    }

    /// Connect using `config` and create a store.
    pub async fn connect(config: &RedisConfig) -> Result<Self, LockError> {
        let conn = leasehold_redis::connect(config).await?;
        Ok(Self::with_command_timeout(conn, config.command_timeout))
    }

    /// The deadline applied to each script call.
    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }
}

/// Run one store call under `limit`.
async fn bounded<T, F>(limit: Duration, op: &str, call: F) -> Result<T, LockError>
where
    F: Future<Output = redis::RedisResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(reply) => Ok(reply?),
        Err(_) => {
            warn!(op, timeout = ?limit, "Redis command timed out");
            Err(LockError::Timeout)
        }
    }
}

/// PX arguments must be at least one millisecond.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl LockStore for RedisLockStore {
    async fn acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, LockError> {
        let mut conn = self.conn.clone();
        let mut invocation = self.acquire.key(key);
        invocation.arg(token).arg(ttl_millis(ttl));
        let reply: Option<String> =
            bounded(self.command_timeout, "acquire", invocation.invoke_async(&mut conn)).await?;

        debug!(key = %key, acquired = reply.is_some(), "acquire script");
        Ok(reply.as_deref() == Some("OK"))
    }

    async fn refresh(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, LockError> {
        let mut conn = self.conn.clone();
        let mut invocation = self.refresh.key(key);
        invocation.arg(token).arg(ttl_millis(ttl));
        let reply: i64 =
            bounded(self.command_timeout, "refresh", invocation.invoke_async(&mut conn)).await?;

        Ok(reply == 1)
    }

    async fn release(&self, key: &str, token: &str) -> Result<bool, LockError> {
        let mut conn = self.conn.clone();
        let mut invocation = self.release.key(key);
        invocation.arg(token);
        let reply: i64 =
            bounded(self.command_timeout, "release", invocation.invoke_async(&mut conn)).await?;

        Ok(reply == 1)
    }
}
