//! Connection setup for lock stores.

use redis::aio::ConnectionManager;
use tracing::{debug, info};

use crate::{RedisConfig, RedisError, Result};

/// Open a reconnecting, multiplexed connection described by `config`.
///
/// The returned [`ConnectionManager`] is cheap to clone; every clone shares
/// the same underlying connection and transparently reconnects after a drop.
/// The server is pinged before returning so a bad URL or credentials fail
/// here instead of on the first lock call.
pub async fn connect(config: &RedisConfig) -> Result<ConnectionManager> {
    config.validate()?;

    let client = redis::Client::open(config.connection_url())
        .map_err(|e| RedisError::Connection(e.to_string()))?;

    let mut conn = tokio::time::timeout(config.connection_timeout, client.get_connection_manager())
        .await
        .map_err(|_| RedisError::Timeout)?
        .map_err(|e| RedisError::Connection(e.to_string()))?;

    if let Some(name) = &config.connection_name {
        let _: () = redis::cmd("CLIENT")
            .arg("SETNAME")
            .arg(name)
            .query_async(&mut conn)
            .await?;
        debug!(name = %name, "Redis connection named");
    }

    ping(&mut conn, config).await?;

    info!(
        url = %config.url,
        database = ?config.database,
        "Redis connection established"
    );

    Ok(conn)
}

/// Check that the server answers within the configured command timeout.
pub async fn ping(conn: &mut ConnectionManager, config: &RedisConfig) -> Result<()> {
    let pong: String = tokio::time::timeout(config.command_timeout, redis::cmd("PING").query_async(conn))
        .await
        .map_err(|_| RedisError::Timeout)?
        .map_err(|e| RedisError::Connection(e.to_string()))?;

    if pong == "PONG" {
        Ok(())
    } else {
        Err(RedisError::Connection(format!("unexpected PING reply: {}", pong)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_rejects_invalid_url() {
        let config = RedisConfig::new("http://localhost:6379");
        let err = connect(&config).await.unwrap_err();
        assert!(matches!(err, RedisError::Config(_)));
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_connect_and_ping() {
        let config = RedisConfig::from_env().connection_name("leasehold-test").build();
        let mut conn = connect(&config).await.unwrap();
        ping(&mut conn, &config).await.unwrap();
    }
}
