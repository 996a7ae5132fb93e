//! Distributed Locks Demo
//!
//! Several workers compete for one Redis lock, the winner keeps its lease
//! alive while it works and then releases it.
//!
//! Note: This demo requires Redis to be running
//! Start Redis: docker run -p 6379:6379 redis
//!
//! Run with: RUST_LOG=leasehold_lock=debug cargo run --example redis_lock

use leasehold::prelude::*;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

const WORKERS: usize = 4;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let redis = RedisConfig::from_env().connection_name("leasehold-demo").build();
    let config = LockConfig::from_env().ttl(Duration::from_secs(3)).build();
    let client = LockClient::connect(&redis, config).await?;

    info!("Connected, starting {} workers", WORKERS);

    let mut workers = Vec::new();
    for id in 0..WORKERS {
        let client = client.clone();
        workers.push(tokio::spawn(async move { work(id, client).await }));
    }

    for worker in workers {
        worker.await??;
    }

    // Concurrent callers in one process share a single acquisition
    let retry = || FixedIntervalRetry::new(Duration::from_millis(100), 5);
    let (a, b) = tokio::join!(
        client.singleflight_lock("demo:report", Duration::from_secs(5), Duration::from_secs(1), retry()?),
        client.singleflight_lock("demo:report", Duration::from_secs(5), Duration::from_secs(1), retry()?),
    );
    let (a, b) = (a?, b?);
    info!(same_lease = a.token() == b.token(), "Singleflight acquisition");
    a.unlock().await?;

    Ok(())
}

async fn work(id: usize, client: LockClient) -> Result<(), LockError> {
    let retry = ExponentialBackoffRetry::new(Duration::from_millis(50), Duration::from_secs(1), 0)?;
    let lease = client
        .lock("demo:batch", client.config().ttl, client.config().acquire_timeout, retry)
        .await?;
    let refresher = client.keep_alive(&lease)?;

    info!(worker = id, token = %lease.token(), "Processing batch");
    // Longer than the TTL: only the refresher keeps the lock alive
    tokio::time::sleep(Duration::from_secs(4)).await;

    lease.unlock().await?;
    refresher.await??;
    info!(worker = id, "Batch done");
    Ok(())
}
