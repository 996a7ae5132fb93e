//! Lock acquisition.

use leasehold_redis::RedisConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::singleflight::Singleflight;
use crate::{Lease, LockConfig, LockError, LockStore, RedisLockStore, RetryStrategy};

/// Entry point for acquiring distributed locks.
///
/// Cheap to clone; clones share the store connection and the in-process
/// deduplication state.
///
/// # Examples
///
/// ```rust,ignore
/// use leasehold_lock::{FixedIntervalRetry, LockClient, LockConfig};
/// use leasehold_redis::RedisConfig;
/// use std::time::Duration;
///
/// let client = LockClient::connect(&RedisConfig::from_env().build(), LockConfig::default()).await?;
///
/// let retry = FixedIntervalRetry::new(Duration::from_millis(100), 10)?;
/// let lease = client
///     .lock("invoice:42", Duration::from_secs(30), Duration::from_secs(1), retry)
///     .await?;
///
/// // Critical section
///
/// lease.unlock().await?;
/// ```
#[derive(Clone)]
pub struct LockClient {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn LockStore>,
    config: LockConfig,
    flight: Singleflight<Lease>,
}

impl LockClient {
    /// Create a client over `store` with default configuration.
    pub fn new(store: impl LockStore) -> Self {
        Self::with_config(store, LockConfig::default())
    }

    /// Create a client over `store`.
    pub fn with_config(store: impl LockStore, config: LockConfig) -> Self {
        Self::from_shared(Arc::new(store), config)
    }

    /// Create a client over a store shared with other components.
    pub fn from_shared(store: Arc<dyn LockStore>, config: LockConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                config,
                flight: Singleflight::default(),
            }),
        }
    }

    /// Connect to Redis and create a client.
    pub async fn connect(redis: &RedisConfig, config: LockConfig) -> Result<Self, LockError> {
        let store = RedisLockStore::connect(redis).await?;
        Ok(Self::with_config(store, config))
    }

    /// Get the configuration.
    pub fn config(&self) -> &LockConfig {
        &self.inner.config
    }

    /// Make a single acquisition attempt.
    ///
    /// Fails with [`LockError::AcquireFailed`] if another owner holds `key`.
    /// Store errors are returned as-is.
    pub async fn try_lock(&self, key: impl Into<String>, ttl: Duration) -> Result<Lease, LockError> {
        let key = key.into();
        let token = Uuid::new_v4().to_string();

        if self.inner.store.acquire(&key, &token, ttl).await? {
            info!(key = %key, "Acquired lock");
            Ok(self.lease(key, token, ttl))
        } else {
            debug!(key = %key, "Failed to acquire lock (already held)");
            Err(LockError::AcquireFailed { key })
        }
    }

    /// Acquire `key`, retrying according to `retry`.
    ///
    /// Each attempt mints a fresh token and is bounded by `timeout`. Contention,
    /// a missed deadline and store errors all count as a failed attempt; when
    /// `retry` gives up the last failure is returned inside
    /// [`LockError::RetriesExhausted`].
    ///
    /// An attempt that succeeds at the store after its deadline has passed
    /// leaves an orphaned entry that nobody holds; it expires after `ttl`.
    pub async fn lock<R>(
        &self,
        key: impl Into<String>,
        ttl: Duration,
        timeout: Duration,
        retry: R,
    ) -> Result<Lease, LockError>
    where
        R: RetryStrategy,
    {
        self.lock_cancellable(key, ttl, timeout, retry, &CancellationToken::new())
            .await
    }

    /// [`lock`](LockClient::lock) that gives up with [`LockError::Cancelled`]
    /// as soon as `cancel` fires, including during a retry wait.
    pub async fn lock_cancellable<R>(
        &self,
        key: impl Into<String>,
        ttl: Duration,
        timeout: Duration,
        mut retry: R,
        cancel: &CancellationToken,
    ) -> Result<Lease, LockError>
    where
        R: RetryStrategy,
    {
        let key = key.into();
        let mut attempts: u32 = 0;

        loop {
            attempts = attempts.saturating_add(1);
            let token = Uuid::new_v4().to_string();

            let failure = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(LockError::Cancelled),
                outcome = time::timeout(timeout, self.inner.store.acquire(&key, &token, ttl)) => {
                    match outcome {
                        Ok(Ok(true)) => {
                            info!(key = %key, attempts, "Acquired lock");
                            return Ok(self.lease(key, token, ttl));
                        }
                        Ok(Ok(false)) => LockError::AcquireFailed { key: key.clone() },
                        Ok(Err(e)) => e,
                        Err(_) => LockError::Timeout,
                    }
                }
            };

            if !failure.is_retryable() {
                return Err(failure);
            }

            let Some(interval) = retry.next() else {
                warn!(key = %key, attempts, error = %failure, "Giving up on lock");
                return Err(LockError::RetriesExhausted {
                    attempts,
                    last: Box::new(failure),
                });
            };

            debug!(key = %key, attempts, ?interval, error = %failure, "Lock attempt failed, retrying");

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(LockError::Cancelled),
                _ = time::sleep(interval) => {}
            }
        }
    }

    /// [`lock`](LockClient::lock), collapsing concurrent calls for the same
    /// key in this process into one acquisition whose outcome every caller
    /// receives.
    pub async fn singleflight_lock<R>(
        &self,
        key: impl Into<String>,
        ttl: Duration,
        timeout: Duration,
        retry: R,
    ) -> Result<Lease, LockError>
    where
        R: RetryStrategy + Send + 'static,
    {
        self.singleflight_lock_cancellable(key, ttl, timeout, retry, &CancellationToken::new())
            .await
    }

    /// [`singleflight_lock`](LockClient::singleflight_lock) with a
    /// cancellation signal.
    ///
    /// The shared acquisition runs under the signal of the caller that
    /// started it. Any other caller firing its own signal stops waiting
    /// without affecting the shared attempt.
    pub async fn singleflight_lock_cancellable<R>(
        &self,
        key: impl Into<String>,
        ttl: Duration,
        timeout: Duration,
        retry: R,
        cancel: &CancellationToken,
    ) -> Result<Lease, LockError>
    where
        R: RetryStrategy + Send + 'static,
    {
        let key = key.into();
        let (call, started) = self.inner.flight.work(&key, || {
            let client = self.clone();
            let key = key.clone();
            let cancel = cancel.clone();
            async move {
                client
                    .lock_cancellable(key, ttl, timeout, retry, &cancel)
                    .await
            }
        });

        if started {
            debug!(key = %key, "Started shared acquisition");
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(LockError::Cancelled),
            outcome = call => outcome,
        }
    }

    /// Acquire `key` with the configured TTL, deadline and retry policy.
    ///
    /// Fails with [`LockError::InvalidConfig`] before contacting the store if
    /// the configuration cannot describe a renewable lease.
    pub async fn acquire(&self, key: impl Into<String>) -> Result<Lease, LockError> {
        let config = &self.inner.config;
        config.validate()?;
        let retry = config.retry_strategy()?;
        self.lock(key, config.ttl, config.acquire_timeout, retry).await
    }

    /// Refresh `lease` in the background with the configured period and deadline.
    pub fn keep_alive(&self, lease: &Lease) -> Result<JoinHandle<Result<(), LockError>>, LockError> {
        let config = &self.inner.config;
        config.validate()?;
        Ok(lease.spawn_auto_refresh(config.effective_refresh_interval(), config.refresh_timeout))
    }

    fn lease(&self, key: String, token: String, ttl: Duration) -> Lease {
        Lease::new(Arc::clone(&self.inner.store), key, token, ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ConfigError, FixedIntervalRetry, MemoryLockStore, NoRetry};
    use async_trait::async_trait;
    use futures::future::join_all;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts acquire calls and optionally delays or fails them.
    #[derive(Default)]
    struct ScriptedStore {
        inner: MemoryLockStore,
        acquires: AtomicUsize,
        delay: Option<Duration>,
        fail_first: usize,
    }

    #[async_trait]
    impl LockStore for ScriptedStore {
        async fn acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, LockError> {
            let n = self.acquires.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                time::sleep(delay).await;
            }
            if n < self.fail_first {
                return Err(LockError::Store("connection reset".to_string()));
            }
            self.inner.acquire(key, token, ttl).await
        }

        async fn refresh(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, LockError> {
            self.inner.refresh(key, token, ttl).await
        }

        async fn release(&self, key: &str, token: &str) -> Result<bool, LockError> {
            self.inner.release(key, token).await
        }
    }

    fn fixed(max_retries: u32) -> FixedIntervalRetry {
        FixedIntervalRetry::new(Duration::from_millis(100), max_retries).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_lock_is_exclusive_until_ttl() {
        let client = LockClient::new(MemoryLockStore::new());
        let ttl = Duration::from_secs(10);

        let first = client.try_lock("k", ttl).await.unwrap();
        let second = client.try_lock("k", ttl).await;
        assert!(matches!(second, Err(LockError::AcquireFailed { ref key }) if key == "k"));

        time::sleep(Duration::from_secs(11)).await;
        let third = client.try_lock("k", ttl).await.unwrap();
        assert_ne!(first.token(), third.token());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_attempts_exactly_retries_plus_one() {
        let store = Arc::new(ScriptedStore::default());
        let client = LockClient::from_shared(store.clone(), LockConfig::default());

        let _holder = client.try_lock("k", Duration::from_secs(60)).await.unwrap();
        store.acquires.store(0, Ordering::SeqCst);

        let result = client
            .lock("k", Duration::from_secs(60), Duration::from_millis(50), fixed(3))
            .await;

        match result {
            Err(LockError::RetriesExhausted { attempts, last }) => {
                assert_eq!(attempts, 4);
                assert!(matches!(*last, LockError::AcquireFailed { .. }));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(store.acquires.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_waits_for_release() {
        let client = LockClient::new(MemoryLockStore::new());
        let holder = client.try_lock("k", Duration::from_secs(60)).await.unwrap();

        let waiter = {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .lock("k", Duration::from_secs(60), Duration::from_millis(50), fixed(0))
                    .await
            })
        };

        time::sleep(Duration::from_millis(350)).await;
        holder.unlock().await.unwrap();

        let lease = waiter.await.unwrap().unwrap();
        assert_ne!(lease.token(), holder.token());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_retries_transport_errors() {
        let store = Arc::new(ScriptedStore {
            fail_first: 2,
            ..Default::default()
        });
        let client = LockClient::from_shared(store.clone(), LockConfig::default());

        let lease = client
            .lock("k", Duration::from_secs(5), Duration::from_millis(50), fixed(5))
            .await
            .unwrap();
        assert_eq!(lease.key(), "k");
        assert_eq!(store.acquires.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_attempt_deadline_counts_as_failure() {
        let store = Arc::new(ScriptedStore {
            delay: Some(Duration::from_secs(1)),
            ..Default::default()
        });
        let client = LockClient::from_shared(store.clone(), LockConfig::default());

        let result = client
            .lock("k", Duration::from_secs(5), Duration::from_millis(100), fixed(1))
            .await;

        match result {
            Err(LockError::RetriesExhausted { attempts, last }) => {
                assert_eq!(attempts, 2);
                assert!(matches!(*last, LockError::Timeout));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_lock_surfaces_store_errors() {
        let store = ScriptedStore {
            fail_first: 1,
            ..Default::default()
        };
        let client = LockClient::new(store);

        assert!(matches!(
            client.try_lock("k", Duration::from_secs(5)).await,
            Err(LockError::Store(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_retry_wait() {
        let client = LockClient::new(MemoryLockStore::new());
        let _holder = client.try_lock("k", Duration::from_secs(60)).await.unwrap();
        let cancel = CancellationToken::new();

        let waiter = {
            let client = client.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let retry = FixedIntervalRetry::new(Duration::from_secs(3600), 0).unwrap();
                client
                    .lock_cancellable("k", Duration::from_secs(60), Duration::from_millis(50), retry, &cancel)
                    .await
            })
        };

        time::sleep(Duration::from_millis(10)).await;
        let cancelled_at = time::Instant::now();
        cancel.cancel();

        assert!(matches!(waiter.await.unwrap(), Err(LockError::Cancelled)));
        assert!(cancelled_at.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_singleflight_collapses_concurrent_callers() {
        let store = Arc::new(ScriptedStore {
            delay: Some(Duration::from_millis(20)),
            ..Default::default()
        });
        let client = LockClient::from_shared(store.clone(), LockConfig::default());

        let results = join_all((0..16).map(|_| {
            client.singleflight_lock("k", Duration::from_secs(30), Duration::from_secs(1), fixed(3))
        }))
        .await;

        assert_eq!(store.acquires.load(Ordering::SeqCst), 1);
        let leases: Vec<Lease> = results.into_iter().map(Result::unwrap).collect();
        assert!(leases.iter().all(|l| l.token() == leases[0].token()));
        assert_eq!(store.inner.holder("k").as_deref(), Some(leases[0].token()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_singleflight_shares_failure_then_starts_fresh() {
        let store = Arc::new(ScriptedStore {
            delay: Some(Duration::from_millis(20)),
            ..Default::default()
        });
        let client = LockClient::from_shared(store.clone(), LockConfig::default());
        let holder = client.try_lock("k", Duration::from_secs(30)).await.unwrap();
        store.acquires.store(0, Ordering::SeqCst);

        let results = join_all((0..4).map(|_| {
            client.singleflight_lock("k", Duration::from_secs(30), Duration::from_secs(1), NoRetry)
        }))
        .await;

        assert_eq!(store.acquires.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| matches!(r, Err(LockError::RetriesExhausted { attempts: 1, .. }))));

        holder.unlock().await.unwrap();
        let lease = client
            .singleflight_lock("k", Duration::from_secs(30), Duration::from_secs(1), NoRetry)
            .await
            .unwrap();
        assert_eq!(store.acquires.load(Ordering::SeqCst), 2);
        assert_eq!(store.inner.holder("k").as_deref(), Some(lease.token()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_uses_config() {
        let config = LockConfig::builder()
            .ttl(Duration::from_secs(7))
            .retry_interval(Duration::from_millis(10))
            .max_retries(2)
            .build();
        let client = LockClient::with_config(MemoryLockStore::new(), config);

        let lease = client.acquire("k").await.unwrap();
        assert_eq!(lease.ttl(), Duration::from_secs(7));

        assert!(matches!(
            client.acquire("k").await,
            Err(LockError::RetriesExhausted { attempts: 3, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_alive_outlives_ttl() {
        let store = Arc::new(MemoryLockStore::new());
        let config = LockConfig::builder().ttl(Duration::from_secs(3)).build();
        let client = LockClient::from_shared(store.clone(), config);

        let lease = client.acquire("k").await.unwrap();
        let refresher = client.keep_alive(&lease).unwrap();

        time::sleep(Duration::from_secs(20)).await;
        assert!(client.try_lock("k", Duration::from_secs(3)).await.is_err());

        lease.unlock().await.unwrap();
        assert!(refresher.await.unwrap().is_ok());
        assert!(client.try_lock("k", Duration::from_secs(3)).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_alive_with_deserialized_ttl() {
        let store = Arc::new(MemoryLockStore::new());
        let config: LockConfig = serde_json::from_str(r#"{"ttl": 3000}"#).unwrap();
        let client = LockClient::from_shared(store.clone(), config);

        let lease = client.acquire("k").await.unwrap();
        let refresher = client.keep_alive(&lease).unwrap();

        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(store.holder("k").as_deref(), Some(lease.token()));

        lease.unlock().await.unwrap();
        assert!(refresher.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_config_is_a_typed_error() {
        let config = LockConfig::builder().refresh_interval(Duration::ZERO).build();
        let client = LockClient::with_config(MemoryLockStore::new(), config);

        assert!(matches!(
            client.acquire("k").await,
            Err(LockError::InvalidConfig(ConfigError::InvalidRefreshInterval { .. }))
        ));

        let lease = client.try_lock("k", Duration::from_secs(3)).await.unwrap();
        assert!(matches!(
            client.keep_alive(&lease),
            Err(LockError::InvalidConfig(_))
        ));
        assert!(!lease.is_stopped());
    }
}
