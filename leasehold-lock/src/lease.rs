//! Held locks and their renewal loop.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{ConfigError, LockError, LockStore};

/// A held lock.
///
/// A lease is only created by a successful acquisition and is bound to the
/// owner token minted for that attempt. Clones share the token and the stop
/// signal, so calling [`unlock`](Lease::unlock) on any clone stops a refresh
/// loop running on another.
///
/// Dropping a lease does not release it; an abandoned lease expires at the
/// store after its TTL.
#[derive(Clone)]
pub struct Lease {
    store: Arc<dyn LockStore>,
    key: String,
    token: String,
    ttl: Duration,
    stop: CancellationToken,
}

impl Lease {
    pub(crate) fn new(store: Arc<dyn LockStore>, key: String, token: String, ttl: Duration) -> Self {
        Self {
            store,
            key,
            token,
            ttl,
            stop: CancellationToken::new(),
        }
    }

    /// The locked key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The owner token proving this lease to the store.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// TTL applied on acquisition and on every refresh.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Whether [`unlock`](Lease::unlock) has been called on this lease or a clone.
    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Reset the TTL at the store.
    ///
    /// Returns [`LockError::NotHeld`] if the store no longer maps the key to
    /// this lease's token.
    pub async fn refresh(&self) -> Result<(), LockError> {
        if self.store.refresh(&self.key, &self.token, self.ttl).await? {
            debug!(key = %self.key, ttl = ?self.ttl, "Refreshed lock");
            Ok(())
        } else {
            warn!(key = %self.key, "Failed to refresh lock (not held or expired)");
            Err(LockError::NotHeld)
        }
    }

    /// Keep the lease alive until it is unlocked.
    ///
    /// Every `interval` the TTL is refreshed, each call bounded by `timeout`.
    /// A refresh that times out is retried immediately rather than at the
    /// next tick. Any other failure, including [`LockError::NotHeld`], ends
    /// the loop and is returned. Returns `Ok(())` once the lease is unlocked.
    ///
    /// This runs for the lifetime of the lease; drive it on its own task, or
    /// use [`spawn_auto_refresh`](Lease::spawn_auto_refresh). A zero
    /// `interval` fails with [`LockError::InvalidConfig`].
    pub async fn auto_refresh(&self, interval: Duration, timeout: Duration) -> Result<(), LockError> {
        if interval.is_zero() {
            return Err(ConfigError::InvalidInterval(interval).into());
        }

        let mut ticker = time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut retry_now = false;

        loop {
            if !retry_now {
                tokio::select! {
                    biased;
                    _ = self.stop.cancelled() => return Ok(()),
                    _ = ticker.tick() => {}
                }
            } else if self.stop.is_cancelled() {
                return Ok(());
            }

            let outcome = match time::timeout(timeout, self.refresh()).await {
                Ok(result) => result,
                Err(_) => Err(LockError::Timeout),
            };

            match outcome {
                Ok(()) => retry_now = false,
                Err(e) if e.is_timeout() => {
                    warn!(key = %self.key, timeout = ?timeout, "Lock refresh timed out, retrying");
                    retry_now = true;
                }
                // Released while this refresh was in flight.
                Err(_) if self.stop.is_cancelled() => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    /// Run [`auto_refresh`](Lease::auto_refresh) on a new tokio task.
    pub fn spawn_auto_refresh(
        &self,
        interval: Duration,
        timeout: Duration,
    ) -> JoinHandle<Result<(), LockError>> {
        let lease = self.clone();
        tokio::spawn(async move { lease.auto_refresh(interval, timeout).await })
    }

    /// Release the lock and stop any refresh loop.
    ///
    /// The stop signal fires before the store is contacted, so the refresh
    /// loop ends even if the release stalls or this future is dropped.
    /// Firing it again is a no-op, so unlocking twice never blocks or panics.
    /// Returns [`LockError::NotHeld`] if the store no longer maps the key to
    /// this lease's token.
    pub async fn unlock(&self) -> Result<(), LockError> {
        self.stop.cancel();

        if self.store.release(&self.key, &self.token).await? {
            debug!(key = %self.key, "Released lock");
            Ok(())
        } else {
            warn!(key = %self.key, "Failed to release lock (not held or expired)");
            Err(LockError::NotHeld)
        }
    }
}

impl fmt::Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("key", &self.key)
            .field("token", &self.token)
            .field("ttl", &self.ttl)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
