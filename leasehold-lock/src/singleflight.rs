//! Collapsing of concurrent same-key calls within one process.

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::LockError;

/// Awaitable outcome of one in-flight call, shared by every waiter.
pub(crate) type Call<T> = Shared<BoxFuture<'static, Result<T, LockError>>>;

struct InFlight<T> {
    id: u64,
    call: Call<T>,
}

/// Map from key to the call currently running for it.
///
/// The first caller for a key spawns the real work on its own task; later
/// callers get a clone of the same [`Call`]. The task removes the entry when
/// it finishes, whether it succeeded, failed, panicked or was aborted, so the
/// next caller starts fresh.
pub(crate) struct Singleflight<T> {
    calls: Arc<Mutex<HashMap<String, InFlight<T>>>>,
    next_id: AtomicU64,
}

impl<T> Default for Singleflight<T> {
    fn default() -> Self {
        Self {
            calls: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<T> Singleflight<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Join the call in flight for `key`, or start one with `make`.
    ///
    /// Returns the shared call and whether this caller started it. `make` is
    /// only invoked by the starting caller.
    pub(crate) fn work<F, Fut>(&self, key: &str, make: F) -> (Call<T>, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, LockError>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel::<JoinHandle<Result<T, LockError>>>();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let call: Call<T> = {
            let mut calls = self.calls.lock();
            if let Some(in_flight) = calls.get(key) {
                debug!(key = %key, "joining in-flight acquisition");
                return (in_flight.call.clone(), false);
            }

            let call = async move {
                let handle = rx
                    .await
                    .map_err(|_| LockError::Store("in-flight call was never started".to_string()))?;
                handle.await?
            }
            .boxed()
            .shared();

            calls.insert(
                key.to_string(),
                InFlight {
                    id,
                    call: call.clone(),
                },
            );
            call
        };

        // Spawned outside the map lock: a task dropped during runtime
        // shutdown runs its cleanup guard synchronously.
        let cleanup = Cleanup {
            calls: Arc::clone(&self.calls),
            key: key.to_string(),
            id,
        };
        let work = make();
        let handle = tokio::spawn(async move {
            let _cleanup = cleanup;
            work.await
        });
        let _ = tx.send(handle);

        (call, true)
    }

    /// Number of keys with a call in flight.
    #[cfg(test)]
    pub(crate) fn in_flight(&self) -> usize {
        self.calls.lock().len()
    }
}

struct Cleanup<T> {
    calls: Arc<Mutex<HashMap<String, InFlight<T>>>>,
    key: String,
    id: u64,
}

impl<T> Drop for Cleanup<T> {
    fn drop(&mut self) {
        let mut calls = self.calls.lock();
        if calls.get(&self.key).is_some_and(|in_flight| in_flight.id == self.id) {
            calls.remove(&self.key);
        }
    }
}
