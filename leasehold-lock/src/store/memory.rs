//! In-process lock store.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use super::LockStore;
use crate::LockError;

struct Entry {
    token: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Lock store that keeps state in process memory.
///
/// Every contract runs under one mutex acquisition, which gives the same
/// atomicity as a server-side script. Expiry is evaluated lazily against the
/// tokio clock, so paused-time tests can advance past a TTL instantly.
#[derive(Default)]
pub struct MemoryLockStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryLockStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Token currently holding `key`, if the entry has not expired.
    pub fn holder(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        self.entries
            .lock()
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.token.clone())
    }

    /// Time left before `key` expires.
    pub fn remaining_ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .lock()
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.expires_at - now)
    }

    /// Drop `key` regardless of owner, as if its TTL had elapsed.
    pub fn expire(&self, key: &str) {
        self.entries.lock().remove(key);
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, LockError> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        if let Some(existing) = entries.get(key)
            && existing.is_live(now)
            && existing.token != token
        {
            return Ok(false);
        }

        entries.insert(
            key.to_string(),
            Entry {
                token: token.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn refresh(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, LockError> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        match entries.get_mut(key) {
            Some(entry) if entry.is_live(now) && entry.token == token => {
                entry.expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, key: &str, token: &str) -> Result<bool, LockError> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let (live, owned) = match entries.get(key) {
            Some(entry) => (entry.is_live(now), entry.token == token),
            None => return Ok(false),
        };

        if !live {
            entries.remove(key);
            return Ok(false);
        }
        if owned {
            entries.remove(key);
        }
        Ok(owned)
    }
}
