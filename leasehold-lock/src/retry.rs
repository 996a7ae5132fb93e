//! Retry strategies for contended acquisitions.

use std::time::Duration;

use crate::ConfigError;

/// Backoff policy consulted by [`LockClient::lock`](crate::LockClient::lock)
/// after every failed attempt.
///
/// Implementations are stateful; use one instance per acquisition sequence.
pub trait RetryStrategy {
    /// Interval to wait before the next attempt, or `None` to stop.
    fn next(&mut self) -> Option<Duration>;
}

impl<R: RetryStrategy + ?Sized> RetryStrategy for Box<R> {
    fn next(&mut self) -> Option<Duration> {
        (**self).next()
    }
}

/// Retry at a constant interval.
#[derive(Debug, Clone)]
pub struct FixedIntervalRetry {
    interval: Duration,
    /// 0 means unlimited.
    max_retries: u32,
    retries: u32,
}

impl FixedIntervalRetry {
    /// Create a fixed interval strategy. `max_retries == 0` retries forever.
    pub fn new(interval: Duration, max_retries: u32) -> Result<Self, ConfigError> {
        if interval.is_zero() {
            return Err(ConfigError::InvalidInterval(interval));
        }
        Ok(Self {
            interval,
            max_retries,
            retries: 0,
        })
    }

    /// Retries handed out so far.
    pub fn retries(&self) -> u32 {
        self.retries
    }
}

impl RetryStrategy for FixedIntervalRetry {
    fn next(&mut self) -> Option<Duration> {
        self.retries = self.retries.saturating_add(1);
        if self.max_retries > 0 && self.retries > self.max_retries {
            return None;
        }
        Some(self.interval)
    }
}

/// Exponential backoff: `initial * 2^(n-1)`, capped at `max_interval`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoffRetry {
    initial_interval: Duration,
    max_interval: Duration,
    /// 0 means unlimited.
    max_retries: u32,
    retries: u32,
    max_interval_reached: bool,
}

impl ExponentialBackoffRetry {
    /// Create an exponential backoff strategy. `max_retries == 0` retries forever.
    pub fn new(
        initial_interval: Duration,
        max_interval: Duration,
        max_retries: u32,
    ) -> Result<Self, ConfigError> {
        if initial_interval.is_zero() {
            return Err(ConfigError::InvalidInterval(initial_interval));
        }
        if initial_interval > max_interval {
            return Err(ConfigError::InvalidMaxInterval {
                max: max_interval,
                initial: initial_interval,
            });
        }
        Ok(Self {
            initial_interval,
            max_interval,
            max_retries,
            retries: 0,
            max_interval_reached: false,
        })
    }
}

impl RetryStrategy for ExponentialBackoffRetry {
    fn next(&mut self) -> Option<Duration> {
        self.retries = self.retries.saturating_add(1);
        if self.max_retries > 0 && self.retries > self.max_retries {
            return None;
        }

        if self.max_interval_reached {
            return Some(self.max_interval);
        }

        let interval = 2u32
            .checked_pow(self.retries - 1)
            .and_then(|factor| self.initial_interval.checked_mul(factor));

        match interval {
            Some(interval) if interval <= self.max_interval => Some(interval),
            _ => {
                self.max_interval_reached = true;
                Some(self.max_interval)
            }
        }
    }
}

/// Never retry.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl RetryStrategy for NoRetry {
    fn next(&mut self) -> Option<Duration> {
        None
    }
}
