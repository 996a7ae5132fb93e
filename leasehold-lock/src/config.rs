//! Lock defaults.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

use crate::{ConfigError, FixedIntervalRetry};

/// Defaults used by [`LockClient::acquire`](crate::LockClient::acquire) and
/// [`LockClient::keep_alive`](crate::LockClient::keep_alive).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockConfig {
    /// Lease TTL.
    #[serde(with = "millis_serde", default = "default_ttl")]
    pub ttl: Duration,
    /// Deadline for each acquire attempt.
    #[serde(with = "millis_serde", default = "default_acquire_timeout")]
    pub acquire_timeout: Duration,
    /// Wait between contended attempts.
    #[serde(with = "millis_serde", default = "default_retry_interval")]
    pub retry_interval: Duration,
    /// Retries after the first attempt (0 = unlimited).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Period of the auto-refresh loop; a third of `ttl` when unset.
    #[serde(
        with = "opt_millis_serde",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub refresh_interval: Option<Duration>,
    /// Deadline for each refresh call.
    #[serde(with = "millis_serde", default = "default_refresh_timeout")]
    pub refresh_timeout: Duration,
}

fn default_ttl() -> Duration {
    Duration::from_secs(30)
}

fn default_acquire_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_retry_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_max_retries() -> u32 {
    10
}

fn default_refresh_timeout() -> Duration {
    Duration::from_secs(1)
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl: default_ttl(),
            acquire_timeout: default_acquire_timeout(),
            retry_interval: default_retry_interval(),
            max_retries: default_max_retries(),
            refresh_interval: None,
            refresh_timeout: default_refresh_timeout(),
        }
    }
}

impl LockConfig {
    /// Create a builder.
    pub fn builder() -> LockConfigBuilder {
        LockConfigBuilder::new()
    }

    /// Load configuration from `LEASEHOLD_*` environment variables.
    pub fn from_env() -> LockConfigBuilder {
        let mut builder = LockConfigBuilder::new();

        if let Some(secs) = env_positive("LEASEHOLD_TTL_SECS") {
            builder = builder.ttl(Duration::from_secs(secs));
        }
        if let Some(ms) = env_positive("LEASEHOLD_ACQUIRE_TIMEOUT_MS") {
            builder = builder.acquire_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = env_positive("LEASEHOLD_RETRY_INTERVAL_MS") {
            builder = builder.retry_interval(Duration::from_millis(ms));
        }
        if let Ok(retries) = std::env::var("LEASEHOLD_MAX_RETRIES")
            && let Ok(retries) = retries.parse()
        {
            builder = builder.max_retries(retries);
        }
        if let Some(ms) = env_positive("LEASEHOLD_REFRESH_INTERVAL_MS") {
            builder = builder.refresh_interval(Duration::from_millis(ms));
        }
        if let Some(ms) = env_positive("LEASEHOLD_REFRESH_TIMEOUT_MS") {
            builder = builder.refresh_timeout(Duration::from_millis(ms));
        }

        builder
    }

    /// Period of the auto-refresh loop, derived from the TTL unless set.
    pub fn effective_refresh_interval(&self) -> Duration {
        self.refresh_interval.unwrap_or(self.ttl / 3)
    }

    /// Fresh retry strategy for one acquisition sequence.
    pub fn retry_strategy(&self) -> Result<FixedIntervalRetry, ConfigError> {
        FixedIntervalRetry::new(self.retry_interval, self.max_retries)
    }

    /// Check that the durations describe a lease that can be held and renewed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ttl.is_zero() {
            return Err(ConfigError::InvalidTtl);
        }
        if self.acquire_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(self.acquire_timeout));
        }
        if self.refresh_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(self.refresh_timeout));
        }

        let interval = self.effective_refresh_interval();
        if interval.is_zero() || interval >= self.ttl {
            return Err(ConfigError::InvalidRefreshInterval {
                interval,
                ttl: self.ttl,
            });
        }

        self.retry_strategy().map(|_| ())
    }
}

/// Positive integer from the environment; zero is ignored with a warning.
fn env_positive(name: &str) -> Option<u64> {
    let value: u64 = std::env::var(name).ok()?.parse().ok()?;
    if value == 0 {
        warn!(variable = name, "Ignoring zero duration from environment");
        return None;
    }
    Some(value)
}

/// Builder for lock configuration.
#[derive(Default)]
pub struct LockConfigBuilder {
    config: LockConfig,
}

impl LockConfigBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the lease TTL. Unless set explicitly, the refresh interval follows
    /// at a third of the TTL.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.config.ttl = ttl;
        self
    }

    /// Set the per-attempt acquire deadline.
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.config.acquire_timeout = timeout;
        self
    }

    /// Set the wait between contended attempts.
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.config.retry_interval = interval;
        self
    }

    /// Set the retry limit (0 = unlimited).
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    /// Set the auto-refresh period.
    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.config.refresh_interval = Some(interval);
        self
    }

    /// Set the per-refresh deadline.
    pub fn refresh_timeout(mut self, timeout: Duration) -> Self {
        self.config.refresh_timeout = timeout;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> LockConfig {
        self.config
    }
}

mod millis_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

mod opt_millis_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
