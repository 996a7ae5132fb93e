//! Distributed Locks for Leasehold
//!
//! Mutual exclusion across processes on top of a shared Redis endpoint.
//!
//! ## Features
//!
//! - **Atomic Contracts** - acquire, refresh and release run as Lua scripts
//! - **Owner Tokens** - every acquisition mints a fresh UUID; only its holder
//!   can refresh or release
//! - **TTL Expiry** - a crashed holder's lock frees itself
//! - **Auto Refresh** - background renewal until unlock
//! - **Bounded Retry** - pluggable backoff with fixed and exponential policies
//! - **Singleflight** - concurrent same-key acquisitions in one process share
//!   a single attempt
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use leasehold_lock::*;
//! use leasehold_redis::RedisConfig;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = LockClient::connect(&RedisConfig::from_env().build(), LockConfig::default()).await?;
//!
//!     // Acquire with up to 10 retries, 100ms apart
//!     let retry = FixedIntervalRetry::new(Duration::from_millis(100), 10)?;
//!     let lease = client
//!         .lock("my-resource", Duration::from_secs(30), Duration::from_secs(1), retry)
//!         .await?;
//!
//!     // Keep it alive while working
//!     let refresher = lease.spawn_auto_refresh(Duration::from_secs(10), Duration::from_secs(1));
//!
//!     println!("Lock acquired, doing work...");
//!
//!     // Releasing also stops the refresher
//!     lease.unlock().await?;
//!     refresher.await??;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Error Semantics
//!
//! - [`LockError::AcquireFailed`] / [`LockError::RetriesExhausted`]: never acquired
//! - [`LockError::NotHeld`]: acquired, then lost (expired or taken over)
//! - [`LockError::Cancelled`]: the caller gave up

mod client;
mod config;
mod error;
mod lease;
mod retry;
mod singleflight;
pub mod store;

pub use client::LockClient;
pub use config::{LockConfig, LockConfigBuilder};
pub use error::{ConfigError, LockError};
pub use lease::Lease;
pub use retry::{ExponentialBackoffRetry, FixedIntervalRetry, NoRetry, RetryStrategy};
pub use store::{LockStore, MemoryLockStore, RedisLockStore};

pub use tokio_util::sync::CancellationToken;
