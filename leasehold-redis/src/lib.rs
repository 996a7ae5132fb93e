//! # Leasehold Redis
//!
//! Redis connection setup shared by the Leasehold lock stores.
//!
//! ## Features
//!
//! - **Configuration**: builder, serde and environment loading
//! - **Connection Management**: reconnecting multiplexed connections
//! - **Health Checks**: `PING` with the configured command timeout
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use leasehold_redis::{connect, RedisConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RedisConfig::from_env()
//!         .connection_name("billing-worker")
//!         .build();
//!
//!     let conn = connect(&config).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Environment Variables
//!
//! - `REDIS_URL` - server URL (`redis://host:port`)
//! - `REDIS_DATABASE` - database number
//! - `REDIS_USERNAME` / `REDIS_PASSWORD` - credentials
//! - `REDIS_TLS` - switch to `rediss://`
//! - `REDIS_CONNECTION_TIMEOUT_SECS` / `REDIS_COMMAND_TIMEOUT_SECS`

mod config;
mod connection;
mod error;

pub use config::{RedisConfig, RedisConfigBuilder};
pub use connection::{connect, ping};
pub use error::{RedisError, Result};

// Re-export redis crate for convenience
pub use redis;
pub use redis::aio::ConnectionManager;
