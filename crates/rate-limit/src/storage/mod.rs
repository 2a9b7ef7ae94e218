//! Storage backends for rate limiting.
//!
//! Every backend implements the same fixed window: the first hit for a key
//! opens a window of the configured length, later hits inside it increment the
//! count, and the first hit after it ends opens a fresh window with a count of one.

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use config::StorageConfig;

use crate::clock::Clock;

pub mod memory;
pub mod redis;
mod redis_pool;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// State of a key's window right after an increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    /// Number of hits in the current window, including this one.
    pub total: u64,
    /// When the current window ends.
    pub reset_time: SystemTime,
}

/// Trait for rate limit counter backends.
///
/// `increment` must be atomic per key: concurrent calls for the same key
/// observe distinct, sequential totals.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Count a hit for `key` and return the resulting window state.
    async fn increment(&self, key: &str) -> Result<WindowState, StorageError>;

    /// Forget the window of `key`, so its next hit opens a new one.
    async fn reset(&self, _key: &str) -> Result<(), StorageError> {
        Err(StorageError::Unsupported("reset"))
    }
}

/// Errors that can occur in storage backends.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Internal storage error.
    #[error("Storage error: {0}")]
    Internal(String),

    /// Could not reach the backend.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The backend rejected a command.
    #[error("Query error: {0}")]
    Query(String),

    /// The backend did not answer in time.
    #[error("Storage did not respond within {0:?}")]
    Timeout(Duration),

    /// The backend does not implement an optional operation.
    #[error("Storage does not support {0}")]
    Unsupported(&'static str),
}

/// Build the configured storage backend for windows of length `window`.
pub async fn from_config(
    config: &StorageConfig,
    window: Duration,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn CounterStore>, StorageError> {
    match config {
        StorageConfig::Memory(memory_config) => {
            let store = Arc::new(MemoryStore::with_clock(window, clock));

            if let Some(interval) = memory_config.sweep_interval {
                log::debug!("Sweeping expired rate limit windows every {interval:?}");
                MemoryStore::spawn_sweeper(&store, interval);
            }

            Ok(store)
        }
        StorageConfig::Redis(redis_config) => {
            let store = RedisStore::new(redis_config, window).await?;
            Ok(Arc::new(store))
        }
    }
}
