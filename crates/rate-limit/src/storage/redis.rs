//! Redis-backed fixed window counters.
//!
//! Each hit runs one Lua script, so the increment and the window expiry happen
//! atomically on the server even when many instances share the same Redis.

use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use config::RedisConfig;
use redis::Script;
use tokio::time::timeout;

use super::{
    CounterStore, StorageError, WindowState,
    redis_pool::{self, Pool},
};

/// Increments the counter of a window hash and returns it together with the
/// window end in Unix epoch milliseconds. The end is fixed by the first hit,
/// using the server clock, so every instance reports the same reset time.
const INCREMENT_SCRIPT: &str = r#"
local total = redis.call('HINCRBY', KEYS[1], 'count', 1)
local window_end = tonumber(redis.call('HGET', KEYS[1], 'end'))
if total == 1 or window_end == nil or redis.call('PTTL', KEYS[1]) < 0 then
    local time = redis.call('TIME')
    local now = tonumber(time[1]) * 1000 + math.floor(tonumber(time[2]) / 1000)
    window_end = now + tonumber(ARGV[1])
    redis.call('HSET', KEYS[1], 'end', string.format('%d', window_end))
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return { total, window_end }
"#;

/// Redis-based rate limit storage implementation.
pub struct RedisStore {
    /// Redis connection pool.
    pool: Pool,
    /// The increment script, loaded lazily on first use.
    script: Script,
    /// Key prefix for all rate limit keys.
    key_prefix: String,
    /// Length of one window.
    window: Duration,
    /// Response timeout for Redis commands.
    response_timeout: Duration,
}

impl RedisStore {
    /// Connect to Redis and verify the connection.
    pub async fn new(config: &RedisConfig, window: Duration) -> Result<Self, StorageError> {
        let pool = redis_pool::create_pool(config)
            .map_err(|e| StorageError::Connection(format!("Failed to create Redis connection pool: {e}")))?;

        let store = Self {
            pool,
            script: Script::new(INCREMENT_SCRIPT),
            key_prefix: config.key_prefix.clone(),
            window,
            response_timeout: config.response_timeout,
        };

        let ping = async {
            let mut conn = store.connection().await?;

            redis::cmd("PING")
                .query_async::<String>(&mut *conn)
                .await
                .map_err(|e| StorageError::Connection(format!("Failed to ping Redis server: {e}")))
        };

        timeout(config.connection_timeout, ping)
            .await
            .map_err(|_| StorageError::Timeout(config.connection_timeout))??;

        log::debug!("Connected to Redis rate limit storage at {}", config.url);

        Ok(store)
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    fn window_millis(&self) -> u64 {
        u64::try_from(self.window.as_millis()).unwrap_or(u64::MAX).max(1)
    }

    async fn connection(&self) -> Result<deadpool::managed::Object<redis_pool::Manager>, StorageError> {
        self.pool
            .get()
            .await
            .map_err(|e| StorageError::Connection(format!("Failed to get Redis connection from pool: {e}")))
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn increment(&self, key: &str) -> Result<WindowState, StorageError> {
        let storage_key = self.storage_key(key);
        let mut conn = self.connection().await?;

        let mut invocation = self.script.key(&storage_key);
        invocation.arg(self.window_millis());

        let call = invocation.invoke_async::<(u64, u64)>(&mut *conn);

        let (total, window_end) = timeout(self.response_timeout, call)
            .await
            .map_err(|_| StorageError::Timeout(self.response_timeout))?
            .map_err(|e| StorageError::Query(e.to_string()))?;

        let reset_time = epoch_millis(window_end);

        log::debug!("Redis window for '{storage_key}' at {total} hits, ends at {window_end}ms");

        Ok(WindowState { total, reset_time })
    }

    async fn reset(&self, key: &str) -> Result<(), StorageError> {
        let storage_key = self.storage_key(key);
        let mut conn = self.connection().await?;

        let mut command = redis::cmd("DEL");
        command.arg(&storage_key);

        timeout(self.response_timeout, command.query_async::<i64>(&mut *conn))
            .await
            .map_err(|_| StorageError::Timeout(self.response_timeout))?
            .map_err(|e| StorageError::Query(e.to_string()))?;

        Ok(())
    }
}

fn epoch_millis(millis: u64) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_millis(millis)
}
