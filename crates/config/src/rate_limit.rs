//! Rate limiting configuration structures.

use std::{collections::BTreeSet, time::Duration};

use anyhow::bail;
use duration_str::{deserialize_duration, deserialize_option_duration};
use http::{HeaderName, StatusCode};
use serde::Deserialize;

/// Body sent with the default rejection response when nothing else is configured.
pub const DEFAULT_REJECTION_MESSAGE: &str = "Too many requests, please try again later.";

/// Rate limiting configuration for the server.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Whether rate limiting is enabled.
    pub enabled: bool,
    /// Length of one fixed window.
    #[serde(deserialize_with = "deserialize_duration")]
    pub window: Duration,
    /// Maximum number of requests allowed per key within one window.
    pub limit: u32,
    /// Status code of the default rejection response.
    pub status_code: u16,
    /// Whether the `x-ratelimit-*` and `retry-after` headers are emitted.
    pub headers: bool,
    /// Body of the default rejection response.
    pub message: RejectionMessage,
    /// How the rate limit key is derived from a request.
    pub key: KeySource,
    /// Request paths that bypass rate limiting entirely.
    pub skip_paths: BTreeSet<String>,
    /// Storage backend configuration.
    pub storage: StorageConfig,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            window: Duration::from_secs(60),
            limit: 5,
            status_code: StatusCode::TOO_MANY_REQUESTS.as_u16(),
            headers: true,
            message: RejectionMessage::default(),
            key: KeySource::default(),
            skip_paths: BTreeSet::new(),
            storage: StorageConfig::default(),
        }
    }
}

impl RateLimitConfig {
    /// Checks the configuration for values that can never work.
    ///
    /// Returns warnings for values that are legal but most likely a mistake.
    pub fn validate(&self) -> anyhow::Result<Vec<String>> {
        let mut warnings = Vec::new();

        if self.window.is_zero() {
            bail!("Rate limit window must be greater than zero");
        }

        if StatusCode::from_u16(self.status_code).is_err() {
            bail!("Invalid rate limit status code: {}", self.status_code);
        }

        if let KeySource::Header { name } = &self.key
            && HeaderName::from_bytes(name.as_bytes()).is_err()
        {
            bail!("Invalid rate limit key header name: '{name}'");
        }

        if let Some(path) = self.skip_paths.iter().find(|path| !path.starts_with('/')) {
            bail!("Rate limit skip path '{path}' must start with '/'");
        }

        match &self.storage {
            StorageConfig::Memory(memory) => {
                if memory.sweep_interval.is_some_and(|interval| interval.is_zero()) {
                    bail!("Memory storage sweep interval must be greater than zero");
                }
            }
            StorageConfig::Redis(redis) => {
                if !redis.url.starts_with("redis://") && !redis.url.starts_with("rediss://") {
                    bail!("Redis URL must use the redis:// or rediss:// scheme, got '{}'", redis.url);
                }
            }
        }

        if self.enabled && self.limit == 0 {
            warnings.push("Rate limit is set to 0 requests per window, every request will be rejected".to_string());
        }

        Ok(warnings)
    }
}

/// Response body sent when a request is rejected.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RejectionMessage {
    /// Plain text body.
    Text(String),
    /// Structured body, sent as JSON.
    Json(serde_json::Value),
    /// Raw bytes, only settable programmatically.
    #[serde(skip)]
    Bytes(Vec<u8>),
}

impl Default for RejectionMessage {
    fn default() -> Self {
        Self::Text(DEFAULT_REJECTION_MESSAGE.to_string())
    }
}

impl From<&str> for RejectionMessage {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for RejectionMessage {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<serde_json::Value> for RejectionMessage {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

impl From<Vec<u8>> for RejectionMessage {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

/// Where the rate limit key of a request comes from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum KeySource {
    /// The address of the connected client.
    ClientIp {
        /// Prefer `X-Forwarded-For` and `X-Real-IP` over the socket address.
        /// Only enable behind a proxy that overwrites these headers.
        #[serde(default)]
        trust_forwarded_headers: bool,
    },
    /// The value of a request header, such as an API key.
    Header {
        /// Name of the header.
        name: String,
    },
}

impl Default for KeySource {
    fn default() -> Self {
        Self::ClientIp {
            trust_forwarded_headers: false,
        }
    }
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (default).
    Memory(MemoryStorageConfig),
    /// Redis storage with configuration.
    Redis(Box<RedisConfig>),
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Memory(MemoryStorageConfig::default())
    }
}

/// In-memory storage configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryStorageConfig {
    /// How often expired windows are removed. Without it, a window is only
    /// replaced when its key is seen again.
    #[serde(default, deserialize_with = "deserialize_option_duration")]
    pub sweep_interval: Option<Duration>,
}

/// Redis storage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisConfig {
    /// Redis connection URL (redis:// or rediss:// for TLS).
    pub url: String,
    /// Connection pool configuration.
    #[serde(default)]
    pub pool: RedisPoolConfig,
    /// TLS configuration.
    pub tls: Option<RedisTlsConfig>,
    /// Key prefix for all rate limit keys.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Response timeout for Redis commands.
    #[serde(default = "default_response_timeout", deserialize_with = "deserialize_duration")]
    pub response_timeout: Duration,
    /// Connection timeout.
    #[serde(default = "default_connection_timeout", deserialize_with = "deserialize_duration")]
    pub connection_timeout: Duration,
}

fn default_key_prefix() -> String {
    "throttle:rate_limit:".to_string()
}

fn default_response_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_connection_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379/0".to_string(),
            pool: RedisPoolConfig::default(),
            tls: None,
            key_prefix: default_key_prefix(),
            response_timeout: default_response_timeout(),
            connection_timeout: default_connection_timeout(),
        }
    }
}

/// Redis connection pool configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisPoolConfig {
    /// Maximum number of connections.
    pub max_size: Option<usize>,
    /// Timeout for creating connections.
    #[serde(default, deserialize_with = "deserialize_option_duration")]
    pub timeout_create: Option<Duration>,
    /// Timeout for waiting for a connection.
    #[serde(default, deserialize_with = "deserialize_option_duration")]
    pub timeout_wait: Option<Duration>,
    /// Timeout before recycling idle connections.
    #[serde(default, deserialize_with = "deserialize_option_duration")]
    pub timeout_recycle: Option<Duration>,
}

impl Default for RedisPoolConfig {
    fn default() -> Self {
        Self {
            max_size: Some(16),
            timeout_create: Some(Duration::from_secs(5)),
            timeout_wait: Some(Duration::from_secs(5)),
            timeout_recycle: Some(Duration::from_secs(300)),
        }
    }
}

/// Redis TLS configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisTlsConfig {
    /// Path to CA certificate file.
    pub ca_cert_path: Option<String>,
    /// Path to client certificate file (for mutual TLS).
    pub client_cert_path: Option<String>,
    /// Path to client key file (for mutual TLS).
    pub client_key_path: Option<String>,
}
