//! Error types for rate limiting.

use crate::storage::StorageError;

/// Boxed error returned by user supplied resolvers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur while evaluating a request.
///
/// None of these are rate limit rejections: a rejected request is a successful
/// evaluation. These errors mean no decision could be made at all.
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    /// The key resolver failed to produce a key for the request.
    #[error("Failed to resolve rate limit key: {0}")]
    KeyResolution(#[source] BoxError),

    /// The quota resolver failed to produce a limit for the request.
    #[error("Failed to resolve rate limit quota: {0}")]
    QuotaResolution(#[source] BoxError),

    /// The skip predicate failed.
    #[error("Failed to evaluate rate limit skip predicate: {0}")]
    Skip(#[source] BoxError),

    /// Storage backend error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// The limiter was built with values that can never work.
    #[error("Invalid rate limit configuration: {0}")]
    InvalidConfiguration(String),
}
