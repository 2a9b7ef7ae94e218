//! Fixed-window request rate limiting.
//!
//! A [`RateLimitManager`] counts each request against a key in a
//! [`CounterStore`] and compares the post-increment total with a quota.
//! Counters live either in process memory or in Redis, so several instances
//! of a service can share one budget per key.

#![deny(missing_docs)]

mod clock;
mod decision;
mod error;
mod manager;
mod request;
mod resolver;
pub mod storage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use decision::{Decision, Evaluation, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET};
pub use error::{BoxError, RateLimitError};
pub use manager::{RateLimitManager, RateLimitManagerBuilder};
pub use request::{RateLimitRequest, RateLimitRequestBuilder};
pub use resolver::{ClientIpKey, HeaderKey, KeyResolver, NeverSkip, Quota, QuotaResolver, SkipPaths, SkipPredicate};
pub use storage::{CounterStore, MemoryStore, RedisStore, StorageError, WindowState};
