//! The outcome of evaluating one request.

use std::time::{Duration, SystemTime};

use http::{HeaderMap, HeaderName, HeaderValue, header::RETRY_AFTER};

use crate::{
    clock::{epoch_seconds_ceil, seconds_ceil},
    storage::WindowState,
};

/// Header carrying the limit of the current window.
pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
/// Header carrying how many requests are left in the current window.
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
/// Header carrying the end of the current window, in Unix epoch seconds.
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Result of [`RateLimitManager::check`](crate::RateLimitManager::check).
#[derive(Debug, Clone)]
pub enum Evaluation {
    /// The skip predicate exempted the request. Nothing was counted.
    Skipped,
    /// The request was counted.
    Decided(Decision),
}

/// Admission decision for a counted request.
#[derive(Debug, Clone)]
pub struct Decision {
    /// The key the request was counted against.
    pub key: String,
    /// Hits in the current window, including this request.
    pub total: u64,
    /// When the current window ends.
    pub reset_time: SystemTime,
    /// The quota that applied to this request.
    pub limit: u64,
    /// Requests left in the current window.
    pub remaining: u64,
    /// Whether the request is within its quota.
    pub admitted: bool,
    /// Time until the window ends, measured when the decision was made.
    pub retry_after: Duration,
    /// Informational headers to attach to the response. Empty when header
    /// emission is disabled.
    pub headers: HeaderMap,
}

impl Decision {
    pub(crate) fn new(key: String, state: WindowState, limit: u64, now: SystemTime, emit_headers: bool) -> Self {
        let WindowState { total, reset_time } = state;
        let admitted = total <= limit;
        let retry_after = reset_time.duration_since(now).unwrap_or_default();

        let mut decision = Self {
            key,
            total,
            reset_time,
            limit,
            remaining: limit.saturating_sub(total),
            admitted,
            retry_after,
            headers: HeaderMap::new(),
        };

        if emit_headers {
            decision.headers = decision.informational_headers();
        }

        decision
    }

    /// The window end in Unix epoch seconds, rounded up.
    pub fn reset_epoch_seconds(&self) -> u64 {
        epoch_seconds_ceil(self.reset_time)
    }

    /// Seconds until the window ends, rounded up.
    pub fn retry_after_seconds(&self) -> u64 {
        seconds_ceil(self.retry_after)
    }

    fn informational_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::with_capacity(4);

        headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(self.limit));
        headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(self.remaining));
        headers.insert(X_RATELIMIT_RESET, HeaderValue::from(self.reset_epoch_seconds()));

        if !self.admitted {
            headers.insert(RETRY_AFTER, HeaderValue::from(self.retry_after_seconds()));
        }

        headers
    }
}
