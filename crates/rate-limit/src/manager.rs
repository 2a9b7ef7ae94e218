//! Rate limit manager implementation.

use std::{sync::Arc, time::Duration};

use config::RateLimitConfig;

use crate::{
    clock::{Clock, SystemClock},
    decision::{Decision, Evaluation},
    error::RateLimitError,
    request::RateLimitRequest,
    resolver::{self, ClientIpKey, KeyResolver, NeverSkip, Quota, QuotaResolver, SkipPaths, SkipPredicate},
    storage::{self, CounterStore, MemoryStore},
};

/// Decides whether requests are within their fixed-window quota.
///
/// The manager holds no per-request state. All mutation happens in the
/// [`CounterStore`], so one manager is shared by every in-flight request.
pub struct RateLimitManager {
    store: Arc<dyn CounterStore>,
    key: Arc<dyn KeyResolver>,
    quota: Arc<dyn QuotaResolver>,
    skip: Arc<dyn SkipPredicate>,
    headers: bool,
    clock: Arc<dyn Clock>,
}

impl RateLimitManager {
    /// Start building a manager with the default options: 5 requests per
    /// 60 second window, keyed by client address, counted in memory.
    pub fn builder() -> RateLimitManagerBuilder {
        RateLimitManagerBuilder::default()
    }

    /// Create a manager from configuration, connecting to the configured storage.
    pub async fn from_config(config: &RateLimitConfig) -> Result<Self, RateLimitError> {
        Self::from_config_with_clock(config, Arc::new(SystemClock)).await
    }

    /// Create a manager from configuration, reading time from `clock`.
    pub async fn from_config_with_clock(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Result<Self, RateLimitError> {
        if config.window.is_zero() {
            return Err(RateLimitError::InvalidConfiguration(
                "window must be greater than zero".to_string(),
            ));
        }

        let key = resolver::key_resolver(&config.key).map_err(RateLimitError::InvalidConfiguration)?;
        let store = storage::from_config(&config.storage, config.window, clock.clone()).await?;

        let mut builder = Self::builder()
            .window(config.window)
            .limit(config.limit)
            .shared_key_resolver(key)
            .headers(config.headers)
            .store(store)
            .clock(clock);

        if !config.skip_paths.is_empty() {
            builder = builder.skip(SkipPaths::new(config.skip_paths.iter().cloned()));
        }

        builder.build()
    }

    /// Count `request` and decide whether it is admitted.
    ///
    /// The steps run strictly in order: skip, key, increment, quota. The
    /// quota is resolved after the increment, so the decision always reflects
    /// the post-increment total.
    pub async fn check(&self, request: &RateLimitRequest) -> Result<Evaluation, RateLimitError> {
        if self.skip.should_skip(request).await.map_err(RateLimitError::Skip)? {
            log::debug!("Skipping rate limit for {} {}", request.method(), request.path());
            return Ok(Evaluation::Skipped);
        }

        let key = self
            .key
            .resolve_key(request)
            .await
            .map_err(RateLimitError::KeyResolution)?;

        let state = self.store.increment(&key).await?;

        let limit = self
            .quota
            .resolve_quota(request)
            .await
            .map_err(RateLimitError::QuotaResolution)?;

        let decision = Decision::new(key, state, limit, self.clock.now(), self.headers);

        log::debug!(
            "Rate limit for key '{}': {}/{} in window, admitted={}",
            decision.key,
            decision.total,
            decision.limit,
            decision.admitted
        );

        Ok(Evaluation::Decided(decision))
    }

    /// Forget the current window of `key`.
    pub async fn reset(&self, key: &str) -> Result<(), RateLimitError> {
        self.store.reset(key).await?;
        Ok(())
    }
}

/// Builder for [`RateLimitManager`].
pub struct RateLimitManagerBuilder {
    window: Duration,
    quota: Quota,
    key: Option<Arc<dyn KeyResolver>>,
    skip: Option<Arc<dyn SkipPredicate>>,
    headers: bool,
    store: Option<Arc<dyn CounterStore>>,
    clock: Arc<dyn Clock>,
}

impl Default for RateLimitManagerBuilder {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            quota: Quota::Fixed(5),
            key: None,
            skip: None,
            headers: true,
            store: None,
            clock: Arc::new(SystemClock),
        }
    }
}

impl RateLimitManagerBuilder {
    /// Set the window length.
    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Set the quota, either a fixed number or a [`Quota::dynamic`] resolver.
    pub fn limit(mut self, quota: impl Into<Quota>) -> Self {
        self.quota = quota.into();
        self
    }

    /// Set how the key of a request is derived.
    pub fn key_resolver(mut self, resolver: impl KeyResolver + 'static) -> Self {
        self.key = Some(Arc::new(resolver));
        self
    }

    /// Set a key resolver that is already shared.
    pub fn shared_key_resolver(mut self, resolver: Arc<dyn KeyResolver>) -> Self {
        self.key = Some(resolver);
        self
    }

    /// Set which requests bypass rate limiting.
    pub fn skip(mut self, predicate: impl SkipPredicate + 'static) -> Self {
        self.skip = Some(Arc::new(predicate));
        self
    }

    /// Enable or disable the informational headers.
    pub fn headers(mut self, enabled: bool) -> Self {
        self.headers = enabled;
        self
    }

    /// Use `store` instead of a private in-memory store. The store's own
    /// window length applies to its counters.
    pub fn store(mut self, store: Arc<dyn CounterStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Read time from `clock`. Also used by the default in-memory store.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Build the manager.
    pub fn build(self) -> Result<RateLimitManager, RateLimitError> {
        if self.window.is_zero() {
            return Err(RateLimitError::InvalidConfiguration(
                "window must be greater than zero".to_string(),
            ));
        }

        if let Quota::Fixed(0) = self.quota {
            log::warn!("Rate limit quota is 0, every request will be rejected");
        }

        let store = match self.store {
            Some(store) => store,
            None => Arc::new(MemoryStore::with_clock(self.window, self.clock.clone())),
        };

        Ok(RateLimitManager {
            store,
            key: self.key.unwrap_or_else(|| Arc::new(ClientIpKey::new())),
            quota: self.quota.into_resolver(),
            skip: self.skip.unwrap_or_else(|| Arc::new(NeverSkip)),
            headers: self.headers,
            clock: self.clock,
        })
    }
}
