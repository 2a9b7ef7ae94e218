//! Per-request resolution of the rate limit key, the quota and the skip decision.
//!
//! Each resolver is a small async trait. Closures taking a `&RateLimitRequest`
//! and returning a `'static` future implement them directly, so a one-off
//! resolver does not need its own type:
//!
//! ```
//! use rate_limit::{BoxError, KeyResolver, RateLimitRequest};
//!
//! let by_tenant = |request: &RateLimitRequest| {
//!     let tenant = request.header("x-tenant").map(str::to_owned);
//!     async move { tenant.ok_or_else(|| BoxError::from("missing tenant")) }
//! };
//!
//! fn assert_resolver(_: impl KeyResolver) {}
//! assert_resolver(by_tenant);
//! ```

use std::{collections::BTreeSet, future::Future, net::IpAddr, sync::Arc};

use async_trait::async_trait;
use config::KeySource;
use http::HeaderName;

use crate::{error::BoxError, request::RateLimitRequest};

/// Derives the identity a request is counted against.
#[async_trait]
pub trait KeyResolver: Send + Sync {
    /// The rate limit key of `request`.
    async fn resolve_key(&self, request: &RateLimitRequest) -> Result<String, BoxError>;
}

#[async_trait]
impl<F, Fut> KeyResolver for F
where
    F: Fn(&RateLimitRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<String, BoxError>> + Send + 'static,
{
    async fn resolve_key(&self, request: &RateLimitRequest) -> Result<String, BoxError> {
        self(request).await
    }
}

/// Derives the maximum number of requests allowed per window.
#[async_trait]
pub trait QuotaResolver: Send + Sync {
    /// The limit for `request`.
    async fn resolve_quota(&self, request: &RateLimitRequest) -> Result<u64, BoxError>;
}

#[async_trait]
impl<F, Fut> QuotaResolver for F
where
    F: Fn(&RateLimitRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<u64, BoxError>> + Send + 'static,
{
    async fn resolve_quota(&self, request: &RateLimitRequest) -> Result<u64, BoxError> {
        self(request).await
    }
}

/// Decides whether a request bypasses rate limiting.
#[async_trait]
pub trait SkipPredicate: Send + Sync {
    /// Whether `request` is exempt.
    async fn should_skip(&self, request: &RateLimitRequest) -> Result<bool, BoxError>;
}

#[async_trait]
impl<F, Fut> SkipPredicate for F
where
    F: Fn(&RateLimitRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<bool, BoxError>> + Send + 'static,
{
    async fn should_skip(&self, request: &RateLimitRequest) -> Result<bool, BoxError> {
        self(request).await
    }
}

/// A quota that is either fixed or computed per request.
#[derive(Clone)]
pub enum Quota {
    /// The same limit for every request.
    Fixed(u64),
    /// A limit computed from the request.
    Dynamic(Arc<dyn QuotaResolver>),
}

impl Quota {
    /// A quota computed by `resolver`.
    pub fn dynamic(resolver: impl QuotaResolver + 'static) -> Self {
        Self::Dynamic(Arc::new(resolver))
    }

    pub(crate) fn into_resolver(self) -> Arc<dyn QuotaResolver> {
        match self {
            Quota::Fixed(limit) => Arc::new(FixedQuota(limit)),
            Quota::Dynamic(resolver) => resolver,
        }
    }
}

impl std::fmt::Debug for Quota {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Quota::Fixed(limit) => f.debug_tuple("Fixed").field(limit).finish(),
            Quota::Dynamic(_) => f.write_str("Dynamic"),
        }
    }
}

impl From<u64> for Quota {
    fn from(limit: u64) -> Self {
        Self::Fixed(limit)
    }
}

impl From<u32> for Quota {
    fn from(limit: u32) -> Self {
        Self::Fixed(u64::from(limit))
    }
}

struct FixedQuota(u64);

#[async_trait]
impl QuotaResolver for FixedQuota {
    async fn resolve_quota(&self, _: &RateLimitRequest) -> Result<u64, BoxError> {
        Ok(self.0)
    }
}

/// Keys requests by client address.
#[derive(Debug, Clone, Default)]
pub struct ClientIpKey {
    trust_forwarded_headers: bool,
}

impl ClientIpKey {
    /// Key by the connected peer address only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefer the first `X-Forwarded-For` entry, then `X-Real-IP`, over the
    /// peer address. Only safe behind a proxy that sets these headers.
    pub fn trusting_forwarded_headers() -> Self {
        Self {
            trust_forwarded_headers: true,
        }
    }

    fn forwarded_ip(request: &RateLimitRequest) -> Option<IpAddr> {
        if let Some(forwarded_for) = request.header("x-forwarded-for") {
            // Take the first IP in the chain
            return forwarded_for.split(',').next()?.trim().parse().ok();
        }

        request.header("x-real-ip")?.trim().parse().ok()
    }
}

#[async_trait]
impl KeyResolver for ClientIpKey {
    async fn resolve_key(&self, request: &RateLimitRequest) -> Result<String, BoxError> {
        let forwarded = if self.trust_forwarded_headers {
            Self::forwarded_ip(request)
        } else {
            None
        };

        match forwarded.or(request.client_ip()) {
            Some(ip) => Ok(ip.to_string()),
            None => Err("request has no client address".into()),
        }
    }
}

/// Keys requests by the value of a header.
#[derive(Debug, Clone)]
pub struct HeaderKey {
    name: HeaderName,
}

impl HeaderKey {
    /// Key by the value of header `name`.
    pub fn new(name: HeaderName) -> Self {
        Self { name }
    }
}

#[async_trait]
impl KeyResolver for HeaderKey {
    async fn resolve_key(&self, request: &RateLimitRequest) -> Result<String, BoxError> {
        match request.header(&self.name) {
            Some(value) if !value.is_empty() => Ok(value.to_string()),
            _ => Err(format!("request has no usable '{}' header", self.name).into()),
        }
    }
}

/// Build the key resolver described by `source`.
pub(crate) fn key_resolver(source: &KeySource) -> Result<Arc<dyn KeyResolver>, String> {
    match source {
        KeySource::ClientIp {
            trust_forwarded_headers: false,
        } => Ok(Arc::new(ClientIpKey::new())),
        KeySource::ClientIp {
            trust_forwarded_headers: true,
        } => Ok(Arc::new(ClientIpKey::trusting_forwarded_headers())),
        KeySource::Header { name } => {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| format!("invalid header name '{name}': {e}"))?;
            Ok(Arc::new(HeaderKey::new(name)))
        }
    }
}

/// Never skips.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverSkip;

#[async_trait]
impl SkipPredicate for NeverSkip {
    async fn should_skip(&self, _: &RateLimitRequest) -> Result<bool, BoxError> {
        Ok(false)
    }
}

/// Skips requests whose path is in a fixed set.
#[derive(Debug, Clone, Default)]
pub struct SkipPaths {
    paths: BTreeSet<String>,
}

impl SkipPaths {
    /// Skip requests to exactly these paths.
    pub fn new(paths: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl SkipPredicate for SkipPaths {
    async fn should_skip(&self, request: &RateLimitRequest) -> Result<bool, BoxError> {
        Ok(self.paths.contains(request.path()))
    }
}
