//! Rate limiting middleware for HTTP requests.

use std::{
    convert::Infallible,
    future::Future,
    net::SocketAddr,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use axum::{body::Body, extract::ConnectInfo, response::IntoResponse};
use config::RateLimitConfig;
use http::{HeaderMap, Request, Response, StatusCode};
use rate_limit::{Evaluation, RateLimitManager, RateLimitRequest};
use tower::Layer;

use crate::rejection::{DefaultRejectionHandler, Next, Rejection, RejectionHandler, RejectionOptions};

/// Applies fixed-window rate limiting to every request of the wrapped service.
#[derive(Clone)]
pub struct RateLimitLayer {
    manager: Arc<RateLimitManager>,
    handler: Arc<dyn RejectionHandler>,
    options: Arc<RejectionOptions>,
}

impl RateLimitLayer {
    /// Limit requests with `manager`, rejecting with a 429 and the default message.
    pub fn new(manager: Arc<RateLimitManager>) -> Self {
        Self {
            manager,
            handler: Arc::new(DefaultRejectionHandler),
            options: Arc::new(RejectionOptions::default()),
        }
    }

    /// Build the manager, storage and rejection options from configuration.
    pub async fn from_config(config: &RateLimitConfig) -> anyhow::Result<Self> {
        let manager = RateLimitManager::from_config(config).await?;
        let options = RejectionOptions::from_config(config)?;

        Ok(Self::new(Arc::new(manager)).with_options(options))
    }

    /// Replace the rejection handler.
    pub fn with_handler(mut self, handler: impl RejectionHandler + 'static) -> Self {
        self.handler = Arc::new(handler);
        self
    }

    /// Replace the status and message used for rejections.
    pub fn with_options(mut self, options: RejectionOptions) -> Self {
        self.options = Arc::new(options);
        self
    }
}

impl<Service> Layer<Service> for RateLimitLayer
where
    Service: Send + Clone,
{
    type Service = RateLimitService<Service>;

    fn layer(&self, next: Service) -> Self::Service {
        RateLimitService {
            next,
            manager: self.manager.clone(),
            handler: self.handler.clone(),
            options: self.options.clone(),
        }
    }
}

/// Service created by [`RateLimitLayer`].
#[derive(Clone)]
pub struct RateLimitService<Service> {
    next: Service,
    manager: Arc<RateLimitManager>,
    handler: Arc<dyn RejectionHandler>,
    options: Arc<RejectionOptions>,
}

impl<Service> tower::Service<Request<Body>> for RateLimitService<Service>
where
    Service: tower::Service<Request<Body>, Response = Response<Body>, Error = Infallible> + Send + Clone + 'static,
    Service::Future: Send + 'static,
{
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response<Body>, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.next.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        // The readied service handles this request, a fresh clone the next one.
        let clone = self.next.clone();
        let mut next = std::mem::replace(&mut self.next, clone);

        let manager = self.manager.clone();
        let handler = self.handler.clone();
        let options = self.options.clone();

        Box::pin(async move {
            let rate_limit_request = rate_limit_request(&req);

            let decision = match manager.check(&rate_limit_request).await {
                Ok(Evaluation::Decided(decision)) => decision,
                Ok(Evaluation::Skipped) => return next.call(req).await,
                Err(err) => {
                    log::error!("Failed to evaluate rate limit for {} {}: {err}", req.method(), req.uri().path());

                    return Ok((StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response());
                }
            };

            let headers = decision.headers.clone();

            let mut response = if decision.admitted {
                next.call(req).await?
            } else {
                log::debug!("Rejecting request for key '{}'", decision.key);

                let next = Next::new(move |request| async move {
                    next.call(request).await.unwrap_or_else(|never| match never {})
                });

                handler.reject(Rejection { decision, options }, req, next).await
            };

            apply_headers(&mut response, &headers);

            Ok(response)
        })
    }
}

/// Copy the informational headers onto `response`, keeping values that are
/// already there.
fn apply_headers(response: &mut Response<Body>, headers: &HeaderMap) {
    for (name, value) in headers {
        response.headers_mut().entry(name).or_insert_with(|| value.clone());
    }
}

fn rate_limit_request(req: &Request<Body>) -> RateLimitRequest {
    let mut builder = RateLimitRequest::builder()
        .method(req.method().clone())
        .uri(req.uri().clone())
        .headers(req.headers().clone());

    if let Some(ConnectInfo(address)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        builder = builder.ip(address.ip());
    }

    builder.build()
}
