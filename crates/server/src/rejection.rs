//! Producing the response for a rejected request.

use std::{future::Future, pin::Pin, sync::Arc};

use async_trait::async_trait;
use axum::{Json, body::Body, response::IntoResponse};
use config::{RateLimitConfig, RejectionMessage};
use http::{Request, Response, StatusCode};
use rate_limit::Decision;

type ResponseFuture = Pin<Box<dyn Future<Output = Response<Body>> + Send>>;

/// The downstream continuation of a request.
///
/// Calling [`Next::run`] hands the request to the wrapped service, which is
/// how a [`RejectionHandler`] admits a request it was asked to reject.
pub struct Next {
    inner: Box<dyn FnOnce(Request<Body>) -> ResponseFuture + Send>,
}

impl Next {
    /// Wrap a continuation.
    pub fn new<F, Fut>(next: F) -> Self
    where
        F: FnOnce(Request<Body>) -> Fut + Send + 'static,
        Fut: Future<Output = Response<Body>> + Send + 'static,
    {
        Self {
            inner: Box::new(move |request| Box::pin(next(request))),
        }
    }

    /// Run the downstream service.
    pub async fn run(self, request: Request<Body>) -> Response<Body> {
        (self.inner)(request).await
    }
}

impl std::fmt::Debug for Next {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Next")
    }
}

/// Response options for rejected requests.
#[derive(Debug, Clone)]
pub struct RejectionOptions {
    /// Status of the rejection response.
    pub status_code: StatusCode,
    /// Body of the rejection response.
    pub message: RejectionMessage,
}

impl Default for RejectionOptions {
    fn default() -> Self {
        Self {
            status_code: StatusCode::TOO_MANY_REQUESTS,
            message: RejectionMessage::default(),
        }
    }
}

impl RejectionOptions {
    /// Read the options from configuration.
    pub fn from_config(config: &RateLimitConfig) -> anyhow::Result<Self> {
        let status_code = StatusCode::from_u16(config.status_code)
            .map_err(|_| anyhow::anyhow!("Invalid rate limit status code: {}", config.status_code))?;

        Ok(Self {
            status_code,
            message: config.message.clone(),
        })
    }
}

/// Everything a [`RejectionHandler`] knows about why a request was rejected.
#[derive(Debug, Clone)]
pub struct Rejection {
    /// The decision that rejected the request.
    pub decision: Decision,
    /// The configured response options.
    pub options: Arc<RejectionOptions>,
}

/// Finalizes a rejected request.
///
/// The informational headers of the decision are added to the returned
/// response afterwards, unless the handler already set them.
#[async_trait]
pub trait RejectionHandler: Send + Sync {
    /// Produce the response for a rejected request. Calling `next` admits it anyway.
    async fn reject(&self, rejection: Rejection, request: Request<Body>, next: Next) -> Response<Body>;
}

#[async_trait]
impl<F, Fut> RejectionHandler for F
where
    F: Fn(Rejection, Request<Body>, Next) -> Fut + Send + Sync,
    Fut: Future<Output = Response<Body>> + Send + 'static,
{
    async fn reject(&self, rejection: Rejection, request: Request<Body>, next: Next) -> Response<Body> {
        self(rejection, request, next).await
    }
}

/// Responds with the configured status and message.
///
/// Text is sent as `text/plain`, a structured value as JSON and raw bytes as
/// `application/octet-stream`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRejectionHandler;

#[async_trait]
impl RejectionHandler for DefaultRejectionHandler {
    async fn reject(&self, rejection: Rejection, _: Request<Body>, _: Next) -> Response<Body> {
        let status = rejection.options.status_code;

        match &rejection.options.message {
            RejectionMessage::Text(text) => (status, text.clone()).into_response(),
            RejectionMessage::Json(value) => (status, Json(value.clone())).into_response(),
            RejectionMessage::Bytes(bytes) => (status, bytes.clone()).into_response(),
        }
    }
}
