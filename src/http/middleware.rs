//! Middleware that puts a [`RateLimiter`] in front of request handlers.
//!
//! Two shapes are offered. [`RateLimitLayer`] is a tower layer for axum
//! routers. [`RateLimitLayer::wrap`] decorates a plain async handler taking
//! a request and a caller-defined context. Both resolve the client key,
//! check and record admission as one step, and either answer with a 429 or
//! hand the request to the inner handler untouched.

use axum::http::Request;
use axum::response::Response;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::debug;

use super::rejection::rejection_response;
use crate::ratelimit::{RateLimiter, RequestInfo};

/// Admit or reject `request`. Returns the rejection when over the limit.
fn admit<B>(limiter: &RateLimiter, request: &Request<B>) -> Option<Response> {
    let key = limiter.fingerprint(&RequestInfo::from_request(request));
    if limiter.try_acquire(&key) {
        return None;
    }

    debug!(
        key = %key,
        method = %request.method(),
        path = %request.uri().path(),
        "Rejecting rate limited request"
    );
    Some(rejection_response(limiter.config().window_ms))
}

/// Tower layer applying a rate limiter to every request.
#[derive(Debug, Clone)]
pub struct RateLimitLayer {
    limiter: Arc<RateLimiter>,
}

impl RateLimitLayer {
    /// Create a layer backed by `limiter`.
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }

    /// The limiter behind this layer.
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Decorate an async `handler(request, context)`.
    pub fn wrap<H>(&self, handler: H) -> Guarded<H> {
        Guarded {
            handler,
            limiter: self.limiter.clone(),
        }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
        }
    }
}

/// Service produced by [`RateLimitLayer`].
#[derive(Debug, Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: Arc<RateLimiter>,
}

impl<S, B> Service<Request<B>> for RateLimitService<S>
where
    S: Service<Request<B>, Response = Response> + Clone,
    S::Error: Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<B>) -> Self::Future {
        if let Some(rejection) = admit(&self.limiter, &request) {
            // The readied inner service stays in place for the next call
            return Box::pin(async move { Ok(rejection) });
        }

        // Call the instance that was polled ready, leave a fresh clone behind
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        Box::pin(inner.call(request))
    }
}

/// A handler decorated by [`RateLimitLayer::wrap`].
#[derive(Debug, Clone)]
pub struct Guarded<H> {
    handler: H,
    limiter: Arc<RateLimiter>,
}

impl<H> Guarded<H> {
    /// Invoke the handler if the caller is within its limit.
    ///
    /// A rejected request never reaches the handler. An admitted one gets
    /// the handler's result back exactly, errors included.
    pub async fn call<B, C, Fut, E>(&self, request: Request<B>, context: C) -> Result<Response, E>
    where
        H: Fn(Request<B>, C) -> Fut,
        Fut: Future<Output = Result<Response, E>>,
    {
        if let Some(rejection) = admit(&self.limiter, &request) {
            return Ok(rejection);
        }
        (self.handler)(request, context).await
    }

    /// The limiter guarding this handler.
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }
}
