//! Retry decorator (spec §4.D.3).

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use rand::Rng;
use tower_layer::Layer;
use tower_service::Service;

use crate::endpoint::Endpoint;
use crate::error::PipelineError;
use crate::log::LogProperty;
use crate::pipeline::{BoxFuture, Request, Response};
use crate::retry_limiter::RetryLimiter;

/// The delay to apply before attempt `n` (1-indexed; attempt 1 is the
/// first try and is never delayed).
#[derive(Debug, Clone)]
pub enum Backoff {
    Fixed { delay: Duration },
    ExponentialCapped { initial: Duration, max: Duration, factor: f64 },
}

impl Backoff {
    /// `jitter` is applied as a uniform `[-jitter, +jitter]` millisecond
    /// offset via the supplied RNG (spec §4.D.3).
    pub fn delay_for_attempt(&self, attempt: u32, jitter: Duration, rng: &mut dyn RngSource) -> Duration {
        let base = match self {
            Backoff::Fixed { delay } => *delay,
            Backoff::ExponentialCapped { initial, max, factor } => {
                let scaled = initial.as_secs_f64() * factor.powi(attempt.saturating_sub(1) as i32);
                Duration::from_secs_f64(scaled).min(*max)
            }
        };
        if jitter.is_zero() {
            return base;
        }
        let jitter_ms = jitter.as_millis() as i64;
        let offset_ms = rng.gen_range_i64(-jitter_ms, jitter_ms);
        if offset_ms >= 0 {
            base + Duration::from_millis(offset_ms as u64)
        } else {
            base.saturating_sub(Duration::from_millis((-offset_ms) as u64))
        }
    }
}

/// Abstracts the RNG used for jitter so tests can supply a deterministic
/// source without threading a generic parameter through every decorator.
pub trait RngSource: Send + Sync {
    fn gen_range_i64(&mut self, low: i64, high: i64) -> i64;
}

pub struct ThreadRng;
impl RngSource for ThreadRng {
    fn gen_range_i64(&mut self, low: i64, high: i64) -> i64 {
        if low >= high {
            return low;
        }
        rand::thread_rng().gen_range(low..=high)
    }
}

/// Picks an [`Endpoint`] for each attempt; the first attempt may reuse an
/// endpoint already set on the parent context, later attempts re-select.
pub trait EndpointSource: Send + Sync {
    fn pick(&self) -> Option<Endpoint>;
}

pub struct FixedEndpoint(pub Endpoint);
impl EndpointSource for FixedEndpoint {
    fn pick(&self) -> Option<Endpoint> {
        Some(self.0.clone())
    }
}

pub struct RetryLayer {
    max_attempts: u32,
    backoff: Backoff,
    jitter: Duration,
    limiter: Arc<dyn RetryLimiter>,
    endpoints: Arc<dyn EndpointSource>,
}

impl RetryLayer {
    pub fn new(
        max_attempts: u32,
        backoff: Backoff,
        limiter: Arc<dyn RetryLimiter>,
        endpoints: Arc<dyn EndpointSource>,
    ) -> Self {
        RetryLayer { max_attempts: max_attempts.max(1), backoff, jitter: Duration::ZERO, limiter, endpoints }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }
}

impl<S> Layer<S> for RetryLayer {
    type Service = RetryService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RetryService {
            inner,
            max_attempts: self.max_attempts,
            backoff: self.backoff.clone(),
            jitter: self.jitter,
            limiter: self.limiter.clone(),
            endpoints: self.endpoints.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RetryService<S> {
    inner: S,
    max_attempts: u32,
    backoff: Backoff,
    jitter: Duration,
    limiter: Arc<dyn RetryLimiter>,
    endpoints: Arc<dyn EndpointSource>,
}

impl<S> Service<Request> for RetryService<S>
where
    S: Service<Request, Response = Response, Error = PipelineError> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = PipelineError;
    type Future = BoxFuture<'static, Result<Response, PipelineError>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let max_attempts = self.max_attempts;
        let backoff = self.backoff.clone();
        let jitter = self.jitter;
        let limiter = self.limiter.clone();
        let endpoints = self.endpoints.clone();
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let parent_ctx = request.context.clone();
            let headers = request.headers;
            let mut rng = ThreadRng;
            let mut last_err = None;

            for attempt in 1..=max_attempts {
                if parent_ctx.is_cancelled() {
                    return Err(PipelineError::cancelled("retry: parent cancelled before attempt"));
                }

                if attempt > 1 {
                    if !limiter.should_retry(&parent_ctx, attempt) {
                        break;
                    }
                    let delay = backoff.delay_for_attempt(attempt, jitter, &mut rng);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }

                let Some(endpoint) = endpoints.pick() else {
                    last_err = Some(PipelineError::unprocessed("retry: no endpoint available"));
                    continue;
                };

                let child_ctx = Arc::new(parent_ctx.child(endpoint));
                let (_tx, body) = crate::stream::BodyStream::channel(1);
                let child_request = Request::new(child_ctx.clone(), headers.clone(), body);

                // A response carries its body stream onward still live, so
                // its child log completes only once that stream (and any
                // tap on it, e.g. content preview) finishes draining — that
                // is the terminal exchange driver's job, not this
                // decorator's. A failed attempt has no lingering stream, so
                // its child log is known-complete right here.
                match inner.call(child_request).await {
                    Ok(response) => return Ok(response),
                    Err(err) => {
                        child_ctx.log_builder().complete(&[LogProperty::RequestContentPreview, LogProperty::ResponseContentPreview]);
                        last_err = Some(err);
                    }
                }
            }

            Err(last_err.unwrap_or_else(|| PipelineError::unprocessed("retry: exhausted with no recorded error")))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RequestContext;
    use crate::retry_limiter::FixedRateLimiter;
    use crate::stream::{BodyStream, HttpHeaders};
    use http::{Method, StatusCode};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc as StdArc;

    #[derive(Clone)]
    struct FailNTimes {
        calls: StdArc<AtomicUsize>,
        fail_first: usize,
    }

    impl Service<Request> for FailNTimes {
        type Response = Response;
        type Error = PipelineError;
        type Future = BoxFuture<'static, Result<Response, PipelineError>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _request: Request) -> Self::Future {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let fail_first = self.fail_first;
            Box::pin(async move {
                if n < fail_first {
                    Err(PipelineError::unprocessed("synthetic failure"))
                } else {
                    let (_tx, body) = BodyStream::channel(1);
                    Ok(Response::new(HttpHeaders::response(StatusCode::OK), body))
                }
            })
        }
    }

    fn request() -> Request {
        let ctx = StdArc::new(RequestContext::new());
        let (_tx, body) = BodyStream::channel(1);
        Request::new(ctx, HttpHeaders::request(Method::GET, "/"), body)
    }

    fn endpoints() -> Arc<dyn EndpointSource> {
        Arc::new(FixedEndpoint(Endpoint::new("example.com", Some(443))))
    }

    struct DenyAll;
    impl RetryLimiter for DenyAll {
        fn should_retry(&self, _ctx: &RequestContext, _attempt: u32) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures_within_max_attempts() {
        let calls = StdArc::new(AtomicUsize::new(0));
        let limiter: Arc<dyn RetryLimiter> = Arc::new(FixedRateLimiter::new(100.0));
        let layer = RetryLayer::new(3, Backoff::Fixed { delay: Duration::from_millis(1) }, limiter, endpoints());
        let mut svc = layer.layer(FailNTimes { calls: calls.clone(), fail_first: 2 });
        let response = svc.call(request()).await.unwrap();
        assert_eq!(response.headers.status(), Some(StatusCode::OK));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts_exhausted() {
        let calls = StdArc::new(AtomicUsize::new(0));
        let limiter: Arc<dyn RetryLimiter> = Arc::new(FixedRateLimiter::new(100.0));
        let layer = RetryLayer::new(2, Backoff::Fixed { delay: Duration::from_millis(1) }, limiter, endpoints());
        let mut svc = layer.layer(FailNTimes { calls: calls.clone(), fail_first: 10 });
        let err = svc.call(request()).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Unprocessed);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retry_limiter_denial_stops_further_attempts() {
        let calls = StdArc::new(AtomicUsize::new(0));
        let limiter: Arc<dyn RetryLimiter> = Arc::new(DenyAll);
        let layer = RetryLayer::new(5, Backoff::Fixed { delay: Duration::from_millis(1) }, limiter, endpoints());
        let mut svc = layer.layer(FailNTimes { calls: calls.clone(), fail_first: 10 });
        let _ = svc.call(request()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
