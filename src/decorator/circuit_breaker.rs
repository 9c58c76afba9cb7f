//! Circuit breaker decorator (spec §4.D.2).

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::time::Instant;
use tower_layer::Layer;
use tower_service::Service;

use crate::error::PipelineError;
use crate::pipeline::{BoxFuture, Request, Response};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Supplies "now", so tests can inject a fake clock instead of sleeping
/// (spec §4.D.2 "ticker injected for tests").
pub trait Ticker: Send + Sync {
    fn now(&self) -> Instant;
}

pub struct SystemTicker;
impl Ticker for SystemTicker {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Classifies a completed call's outcome as success/failure for the
/// breaker's rolling window.
pub trait OutcomeRule: Send + Sync {
    fn is_failure(&self, result: &Result<Response, PipelineError>) -> bool;
}

pub struct DefaultOutcomeRule;
impl OutcomeRule for DefaultOutcomeRule {
    fn is_failure(&self, result: &Result<Response, PipelineError>) -> bool {
        result.is_err()
    }
}

/// Invoked while the breaker is `Open`, instead of calling the delegate.
pub trait BreakerFallback: Send + Sync {
    fn fallback(&self, request: &Request) -> Result<Response, PipelineError>;
}

struct Window {
    successes: AtomicU32,
    failures: AtomicU32,
}

fn state_from_u8(v: u8) -> BreakerState {
    match v {
        0 => BreakerState::Closed,
        1 => BreakerState::Open,
        _ => BreakerState::HalfOpen,
    }
}

fn u8_from_state(s: BreakerState) -> u8 {
    match s {
        BreakerState::Closed => 0,
        BreakerState::Open => 1,
        BreakerState::HalfOpen => 2,
    }
}

struct Shared {
    state: AtomicU8,
    window: Window,
    opened_at: AtomicU64, // millis since an arbitrary epoch captured at breaker creation
    epoch: Instant,
    threshold_ratio: f64,
    min_requests: u32,
    open_duration: Duration,
    ticker: Arc<dyn Ticker>,
    rule: Arc<dyn OutcomeRule>,
}

impl Shared {
    fn now_millis(&self) -> u64 {
        self.ticker.now().saturating_duration_since(self.epoch).as_millis() as u64
    }

    fn record(&self, failure: bool) {
        let state = state_from_u8(self.state.load(Ordering::Acquire));
        match state {
            BreakerState::HalfOpen => {
                if failure {
                    self.trip();
                } else {
                    self.reset_closed();
                }
            }
            BreakerState::Closed => {
                if failure {
                    self.window.failures.fetch_add(1, Ordering::AcqRel);
                } else {
                    self.window.successes.fetch_add(1, Ordering::AcqRel);
                }
                let failures = self.window.failures.load(Ordering::Acquire);
                let successes = self.window.successes.load(Ordering::Acquire);
                let total = failures + successes;
                if total >= self.min_requests {
                    let ratio = failures as f64 / total as f64;
                    if ratio >= self.threshold_ratio {
                        self.trip();
                    }
                }
            }
            BreakerState::Open => {}
        }
    }

    fn trip(&self) {
        self.state.store(u8_from_state(BreakerState::Open), Ordering::Release);
        self.opened_at.store(self.now_millis(), Ordering::Release);
    }

    fn reset_closed(&self) {
        self.window.successes.store(0, Ordering::Release);
        self.window.failures.store(0, Ordering::Release);
        self.state.store(u8_from_state(BreakerState::Closed), Ordering::Release);
    }

    fn current_state(&self) -> BreakerState {
        let state = state_from_u8(self.state.load(Ordering::Acquire));
        if state == BreakerState::Open {
            let opened_at = self.opened_at.load(Ordering::Acquire);
            if self.now_millis().saturating_sub(opened_at) >= self.open_duration.as_millis() as u64 {
                // Transition Open -> HalfOpen lazily on next observation.
                let _ = self.state.compare_exchange(
                    u8_from_state(BreakerState::Open),
                    u8_from_state(BreakerState::HalfOpen),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                return BreakerState::HalfOpen;
            }
        }
        state
    }
}

pub struct CircuitBreakerLayer {
    shared: Arc<Shared>,
    fallback: Arc<dyn BreakerFallback>,
}

impl CircuitBreakerLayer {
    pub fn new(
        threshold_ratio: f64,
        min_requests: u32,
        open_duration: Duration,
        fallback: Arc<dyn BreakerFallback>,
    ) -> Self {
        Self::with_ticker(threshold_ratio, min_requests, open_duration, fallback, Arc::new(SystemTicker))
    }

    pub fn with_ticker(
        threshold_ratio: f64,
        min_requests: u32,
        open_duration: Duration,
        fallback: Arc<dyn BreakerFallback>,
        ticker: Arc<dyn Ticker>,
    ) -> Self {
        let epoch = ticker.now();
        CircuitBreakerLayer {
            shared: Arc::new(Shared {
                state: AtomicU8::new(u8_from_state(BreakerState::Closed)),
                window: Window { successes: AtomicU32::new(0), failures: AtomicU32::new(0) },
                opened_at: AtomicU64::new(0),
                epoch,
                threshold_ratio,
                min_requests,
                open_duration,
                ticker,
                rule: Arc::new(DefaultOutcomeRule),
            }),
            fallback,
        }
    }

    pub fn with_rule(mut self, rule: Arc<dyn OutcomeRule>) -> Self {
        Arc::get_mut(&mut self.shared).expect("layer not yet cloned").rule = rule;
        self
    }

    pub fn state(&self) -> BreakerState {
        self.shared.current_state()
    }
}

impl<S> Layer<S> for CircuitBreakerLayer {
    type Service = CircuitBreakerService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CircuitBreakerService { inner, shared: self.shared.clone(), fallback: self.fallback.clone() }
    }
}

#[derive(Clone)]
pub struct CircuitBreakerService<S> {
    inner: S,
    shared: Arc<Shared>,
    fallback: Arc<dyn BreakerFallback>,
}

impl<S> Service<Request> for CircuitBreakerService<S>
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
        let shared = self.shared.clone();
        let fallback = self.fallback.clone();
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            if shared.current_state() == BreakerState::Open {
                return fallback.fallback(&request);
            }
            let result = inner.call(request).await;
            let failure = shared.rule.is_failure(&result);
            shared.record(failure);
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RequestContext;
    use crate::stream::{BodyStream, HttpHeaders};
    use http::{Method, StatusCode};
    use std::sync::Mutex;

    struct FakeTicker(Mutex<Instant>);
    impl Ticker for FakeTicker {
        fn now(&self) -> Instant {
            *self.0.lock().unwrap()
        }
    }
    impl FakeTicker {
        fn advance(&self, by: Duration) {
            let mut guard = self.0.lock().unwrap();
            *guard += by;
        }
    }

    struct StaticFallback;
    impl BreakerFallback for StaticFallback {
        fn fallback(&self, _request: &Request) -> Result<Response, PipelineError> {
            let (_tx, body) = BodyStream::channel(1);
            Ok(Response::new(HttpHeaders::response(StatusCode::SERVICE_UNAVAILABLE), body))
        }
    }

    #[derive(Clone)]
    struct AlwaysFail;
    impl Service<Request> for AlwaysFail {
        type Response = Response;
        type Error = PipelineError;
        type Future = BoxFuture<'static, Result<Response, PipelineError>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _request: Request) -> Self::Future {
            Box::pin(async move { Err(PipelineError::peer_error("boom")) })
        }
    }

    fn request() -> Request {
        let ctx = std::sync::Arc::new(RequestContext::new());
        let (_tx, body) = BodyStream::channel(1);
        Request::new(ctx, HttpHeaders::request(Method::GET, "/"), body)
    }

    #[tokio::test]
    async fn trips_open_after_threshold_ratio_exceeded() {
        let ticker = Arc::new(FakeTicker(Mutex::new(Instant::now())));
        let layer = CircuitBreakerLayer::with_ticker(
            0.5,
            2,
            Duration::from_secs(30),
            Arc::new(StaticFallback),
            ticker.clone(),
        );
        let mut svc = layer.layer(AlwaysFail);
        let _ = svc.call(request()).await;
        let _ = svc.call(request()).await;
        assert_eq!(svc.shared.current_state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn open_breaker_uses_fallback_without_calling_delegate() {
        let ticker = Arc::new(FakeTicker(Mutex::new(Instant::now())));
        let layer = CircuitBreakerLayer::with_ticker(
            0.1,
            1,
            Duration::from_secs(30),
            Arc::new(StaticFallback),
            ticker.clone(),
        );
        let mut svc = layer.layer(AlwaysFail);
        let _ = svc.call(request()).await;
        assert_eq!(svc.shared.current_state(), BreakerState::Open);
        let response = svc.call(request()).await.unwrap();
        assert_eq!(response.headers.status(), Some(StatusCode::SERVICE_UNAVAILABLE));
    }

    #[tokio::test]
    async fn half_open_after_open_duration_elapses() {
        let ticker = Arc::new(FakeTicker(Mutex::new(Instant::now())));
        let layer = CircuitBreakerLayer::with_ticker(
            0.1,
            1,
            Duration::from_millis(100),
            Arc::new(StaticFallback),
            ticker.clone(),
        );
        let mut svc = layer.layer(AlwaysFail);
        let _ = svc.call(request()).await;
        assert_eq!(svc.shared.current_state(), BreakerState::Open);
        ticker.advance(Duration::from_millis(200));
        assert_eq!(svc.shared.current_state(), BreakerState::HalfOpen);
    }
}
