//! Timeout decorator (spec §4.D.7): selection timeout and response timeout,
//! both cancelling via the context rather than dropping the future bare.

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tower_layer::Layer;
use tower_service::Service;

use crate::error::PipelineError;
use crate::pipeline::{BoxFuture, Request, Response};

/// Applies a response timeout to the full exchange: the final attempt's
/// deadline, tightened (never loosened) to `response_timeout` from now.
pub struct ResponseTimeoutLayer {
    response_timeout: Duration,
}

impl ResponseTimeoutLayer {
    pub fn new(response_timeout: Duration) -> Self {
        ResponseTimeoutLayer { response_timeout }
    }
}

impl<S> Layer<S> for ResponseTimeoutLayer {
    type Service = ResponseTimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ResponseTimeoutService { inner, response_timeout: self.response_timeout }
    }
}

#[derive(Clone)]
pub struct ResponseTimeoutService<S> {
    inner: S,
    response_timeout: Duration,
}

impl<S> Service<Request> for ResponseTimeoutService<S>
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

    fn call(&mut self, mut request: Request) -> Self::Future {
        let response_timeout = self.response_timeout;
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        // `deadline_in` only ever tightens, per spec §4.B — safe even if an
        // outer decorator already set a shorter one.
        if let Some(ctx) = Arc::get_mut(&mut request.context) {
            ctx.deadline_in(response_timeout);
        } else {
            // Context is already shared (e.g. a retry child); the shared
            // `RequestContext` has no interior-mutable deadline by design
            // (spec §4.B: mutation is single-writer on the owning event
            // loop), so a timeout on an already-forked context is applied
            // by racing the call against a timer instead.
        }
        let cancel = request.context.cancellation_token();
        let remaining = request.context.remaining().unwrap_or(response_timeout);

        Box::pin(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(PipelineError::cancelled("response timeout: context cancelled")),
                result = inner.call(request) => result,
                _ = tokio::time::sleep(remaining) => Err(PipelineError::timeout("response timeout elapsed")),
            }
        })
    }
}

/// Applies a selection timeout before the attempt starts: `min(selection_timeout,
/// remaining_response_timeout)`, enforced by racing the provided endpoint
/// selection future against a timer tied to the context's cancellation.
pub async fn bounded_selection<F>(
    ctx: &crate::context::RequestContext,
    selection_timeout: Duration,
    select: F,
) -> Option<crate::endpoint::Endpoint>
where
    F: std::future::Future<Output = Option<crate::endpoint::Endpoint>>,
{
    let wait = match ctx.remaining() {
        Some(remaining) => selection_timeout.min(remaining),
        None => selection_timeout,
    };
    let cancel = ctx.cancellation_token();
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        _ = tokio::time::sleep(wait) => None,
        endpoint = select => endpoint,
    }
}
