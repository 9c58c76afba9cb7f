//! Metrics decorator (spec §4.D.5).
//!
//! Prometheus/Micrometer registries are out of scope (spec §1); this module
//! only defines the trait-shaped seam a real registry plugs into.

use std::sync::Arc;
use std::task::{Context, Poll};

use tower_layer::Layer;
use tower_service::Service;

use crate::error::PipelineError;
use crate::pipeline::{BoxFuture, Request, Response};

/// One completed request's metric tags (spec §4.D.5).
#[derive(Debug, Clone)]
pub struct RequestTags {
    pub method: http::Method,
    pub path_pattern: String,
    pub status: Option<u16>,
    pub result: &'static str,
    pub host: Option<String>,
}

/// Where completed-request counters go. A real implementation adapts this
/// to a Prometheus/Micrometer registry; tests use an in-memory sink.
pub trait MetricSink: Send + Sync {
    fn record(&self, tags: RequestTags);
}

/// Classifies an outcome as `"success"` or `"failure"` for the `result` tag.
/// Default rule: `status < 400`.
pub trait ResultPredicate: Send + Sync {
    fn is_success(&self, result: &Result<Response, PipelineError>) -> bool;
}

pub struct DefaultResultPredicate;
impl ResultPredicate for DefaultResultPredicate {
    fn is_success(&self, result: &Result<Response, PipelineError>) -> bool {
        match result {
            Ok(response) => response.headers.status().map(|s| s.as_u16() < 400).unwrap_or(true),
            Err(_) => false,
        }
    }
}

/// Derives the `path-pattern` tag from a request. Defaults to the literal
/// path; a router-aware implementation would substitute the matched route
/// template (e.g. `/users/{id}`) to keep cardinality bounded.
pub trait PathPatternExtractor: Send + Sync {
    fn path_pattern(&self, request: &Request) -> String;
}

pub struct LiteralPathPattern;
impl PathPatternExtractor for LiteralPathPattern {
    fn path_pattern(&self, request: &Request) -> String {
        request.headers.pseudo().path.clone().unwrap_or_default()
    }
}

pub struct MetricsLayer {
    sink: Arc<dyn MetricSink>,
    predicate: Arc<dyn ResultPredicate>,
    path_pattern: Arc<dyn PathPatternExtractor>,
}

impl MetricsLayer {
    pub fn new(sink: Arc<dyn MetricSink>) -> Self {
        MetricsLayer { sink, predicate: Arc::new(DefaultResultPredicate), path_pattern: Arc::new(LiteralPathPattern) }
    }

    pub fn with_result_predicate(mut self, predicate: Arc<dyn ResultPredicate>) -> Self {
        self.predicate = predicate;
        self
    }

    pub fn with_path_pattern(mut self, extractor: Arc<dyn PathPatternExtractor>) -> Self {
        self.path_pattern = extractor;
        self
    }
}

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService {
            inner,
            sink: self.sink.clone(),
            predicate: self.predicate.clone(),
            path_pattern: self.path_pattern.clone(),
        }
    }
}

#[derive(Clone)]
pub struct MetricsService<S> {
    inner: S,
    sink: Arc<dyn MetricSink>,
    predicate: Arc<dyn ResultPredicate>,
    path_pattern: Arc<dyn PathPatternExtractor>,
}

impl<S> Service<Request> for MetricsService<S>
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
        let sink = self.sink.clone();
        let predicate = self.predicate.clone();
        let path_pattern = self.path_pattern.path_pattern(&request);
        let method = request.headers.pseudo().method.clone().unwrap_or(http::Method::GET);
        let host = request.context.endpoint().map(|e| e.host().to_string());
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let result = inner.call(request).await;
            let status = if let Ok(response) = &result { response.headers.status().map(|s| s.as_u16()) } else { None };
            let tags = RequestTags {
                method,
                path_pattern,
                status,
                result: if predicate.is_success(&result) { "success" } else { "failure" },
                host,
            };
            sink.record(tags);
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

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<RequestTags>>);
    impl MetricSink for RecordingSink {
        fn record(&self, tags: RequestTags) {
            self.0.lock().unwrap().push(tags);
        }
    }

    #[derive(Clone)]
    struct Echo(StatusCode);
    impl Service<Request> for Echo {
        type Response = Response;
        type Error = PipelineError;
        type Future = BoxFuture<'static, Result<Response, PipelineError>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _request: Request) -> Self::Future {
            let status = self.0;
            Box::pin(async move {
                let (_tx, body) = BodyStream::channel(1);
                Ok(Response::new(HttpHeaders::response(status), body))
            })
        }
    }

    fn request() -> Request {
        let ctx = std::sync::Arc::new(RequestContext::new());
        let (_tx, body) = BodyStream::channel(1);
        Request::new(ctx, HttpHeaders::request(Method::GET, "/users/42"), body)
    }

    #[tokio::test]
    async fn success_status_is_tagged_success() {
        let sink = Arc::new(RecordingSink::default());
        let mut svc = MetricsLayer::new(sink.clone()).layer(Echo(StatusCode::OK));
        svc.call(request()).await.unwrap();
        let recorded = sink.0.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].result, "success");
        assert_eq!(recorded[0].status, Some(200));
        assert_eq!(recorded[0].path_pattern, "/users/42");
    }

    #[tokio::test]
    async fn server_error_status_is_tagged_failure() {
        let sink = Arc::new(RecordingSink::default());
        let mut svc = MetricsLayer::new(sink.clone()).layer(Echo(StatusCode::INTERNAL_SERVER_ERROR));
        svc.call(request()).await.unwrap();
        assert_eq!(sink.0.lock().unwrap()[0].result, "failure");
    }

    #[tokio::test]
    async fn custom_predicate_overrides_the_default_status_threshold() {
        struct AlwaysSuccess;
        impl ResultPredicate for AlwaysSuccess {
            fn is_success(&self, _result: &Result<Response, PipelineError>) -> bool {
                true
            }
        }
        let sink = Arc::new(RecordingSink::default());
        let mut svc = MetricsLayer::new(sink.clone())
            .with_result_predicate(Arc::new(AlwaysSuccess))
            .layer(Echo(StatusCode::INTERNAL_SERVER_ERROR));
        svc.call(request()).await.unwrap();
        assert_eq!(sink.0.lock().unwrap()[0].result, "success");
    }
}
