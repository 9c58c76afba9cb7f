//! Authorization decorator (spec §4.D.1).

use std::sync::Arc;
use std::task::{Context, Poll};

use http::StatusCode;
use tower_layer::Layer;
use tower_service::Service;

use crate::error::PipelineError;
use crate::pipeline::{BoxFuture, Request, Response};
use crate::stream::{BodyStream, HttpHeaders};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDecision {
    Allowed,
    Denied,
    Abstained,
}

/// Inspects the request (e.g. extracting a typed token from the
/// `Authorization` header per a format — Basic, OAuth1a, OAuth2) and
/// returns a decision. Authorizers may be async.
#[async_trait::async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(&self, request: &Request) -> AuthDecision;
}

/// Invoked when every configured authorizer abstains or the first
/// non-abstaining one denies.
pub trait AuthFailureHandler: Send + Sync {
    fn on_failure(&self, request: &Request) -> Response;
}

pub struct DefaultDenyHandler;

impl AuthFailureHandler for DefaultDenyHandler {
    fn on_failure(&self, _request: &Request) -> Response {
        let (_tx, body) = BodyStream::channel(1);
        Response::new(HttpHeaders::response(StatusCode::UNAUTHORIZED), body)
    }
}

pub struct AuthLayer {
    authorizers: Arc<Vec<Arc<dyn Authorizer>>>,
    on_failure: Arc<dyn AuthFailureHandler>,
}

impl AuthLayer {
    pub fn new(authorizers: Vec<Arc<dyn Authorizer>>) -> Self {
        AuthLayer { authorizers: Arc::new(authorizers), on_failure: Arc::new(DefaultDenyHandler) }
    }

    pub fn with_failure_handler(mut self, handler: Arc<dyn AuthFailureHandler>) -> Self {
        self.on_failure = handler;
        self
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService { inner, authorizers: self.authorizers.clone(), on_failure: self.on_failure.clone() }
    }
}

#[derive(Clone)]
pub struct AuthService<S> {
    inner: S,
    authorizers: Arc<Vec<Arc<dyn Authorizer>>>,
    on_failure: Arc<dyn AuthFailureHandler>,
}

impl<S> Service<Request> for AuthService<S>
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
        let authorizers = self.authorizers.clone();
        let on_failure = self.on_failure.clone();
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        Box::pin(async move {
            for authorizer in authorizers.iter() {
                match authorizer.authorize(&request).await {
                    AuthDecision::Allowed => return inner.call(request).await,
                    AuthDecision::Denied => return Ok(on_failure.on_failure(&request)),
                    AuthDecision::Abstained => continue,
                }
            }
            Ok(on_failure.on_failure(&request))
        })
    }
}
