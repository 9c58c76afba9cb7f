//! Accepts connections and serves them over HTTP/1.1 or H2C, auto-detected
//! per connection via `hyper-util`'s protocol sniffing (spec §4.E, §6), and
//! recovers [`PipelineError`] into an HTTP response per spec §7's status
//! table rather than tearing the connection down (mirrors tonic's
//! `recover_error` service).

use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use http::{Request as HttpRequest, Response as HttpResponse};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::Service as HyperService;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::net::{TcpListener, TcpStream};
use tower::ServiceExt;

use super::body_adapter::{drain_body_into, into_hyper_body, BoxBody};
use crate::context::RequestContext;
use crate::error::PipelineError;
use crate::pipeline::{PipelineService, Request as PipelineRequest, Response as PipelineResponse};
use crate::stream::{BodyStream, HttpHeaders};

/// Adapts a cloneable [`PipelineService`] into the `hyper` request-service
/// shape, recovering errors into HTTP responses instead of failing the
/// connection.
#[derive(Clone)]
pub struct HyperAdapter<S> {
    inner: S,
}

impl<S> HyperAdapter<S> {
    pub fn new(inner: S) -> Self {
        HyperAdapter { inner }
    }
}

impl<S> HyperService<HttpRequest<Incoming>> for HyperAdapter<S>
where
    S: PipelineService + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = HttpResponse<BoxBody>;
    type Error = Infallible;
    type Future = std::pin::Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: HttpRequest<Incoming>) -> Self::Future {
        let service = self.inner.clone();
        Box::pin(async move { Ok(dispatch(service, req).await) })
    }
}

async fn dispatch<S>(service: S, req: HttpRequest<Incoming>) -> HttpResponse<BoxBody>
where
    S: PipelineService + Send,
{
    match run(service, req).await {
        Ok(response) => response,
        Err(err) => error_response(err),
    }
}

async fn run<S>(service: S, req: HttpRequest<Incoming>) -> Result<HttpResponse<BoxBody>, PipelineError>
where
    S: PipelineService + Send,
{
    let (parts, incoming) = req.into_parts();
    let mut headers = HttpHeaders::request(parts.method.clone(), parts.uri.path().to_string());
    headers.set_scheme(parts.uri.scheme_str().unwrap_or("http"));
    if let Some(authority) = parts.uri.authority() {
        headers.set_authority(authority.as_str());
    }
    for (name, value) in parts.headers.iter() {
        headers.append(name.clone(), value.clone());
    }

    let (sender, body) = BodyStream::channel(32);
    tokio::spawn(async move {
        let _ = drain_body_into(incoming, &sender).await;
    });

    let context = Arc::new(RequestContext::new());
    let request = PipelineRequest::new(context, headers, body);
    let response = service.oneshot(request).await?;
    to_hyper_response(response)
}

fn to_hyper_response(response: PipelineResponse) -> Result<HttpResponse<BoxBody>, PipelineError> {
    let status = response.headers.status().unwrap_or(http::StatusCode::OK);
    let mut builder = HttpResponse::builder().status(status);
    for (name, value) in response.headers.fields().iter() {
        builder = builder.header(name, value);
    }
    let body = into_hyper_body(response.body).map_err(|_| PipelineError::protocol("response body already subscribed"))?;
    builder.body(body).map_err(|e| PipelineError::protocol(e.to_string()))
}

fn error_response(err: PipelineError) -> HttpResponse<BoxBody> {
    let status = err.kind().http_status();
    let body: BoxBody = Full::new(Bytes::from(err.message().to_string()))
        .map_err(|never: Infallible| match never {})
        .boxed();
    HttpResponse::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(body)
        .unwrap_or_else(|_| HttpResponse::new(Full::new(Bytes::new()).map_err(|never: Infallible| match never {}).boxed()))
}

/// Accept loop: each connection is served on its own task, with protocol
/// (HTTP/1.1 vs H2C) auto-detected from the connection preface.
pub async fn serve<S>(listener: TcpListener, service: S) -> std::io::Result<()>
where
    S: PipelineService + Clone + Send + 'static,
    S::Future: Send,
{
    loop {
        let (stream, _peer) = listener.accept().await?;
        let service = service.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_connection(stream, service).await {
                tracing::warn!(error = %e, "connection ended with an error");
            }
        });
    }
}

/// Serve a single accepted connection, auto-negotiating HTTP/1.1 vs H2C.
pub async fn serve_connection<S>(stream: TcpStream, service: S) -> Result<(), PipelineError>
where
    S: PipelineService + Clone + Send + 'static,
    S::Future: Send,
{
    let io = TokioIo::new(stream);
    auto::Builder::new(TokioExecutor::new())
        .serve_connection(io, HyperAdapter::new(service))
        .await
        .map_err(|e| PipelineError::peer_error(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn error_response_maps_kind_to_status_and_carries_the_message() {
        let err = PipelineError::invalid_argument("bad widget id");
        let response = error_response(err);

        assert_eq!(response.status(), http::StatusCode::BAD_REQUEST);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"bad widget id");
    }

    #[tokio::test]
    async fn error_response_falls_back_to_internal_error_for_unprocessed() {
        let err = PipelineError::new(ErrorKind::Cancelled, "oops");
        let response = error_response(err);
        assert_eq!(response.status(), http::StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn to_hyper_response_copies_status_and_headers_from_the_pipeline_response() {
        let mut headers = HttpHeaders::response(http::StatusCode::CREATED);
        headers.append(http::HeaderName::from_static("x-widget-id"), http::HeaderValue::from_static("7"));
        let (_tx, body) = BodyStream::channel(4);
        let response = PipelineResponse::new(headers, body);

        let hyper_response = to_hyper_response(response).unwrap();
        assert_eq!(hyper_response.status(), http::StatusCode::CREATED);
        assert_eq!(hyper_response.headers().get("x-widget-id").unwrap(), "7");
    }
}
