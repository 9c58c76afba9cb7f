//! Establishes and dispatches over pooled HTTP/1.1 and H2C connections,
//! negotiating protocol per spec §4.E and pooling per [`super::pool`].
//!
//! H2C has no ALPN the way TLS does, and `hyper`'s client `conn` API has no
//! first-class support for the `Upgrade: h2c` dance from RFC 7540 §3.2.
//! Instead this mirrors what most non-browser H2C clients (including
//! gRPC's own default) actually do: attempt an H2C connection by prior
//! knowledge, and if the remote doesn't speak it, fall back to HTTP/1.1 and
//! remember that for next time. The fallback only ever applies to a
//! connect/handshake failure, which by construction happens before the
//! request body has been touched — once a request has started streaming
//! over a connection, a failure there is reported as-is, never silently
//! retried on a second protocol.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http::{Request as HttpRequest, Uri};
use hyper::client::conn::{http1, http2};
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use super::body_adapter::{drain_body_into, into_hyper_body, BoxBody};
use super::negotiate::{NegotiationCache, ProtocolPreference};
use super::pool::{ConnectionKey, ConnectionPool, Protocol};
use crate::error::{ErrorKind, PipelineError};
use crate::pipeline::{BoxFuture, Request as PipelineRequest, Response as PipelineResponse};
use crate::stream::{BodyStream, HttpHeaders};

/// A live, reusable send handle for one pooled connection.
enum PooledConnection {
    Http1(http1::SendRequest<BoxBody>),
    H2(http2::SendRequest<BoxBody>),
}

/// The client-side leaf [`crate::pipeline::PipelineService`]: takes a
/// request whose endpoint has already been chosen upstream (spec §4.F),
/// acquires or establishes a pooled connection, negotiates protocol, and
/// dispatches.
#[derive(Clone)]
pub struct HttpClient {
    pool: Arc<ConnectionPool<PooledConnection>>,
    negotiation: Arc<NegotiationCache>,
    preference: ProtocolPreference,
    connect_timeout: Duration,
}

impl HttpClient {
    pub fn new(preference: ProtocolPreference, connect_timeout: Duration) -> Self {
        HttpClient {
            pool: Arc::new(ConnectionPool::new()),
            negotiation: Arc::new(NegotiationCache::new()),
            preference,
            connect_timeout,
        }
    }
}

impl tower_service::Service<PipelineRequest> for HttpClient {
    type Response = PipelineResponse;
    type Error = PipelineError;
    type Future = BoxFuture<'static, Result<PipelineResponse, PipelineError>>;

    fn poll_ready(&mut self, _cx: &mut std::task::Context<'_>) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: PipelineRequest) -> Self::Future {
        let pool = self.pool.clone();
        let negotiation = self.negotiation.clone();
        let preference = self.preference;
        let connect_timeout = self.connect_timeout;
        Box::pin(async move { dispatch(pool, negotiation, preference, connect_timeout, request).await })
    }
}

async fn dispatch(
    pool: Arc<ConnectionPool<PooledConnection>>,
    negotiation: Arc<NegotiationCache>,
    preference: ProtocolPreference,
    connect_timeout: Duration,
    request: PipelineRequest,
) -> Result<PipelineResponse, PipelineError> {
    let endpoint = request
        .context
        .endpoint()
        .cloned()
        .ok_or_else(|| PipelineError::invalid_argument("no endpoint selected for this request"))?;
    let port = endpoint.port().unwrap_or(80);
    let authority = format!("{}:{port}", endpoint.host());
    let remote = resolve_remote(&authority).await?;

    let wanted = match preference {
        ProtocolPreference::Http1Only => Protocol::Http1,
        ProtocolPreference::H2cPriorKnowledge => Protocol::H2c,
        ProtocolPreference::H2cUpgrade => {
            if negotiation.is_h2c_unsupported(&authority) {
                Protocol::Http1
            } else {
                Protocol::H2c
            }
        }
    };

    let (protocol, connection) = match acquire_or_establish(&pool, wanted, remote, &authority, connect_timeout).await {
        Ok(connection) => (wanted, connection),
        Err(err) if wanted == Protocol::H2c && preference == ProtocolPreference::H2cUpgrade => {
            debug!(%authority, error = %err, "H2C connect failed, falling back to HTTP/1.1");
            negotiation.mark_h2c_unsupported(&authority);
            let connection = acquire_or_establish(&pool, Protocol::Http1, remote, &authority, connect_timeout).await?;
            (Protocol::Http1, connection)
        }
        Err(err) if wanted == Protocol::H2c && preference == ProtocolPreference::H2cPriorKnowledge => {
            return Err(PipelineError::with_source(
                ErrorKind::ProtocolNegotiation,
                "expected H2C, actual HTTP/1.1",
                err,
            ));
        }
        Err(err) => return Err(err),
    };

    let key = ConnectionKey { protocol, authority: authority.clone(), tls_context: None };
    send_and_reinsert(&pool, key, connection, request, &authority).await
}

async fn resolve_remote(authority: &str) -> Result<SocketAddr, PipelineError> {
    tokio::net::lookup_host(authority)
        .await
        .map_err(PipelineError::from)?
        .next()
        .ok_or_else(|| PipelineError::invalid_argument(format!("{authority} resolved to no addresses")))
}

async fn acquire_or_establish(
    pool: &ConnectionPool<PooledConnection>,
    protocol: Protocol,
    remote: SocketAddr,
    authority: &str,
    connect_timeout: Duration,
) -> Result<PooledConnection, PipelineError> {
    let key = ConnectionKey { protocol, authority: authority.to_string(), tls_context: None };
    if let Some(connection) = pool.acquire(&key) {
        return Ok(connection);
    }
    tokio::time::timeout(connect_timeout, establish(protocol, remote))
        .await
        .map_err(|_| PipelineError::unprocessed("connect timed out"))?
}

async fn establish(protocol: Protocol, remote: SocketAddr) -> Result<PooledConnection, PipelineError> {
    let stream = TcpStream::connect(remote).await.map_err(PipelineError::from)?;
    let io = TokioIo::new(stream);
    match protocol {
        Protocol::Http1 => {
            let (send_request, connection) = http1::Builder::new().handshake(io).await.map_err(PipelineError::from)?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    warn!(error = %e, "HTTP/1.1 connection task ended");
                }
            });
            Ok(PooledConnection::Http1(send_request))
        }
        Protocol::H2c | Protocol::Http2Tls => {
            let (send_request, connection) =
                http2::Builder::new(TokioExecutor::new()).handshake(io).await.map_err(PipelineError::from)?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    warn!(error = %e, "H2C connection task ended");
                }
            });
            Ok(PooledConnection::H2(send_request))
        }
    }
}

async fn send_and_reinsert(
    pool: &ConnectionPool<PooledConnection>,
    key: ConnectionKey,
    connection: PooledConnection,
    request: PipelineRequest,
    authority: &str,
) -> Result<PipelineResponse, PipelineError> {
    let hyper_request = build_hyper_request(request, authority)?;

    let (response, reusable) = match connection {
        PooledConnection::Http1(mut send_request) => {
            let response = send_request.send_request(hyper_request).await.map_err(PipelineError::from)?;
            let close = response
                .headers()
                .get(http::header::CONNECTION)
                .map(|v| v.as_bytes().eq_ignore_ascii_case(b"close"))
                .unwrap_or(false);
            (response, (!close).then_some(PooledConnection::Http1(send_request)))
        }
        PooledConnection::H2(mut send_request) => {
            let response = send_request.send_request(hyper_request).await.map_err(PipelineError::from)?;
            (response, Some(PooledConnection::H2(send_request)))
        }
    };

    match reusable {
        Some(connection) => pool.insert(key, connection),
        None => pool.pin_close(&key),
    }

    to_pipeline_response(response)
}

fn build_hyper_request(request: PipelineRequest, authority: &str) -> Result<HttpRequest<BoxBody>, PipelineError> {
    let headers = &request.headers;
    let method = headers.pseudo().method.clone().unwrap_or(http::Method::GET);
    let path = headers.pseudo().path.clone().unwrap_or_else(|| "/".to_string());
    let uri: Uri = format!("http://{authority}{path}")
        .parse()
        .map_err(|e: http::uri::InvalidUri| PipelineError::invalid_argument(e.to_string()))?;

    let mut builder = HttpRequest::builder().method(method).uri(uri);
    for (name, value) in headers.fields().iter() {
        builder = builder.header(name, value);
    }
    if !headers.contains(http::header::HOST) {
        builder = builder.header(http::header::HOST, authority);
    }

    let body = into_hyper_body(request.body).map_err(|_| PipelineError::protocol("request body already subscribed"))?;
    builder.body(body).map_err(|e| PipelineError::protocol(e.to_string()))
}

fn to_pipeline_response(response: http::Response<hyper::body::Incoming>) -> Result<PipelineResponse, PipelineError> {
    let (parts, incoming) = response.into_parts();
    let mut headers = HttpHeaders::response(parts.status);
    for (name, value) in parts.headers.iter() {
        headers.append(name.clone(), value.clone());
    }

    let (sender, body) = BodyStream::channel(32);
    tokio::spawn(async move {
        let _ = drain_body_into(incoming, &sender).await;
    });

    Ok(PipelineResponse::new(headers, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::HttpHeaders as Headers;

    fn request_with(headers: Headers) -> PipelineRequest {
        let (_tx, body) = BodyStream::channel(4);
        PipelineRequest::new(Arc::new(crate::context::RequestContext::new()), headers, body)
    }

    #[test]
    fn build_hyper_request_uses_method_path_and_injects_host() {
        let headers = Headers::request(http::Method::POST, "/widgets/1".to_string());
        let request = request_with(headers);
        let built = build_hyper_request(request, "widgets.internal:9000").unwrap();

        assert_eq!(built.method(), http::Method::POST);
        assert_eq!(built.uri().path(), "/widgets/1");
        assert_eq!(built.headers().get(http::header::HOST).unwrap(), "widgets.internal:9000");
    }

    #[test]
    fn build_hyper_request_does_not_override_an_explicit_host_header() {
        let mut headers = Headers::request(http::Method::GET, "/".to_string());
        headers.append(http::header::HOST, http::HeaderValue::from_static("explicit.example"));
        let request = request_with(headers);
        let built = build_hyper_request(request, "widgets.internal:9000").unwrap();

        assert_eq!(built.headers().get(http::header::HOST).unwrap(), "explicit.example");
    }

    #[test]
    fn build_hyper_request_defaults_to_get_and_root_path() {
        let headers = Headers::request(http::Method::GET, String::new());
        let request = request_with(headers);
        let built = build_hyper_request(request, "widgets.internal:9000").unwrap();

        assert_eq!(built.method(), http::Method::GET);
        assert_eq!(built.uri().path(), "/");
    }
}
