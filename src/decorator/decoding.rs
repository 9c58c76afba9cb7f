//! Client-side content-encoding decoding decorator (spec §4.D.6).

use std::task::{Context, Poll};

use futures_util::StreamExt;
use http::header::CONTENT_ENCODING;
use tower_layer::Layer;
use tower_service::Service;

use crate::codec::ContentDecoder;
use crate::error::PipelineError;
use crate::pipeline::{BoxFuture, Request, Response};
use crate::stream::{BodyStream, HttpData, HttpObject, SubscriptionOptions};

/// Installs a [`ContentDecoder`] on a response body: every `Data` frame is
/// fed through the decoder and replaced with its decoded, unpooled output;
/// the input buffer is released as soon as the decoder has consumed it.
/// Headers/trailers pass through untouched other than stripping
/// `content-encoding` once the body is no longer encoded.
fn decode_body(mut body: BodyStream, strict: bool) -> BodyStream {
    let (tx, decoded) = BodyStream::channel(4);
    if body.subscribe(SubscriptionOptions { accepts_pooled_buffers: true }).is_err() {
        return decoded;
    }

    tokio::spawn(async move {
        let mut decoder: Option<ContentDecoder> = None;
        let mut decoder_resolved = false;

        while let Some(item) = body.next().await {
            match item {
                Ok(HttpObject::Headers(mut headers)) => {
                    if !decoder_resolved {
                        decoder_resolved = true;
                        let encoding = ContentDecoder::header_encoding(headers.fields());
                        match ContentDecoder::for_encoding(encoding.as_deref()) {
                            Ok(built) => {
                                if built.is_some() {
                                    headers.fields_mut().remove(CONTENT_ENCODING);
                                }
                                decoder = built;
                            }
                            Err(err) => {
                                if strict {
                                    tx.abort(PipelineError::from(err));
                                    return;
                                }
                                tracing::warn!(error = %err, "passing through body with unrecognized content-encoding");
                            }
                        }
                    }
                    if tx.send(HttpObject::Headers(headers)).await.is_err() {
                        return;
                    }
                }
                Ok(HttpObject::Data(data)) => {
                    let eos = data.end_of_stream();
                    let forwarded = match &mut decoder {
                        Some(decoder) => match decoder.push(data.bytes()) {
                            Ok(decoded_bytes) => {
                                data.release();
                                HttpData::unpooled(decoded_bytes, eos)
                            }
                            Err(err) => {
                                data.release();
                                tx.abort(PipelineError::from(err));
                                return;
                            }
                        },
                        None => data,
                    };
                    if tx.send(HttpObject::Data(forwarded)).await.is_err() {
                        return;
                    }
                }
                Ok(other @ HttpObject::Trailers(_)) => {
                    if tx.send(other).await.is_err() {
                        return;
                    }
                }
                Err(cause) => {
                    tx.abort(cause);
                    return;
                }
            }
        }
    });

    decoded
}

pub struct DecodingLayer {
    strict: bool,
}

impl DecodingLayer {
    /// `strict`: fail an unrecognized `content-encoding` instead of passing
    /// the body through unmodified.
    pub fn new(strict: bool) -> Self {
        DecodingLayer { strict }
    }
}

impl<S> Layer<S> for DecodingLayer {
    type Service = DecodingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        DecodingService { inner, strict: self.strict }
    }
}

#[derive(Clone)]
pub struct DecodingService<S> {
    inner: S,
    strict: bool,
}

impl<S> Service<Request> for DecodingService<S>
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
        let strict = self.strict;
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let mut response = inner.call(request).await?;
            response.body = decode_body(response.body, strict);
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RequestContext;
    use crate::stream::HttpHeaders;
    use flate2::write::DeflateEncoder;
    use flate2::Compression;
    use http::{HeaderValue, Method, StatusCode};
    use std::io::Write;

    fn deflate(bytes: &[u8]) -> Vec<u8> {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytes).unwrap();
        encoder.finish().unwrap()
    }

    #[derive(Clone)]
    struct DeflatedEcho;
    impl Service<Request> for DeflatedEcho {
        type Response = Response;
        type Error = PipelineError;
        type Future = BoxFuture<'static, Result<Response, PipelineError>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _request: Request) -> Self::Future {
            Box::pin(async move {
                let mut headers = HttpHeaders::response(StatusCode::OK);
                headers.insert(CONTENT_ENCODING, HeaderValue::from_static("deflate"));
                let (tx, body) = BodyStream::channel(4);
                tokio::spawn(async move {
                    tx.send(HttpObject::Headers(headers)).await.ok();
                    let compressed = deflate(b"hello reactive pipeline world");
                    tx.send(HttpObject::Data(HttpData::unpooled(compressed, true))).await.ok();
                });
                Ok(Response::new(HttpHeaders::response(StatusCode::OK), body))
            })
        }
    }

    fn request() -> Request {
        let ctx = std::sync::Arc::new(RequestContext::new());
        let (_tx, body) = BodyStream::channel(1);
        Request::new(ctx, HttpHeaders::request(Method::GET, "/"), body)
    }

    #[tokio::test]
    async fn deflated_response_is_transparently_decoded() {
        let mut svc = DecodingLayer::new(true).layer(DeflatedEcho);
        let response = svc.call(request()).await.unwrap();
        let mut body = response.body;
        body.subscribe(SubscriptionOptions { accepts_pooled_buffers: true }).unwrap();

        let mut collected = Vec::new();
        let mut saw_headers_without_content_encoding = false;
        while let Some(item) = body.next().await {
            match item.unwrap() {
                HttpObject::Headers(h) => {
                    saw_headers_without_content_encoding = h.get(CONTENT_ENCODING).is_none();
                }
                HttpObject::Data(data) => collected.extend_from_slice(data.bytes()),
                HttpObject::Trailers(_) => {}
            }
        }
        assert!(saw_headers_without_content_encoding);
        assert_eq!(collected, b"hello reactive pipeline world");
    }

    #[tokio::test]
    async fn strict_mode_rejects_unknown_encoding() {
        #[derive(Clone)]
        struct ZstdEcho;
        impl Service<Request> for ZstdEcho {
            type Response = Response;
            type Error = PipelineError;
            type Future = BoxFuture<'static, Result<Response, PipelineError>>;

            fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
                Poll::Ready(Ok(()))
            }

            fn call(&mut self, _request: Request) -> Self::Future {
                Box::pin(async move {
                    let mut headers = HttpHeaders::response(StatusCode::OK);
                    headers.insert(CONTENT_ENCODING, HeaderValue::from_static("zstd"));
                    let (tx, body) = BodyStream::channel(4);
                    tokio::spawn(async move {
                        tx.send(HttpObject::Headers(headers)).await.ok();
                    });
                    Ok(Response::new(HttpHeaders::response(StatusCode::OK), body))
                })
            }
        }

        let mut svc = DecodingLayer::new(true).layer(ZstdEcho);
        let response = svc.call(request()).await.unwrap();
        let mut body = response.body;
        body.subscribe(SubscriptionOptions { accepts_pooled_buffers: true }).unwrap();
        let first = body.next().await.unwrap();
        assert!(first.is_err());
    }
}
