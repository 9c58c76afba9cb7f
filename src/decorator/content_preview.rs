//! Content preview decorator (spec §4.D.4).

use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::StreamExt;
use tower_layer::Layer;
use tower_service::Service;

use crate::error::PipelineError;
use crate::log::{LogBuilder, LogProperty, LogValue};
use crate::pipeline::{BoxFuture, Request, Response};
use crate::stream::{BodyStream, HttpObject, SubscriptionOptions};

/// Masks sensitive values out of a captured preview before it's logged.
pub trait PreviewSanitizer: Send + Sync {
    fn sanitize(&self, preview: String) -> String;
}

pub struct NoopSanitizer;
impl PreviewSanitizer for NoopSanitizer {
    fn sanitize(&self, preview: String) -> String {
        preview
    }
}

/// Whether a media type is eligible for a text preview (spec §4.D.4):
/// `text/*`, `application/x-www-form-urlencoded`, any charset-bearing
/// media, or `*+xml`/`*+json` structured suffixes.
pub fn is_previewable(content_type: &str) -> bool {
    let media = content_type.split(';').next().unwrap_or("").trim();
    media.starts_with("text/")
        || media == "application/x-www-form-urlencoded"
        || media.ends_with("+xml")
        || media.ends_with("+json")
        || media == "application/json"
        || content_type.contains("charset=")
}

/// Accumulate up to `max_length` bytes of `chunk` (previews are
/// diagnostic, not round-trippable, so overflow is silently truncated).
pub fn accumulate(existing: &mut Vec<u8>, chunk: &[u8], max_length: usize) {
    let remaining = max_length.saturating_sub(existing.len());
    let take = remaining.min(chunk.len());
    existing.extend_from_slice(&chunk[..take]);
}

/// Install a side-tap on `body`: forward every item to a fresh stream the
/// caller hands to the rest of the pipeline, while accumulating up to
/// `max_length` bytes for the log. Must not delay the user stream or
/// change buffer ownership, so each item is retained/forwarded as-is and
/// only copied bytes go into the preview accumulator.
fn tap(mut body: BodyStream, max_length: usize, log: LogBuilder, property: LogProperty, sanitizer: Arc<dyn PreviewSanitizer>) -> BodyStream {
    let (tx, tapped) = BodyStream::channel(4);
    let subscription = body.subscribe(SubscriptionOptions { accepts_pooled_buffers: true });
    if subscription.is_err() {
        // Source already subscribed elsewhere; nothing to tap.
        log.set(property, LogValue::Unavailable);
        return tapped;
    }

    tokio::spawn(async move {
        let mut preview = Vec::with_capacity(max_length.min(4096));
        while let Some(item) = body.next().await {
            match item {
                Ok(object) => {
                    if let HttpObject::Data(data) = &object {
                        accumulate(&mut preview, data.bytes(), max_length);
                    }
                    if tx.send(object).await.is_err() {
                        break;
                    }
                }
                Err(cause) => {
                    tx.abort(cause);
                    break;
                }
            }
        }
        let text = String::from_utf8_lossy(&preview).into_owned();
        log.set(property, LogValue::Text(sanitizer.sanitize(text)));
    });

    tapped
}

#[derive(Clone)]
pub struct ContentPreviewLayer {
    max_length: usize,
    sanitizer: Arc<dyn PreviewSanitizer>,
}

impl ContentPreviewLayer {
    pub fn new(max_length: usize) -> Self {
        ContentPreviewLayer { max_length, sanitizer: Arc::new(NoopSanitizer) }
    }

    pub fn with_sanitizer(mut self, sanitizer: Arc<dyn PreviewSanitizer>) -> Self {
        self.sanitizer = sanitizer;
        self
    }
}

impl<S> Layer<S> for ContentPreviewLayer {
    type Service = ContentPreviewService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ContentPreviewService { inner, max_length: self.max_length, sanitizer: self.sanitizer.clone() }
    }
}

#[derive(Clone)]
pub struct ContentPreviewService<S> {
    inner: S,
    max_length: usize,
    sanitizer: Arc<dyn PreviewSanitizer>,
}

fn content_type_of(headers: &crate::stream::HttpHeaders) -> String {
    headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string()
}

impl<S> Service<Request> for ContentPreviewService<S>
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
        let max_length = self.max_length;
        let sanitizer = self.sanitizer.clone();
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let log = request.context.log_builder().clone();
            let content_type = content_type_of(&request.headers);

            if is_previewable(&content_type) {
                let body = std::mem::replace(&mut request.body, BodyStream::channel(1).1);
                request.body = tap(body, max_length, log.clone(), LogProperty::RequestContentPreview, sanitizer.clone());
            } else {
                log.set(LogProperty::RequestContentPreview, LogValue::Unavailable);
            }

            let mut response = inner.call(request).await?;

            let resp_content_type = content_type_of(&response.headers);
            if is_previewable(&resp_content_type) {
                let body = std::mem::replace(&mut response.body, BodyStream::channel(1).1);
                response.body = tap(body, max_length, log, LogProperty::ResponseContentPreview, sanitizer);
            } else {
                log.set(LogProperty::ResponseContentPreview, LogValue::Unavailable);
            }

            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_previewable() {
        assert!(is_previewable("text/plain"));
        assert!(is_previewable("text/plain; charset=utf-8"));
    }

    #[test]
    fn structured_suffixes_are_previewable() {
        assert!(is_previewable("application/hal+json"));
        assert!(is_previewable("application/atom+xml"));
    }

    #[test]
    fn opaque_binary_is_not_previewable() {
        assert!(!is_previewable("application/octet-stream"));
        assert!(!is_previewable("image/png"));
    }

    #[test]
    fn accumulate_stops_at_max_length() {
        let mut buf = Vec::new();
        accumulate(&mut buf, b"hello", 3);
        assert_eq!(buf, b"hel");
        accumulate(&mut buf, b"lo", 3);
        assert_eq!(buf, b"hel");
    }

    #[tokio::test]
    async fn tap_forwards_items_and_records_a_preview() {
        use crate::stream::HttpData;

        let (tx, body) = BodyStream::channel(4);
        tx.send(HttpObject::Data(HttpData::unpooled(&b"hello"[..], true))).await.unwrap();
        drop(tx);

        let log = LogBuilder::new();
        let mut tapped = tap(body, 1024, log.clone(), LogProperty::RequestContentPreview, Arc::new(NoopSanitizer));
        let forwarded = tapped.next().await.unwrap().unwrap();
        assert_eq!(forwarded.as_data().unwrap().bytes().as_ref(), b"hello");
        assert!(tapped.next().await.is_none());

        tokio::task::yield_now().await;
        match log.get(LogProperty::RequestContentPreview) {
            Some(LogValue::Text(s)) => assert_eq!(s, "hello"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
