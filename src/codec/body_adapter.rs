//! Converts between [`BodyStream`] and `http_body::Body`, the seam where the
//! reactive body substrate (spec §4.A) meets the wire transport (spec §4.E).

use bytes::Bytes;
use futures_util::StreamExt;
use http_body::Frame;
use http_body_util::{BodyExt, StreamBody};

use crate::error::{ErrorKind, PipelineError};
use crate::stream::{AlreadySubscribed, BodySender, BodyStream, HttpData, HttpHeaders, HttpObject, SubscriptionOptions};

/// A type-erased `http_body::Body` over our error type, the currency both
/// [`crate::codec::client`] and [`crate::codec::server`] hand to `hyper`.
pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, PipelineError>;

/// Adapt a body-only [`BodyStream`] (`Data* Trailers? EOS`, spec §3) into a
/// `hyper`-compatible body, subscribing it in the process.
pub fn into_hyper_body(mut body: BodyStream) -> Result<BoxBody, AlreadySubscribed> {
    body.subscribe(SubscriptionOptions { accepts_pooled_buffers: false })?;
    let frames = body.map(|item| {
        item.and_then(|object| match object {
            HttpObject::Data(data) => Ok(Frame::data(data.bytes().clone())),
            HttpObject::Trailers(trailers) => Ok(Frame::trailers(trailers.fields().clone())),
            HttpObject::Headers(_) => {
                Err(PipelineError::protocol("unexpected headers object on a body-only stream"))
            }
        })
    });
    Ok(BodyExt::boxed(StreamBody::new(frames)))
}

/// Drain an incoming `http_body::Body` into `sender`, converting each frame
/// into the [`HttpObject`]s a [`BodyStream`] subscriber expects. Returns once
/// the body is exhausted or the channel's subscriber has gone away.
pub async fn drain_body_into<B>(mut body: B, sender: &BodySender) -> Result<(), PipelineError>
where
    B: http_body::Body<Data = Bytes> + Unpin,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    loop {
        let frame = match BodyExt::frame(&mut body).await {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                let err = PipelineError::with_source(ErrorKind::PeerError, e.to_string(), e);
                sender.abort(err.clone());
                return Err(err);
            }
            None => return Ok(()),
        };

        match frame.into_data() {
            Ok(data) => {
                let eos = body.is_end_stream();
                if sender.send(HttpObject::Data(HttpData::unpooled(data, eos))).await.is_err() {
                    return Ok(());
                }
                if eos {
                    return Ok(());
                }
            }
            Err(frame) => {
                if let Ok(trailer_map) = frame.into_trailers() {
                    let mut trailers = HttpHeaders::trailers();
                    for (name, value) in trailer_map.iter() {
                        trailers.insert(name.clone(), value.clone());
                    }
                    let _ = sender.send(HttpObject::Trailers(trailers)).await;
                    return Ok(());
                }
            }
        }
    }
}
