//! `RequestContext`: the per-attempt handle threaded through a decorator
//! chain (spec §4.B).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::endpoint::Endpoint;
use crate::log::LogBuilder;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

/// Owns everything scoped to one request attempt: id, deadline, the bound
/// event loop, a typed attribute map, a [`LogBuilder`], a cancellation
/// token, and the `Endpoint` once selected.
///
/// Per spec §4.B, mutation of attributes and the log builder is restricted
/// to the owning event loop; cross-task signals (cancellation) go through
/// `Arc`/atomics, matching how `tower`/`hyper` split `!Send` single-writer
/// state from `Send` handles.
#[derive(Debug)]
pub struct RequestContext {
    request_id: u64,
    event_loop: Handle,
    deadline: Option<Instant>,
    cancel: CancellationToken,
    attributes: http::Extensions,
    log_builder: LogBuilder,
    endpoint: Option<Endpoint>,
    parent: Option<Arc<RequestContext>>,
}

impl RequestContext {
    /// Create a root context bound to the calling task's runtime.
    pub fn new() -> Self {
        RequestContext {
            request_id: next_request_id(),
            event_loop: Handle::current(),
            deadline: None,
            cancel: CancellationToken::new(),
            attributes: http::Extensions::new(),
            log_builder: LogBuilder::new(),
            endpoint: None,
            parent: None,
        }
    }

    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    pub fn event_loop(&self) -> &Handle {
        &self.event_loop
    }

    /// Set the deadline to `duration` from now. Per spec §4.B, deadlines may
    /// only be tightened within a single attempt.
    pub fn deadline_in(&mut self, duration: Duration) {
        let candidate = Instant::now() + duration;
        self.set_deadline(candidate);
    }

    /// Set an absolute deadline, clamped so it never loosens the current
    /// one within this attempt.
    pub fn set_deadline(&mut self, instant: Instant) {
        self.deadline = Some(match self.deadline {
            Some(current) if current < instant => current,
            _ => instant,
        });
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Cancel this context and any descendants. Propagated to subscribed
    /// streams and pending endpoint selection via the shared token.
    pub fn cancel(&self, cause: &str) {
        self.log_builder.record_cancel(cause);
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn attr<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.attributes.get::<T>()
    }

    pub fn set_attr<T: Send + Sync + 'static>(&mut self, value: T) {
        self.attributes.insert(value);
    }

    pub fn log_builder(&self) -> &LogBuilder {
        &self.log_builder
    }

    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    pub fn set_endpoint(&mut self, endpoint: Endpoint) {
        self.endpoint = Some(endpoint);
    }

    /// Build a child context for a retry sub-attempt: a fresh cancellation
    /// token (still linked to the parent's, below), the same event loop,
    /// and the given endpoint. The parent deadline remains the upper bound
    /// — `deadline_in`/`set_deadline` on the child can only tighten it.
    pub fn child(self: &Arc<Self>, endpoint: Endpoint) -> RequestContext {
        RequestContext {
            request_id: next_request_id(),
            event_loop: self.event_loop.clone(),
            deadline: self.deadline,
            cancel: self.cancel.child_token(),
            attributes: http::Extensions::new(),
            log_builder: self.log_builder.child(),
            endpoint: Some(endpoint),
            parent: Some(self.clone()),
        }
    }

    pub fn parent(&self) -> Option<&Arc<RequestContext>> {
        self.parent.as_ref()
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}
