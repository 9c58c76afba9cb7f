//! `RequestLog`: an append-only, per-property record of a request's
//! lifecycle (spec §4.I).

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

/// Indexes into a [`RequestLog`]. Mirrors the phases a request/response
/// exchange passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogProperty {
    RequestStart,
    RequestHeaders,
    RequestContentPreview,
    RequestEnd,
    ResponseHeaders,
    ResponseContentPreview,
    ResponseEnd,
}

/// A property value, or the explicit "this deferred property was never
/// filled in" marker used when the response terminates before a content
/// preview tap completed (spec §4.I).
#[derive(Debug, Clone)]
pub enum LogValue {
    Text(String),
    Bytes(Vec<u8>),
    Unavailable,
}

impl fmt::Display for LogValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogValue::Text(s) => f.write_str(s),
            LogValue::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            LogValue::Unavailable => f.write_str("<unavailable>"),
        }
    }
}

struct Slot {
    tx: watch::Sender<Option<LogValue>>,
}

impl Slot {
    fn new() -> Self {
        Slot {
            tx: watch::channel(None).0,
        }
    }
}

struct Inner {
    slots: Mutex<HashMap<LogProperty, Slot>>,
    complete: watch::Sender<bool>,
    children: Mutex<Vec<Arc<Inner>>>,
}

/// Builds up a [`RequestLog`] as the pipeline runs. Cheap to clone (an
/// `Arc` around the shared slot table) so it can be handed to decorators
/// that run after the context that owns it has moved on.
#[derive(Clone)]
pub struct LogBuilder {
    inner: Arc<Inner>,
}

impl fmt::Debug for LogBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogBuilder").finish_non_exhaustive()
    }
}

impl LogBuilder {
    pub fn new() -> Self {
        LogBuilder {
            inner: Arc::new(Inner {
                slots: Mutex::new(HashMap::new()),
                complete: watch::channel(false).0,
                children: Mutex::new(Vec::new()),
            }),
        }
    }

    /// A child log for a retry sub-attempt. The parent only completes once
    /// every child does (spec §4.D.3).
    pub fn child(&self) -> Self {
        let child = LogBuilder::new();
        self.inner.children.lock().unwrap().push(child.inner.clone());
        child
    }

    /// Set a property exactly once. Setting an already-set property is a
    /// logic error in the pipeline and is ignored here rather than
    /// panicking a connection task.
    pub fn set(&self, property: LogProperty, value: LogValue) {
        let mut slots = self.inner.slots.lock().unwrap();
        let slot = slots.entry(property).or_insert_with(Slot::new);
        if slot.tx.borrow().is_none() {
            let _ = slot.tx.send(Some(value));
        }
    }

    pub fn get(&self, property: LogProperty) -> Option<LogValue> {
        self.inner
            .slots
            .lock()
            .unwrap()
            .get(&property)
            .and_then(|slot| slot.tx.borrow().clone())
    }

    /// Resolves once `property` becomes available.
    pub async fn when_available(&self, property: LogProperty) -> LogValue {
        let mut rx = {
            let mut slots = self.inner.slots.lock().unwrap();
            slots.entry(property).or_insert_with(Slot::new).tx.subscribe()
        };
        loop {
            if let Some(value) = rx.borrow().clone() {
                return value;
            }
            if rx.changed().await.is_err() {
                return LogValue::Unavailable;
            }
        }
    }

    /// Mark the response-terminal signal: any deferred property still
    /// unset (e.g. a content preview tap that never ran) is completed with
    /// [`LogValue::Unavailable`] so `when_complete` can never hang on a
    /// forgotten deferred slot (spec §4.I).
    pub fn complete(&self, deferred: &[LogProperty]) {
        for property in deferred {
            self.set(*property, LogValue::Unavailable);
        }
        let _ = self.inner.complete.send(true);
    }

    pub fn record_cancel(&self, cause: &str) {
        self.set(LogProperty::ResponseEnd, LogValue::Text(format!("cancelled: {cause}")));
    }

    /// Resolves once this log and every child log (retry sub-attempts) has
    /// completed.
    pub async fn when_complete(&self) {
        let mut rx = self.inner.complete.subscribe();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
        let children: Vec<_> = self.inner.children.lock().unwrap().clone();
        for child in children {
            let builder = LogBuilder { inner: child };
            Box::pin(builder.when_complete()).await;
        }
    }

    pub fn is_complete(&self) -> bool {
        *self.inner.complete.borrow()
    }
}

impl Default for LogBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let log = LogBuilder::new();
        log.set(LogProperty::RequestHeaders, LogValue::Text("GET /".into()));
        match log.get(LogProperty::RequestHeaders) {
            Some(LogValue::Text(s)) => assert_eq!(s, "GET /"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn when_available_resolves_after_set() {
        let log = LogBuilder::new();
        let log2 = log.clone();
        let handle = tokio::spawn(async move { log2.when_available(LogProperty::ResponseEnd).await });
        tokio::task::yield_now().await;
        log.set(LogProperty::ResponseEnd, LogValue::Text("200".into()));
        let value = handle.await.unwrap();
        matches!(value, LogValue::Text(s) if s == "200");
    }

    #[tokio::test]
    async fn complete_fills_unset_deferred_properties_with_unavailable() {
        let log = LogBuilder::new();
        log.complete(&[LogProperty::RequestContentPreview, LogProperty::ResponseContentPreview]);
        assert!(matches!(
            log.get(LogProperty::RequestContentPreview),
            Some(LogValue::Unavailable)
        ));
        assert!(log.is_complete());
    }

    #[tokio::test]
    async fn parent_completes_only_after_child_completes() {
        let parent = LogBuilder::new();
        let child = parent.child();
        let parent2 = parent.clone();
        let handle = tokio::spawn(async move {
            parent2.when_complete().await;
        });
        parent.complete(&[]);
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(!handle.is_finished());
        child.complete(&[]);
        handle.await.unwrap();
    }
}
