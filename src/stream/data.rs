//! `HttpData`: a reference-counted byte buffer with `end_of_stream` (spec §3).

use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Shared refcount plus release callback backing a pooled [`HttpData`].
///
/// `retain`/`release` model the explicit ownership-transfer protocol from
/// spec §5: "Transfer of ownership is by explicit `retain`/`release` at
/// component boundaries." The callback fires exactly once, when the count
/// reaches zero.
struct PoolHandle {
    refcount: AtomicUsize,
    on_release: Box<dyn Fn() + Send + Sync>,
}

impl PoolHandle {
    fn new(on_release: impl Fn() + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(PoolHandle {
            refcount: AtomicUsize::new(1),
            on_release: Box::new(on_release),
        })
    }

    fn retain(self: &Arc<Self>) {
        self.refcount.fetch_add(1, Ordering::AcqRel);
    }

    fn release(self: &Arc<Self>) {
        if self.refcount.fetch_sub(1, Ordering::AcqRel) == 1 {
            (self.on_release)();
        }
    }

    fn refcount(&self) -> usize {
        self.refcount.load(Ordering::Acquire)
    }
}

/// A byte buffer flowing through the pipeline, tagged with whether it came
/// from a pool (and so must be explicitly released) and whether it is the
/// final chunk of its stream.
///
/// Invariant (spec §3): a pooled buffer must be released exactly once by
/// its final consumer; empty buffers are always unpooled.
pub struct HttpData {
    bytes: Bytes,
    pool: Option<Arc<PoolHandle>>,
    end_of_stream: bool,
}

impl fmt::Debug for HttpData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpData")
            .field("len", &self.bytes.len())
            .field("pooled", &self.pool.is_some())
            .field("end_of_stream", &self.end_of_stream)
            .finish()
    }
}

impl HttpData {
    /// An unpooled buffer — a plain owned copy, nothing to release.
    pub fn unpooled(bytes: impl Into<Bytes>, end_of_stream: bool) -> Self {
        HttpData {
            bytes: bytes.into(),
            pool: None,
            end_of_stream,
        }
    }

    /// A pooled buffer with an explicit release callback. Per spec §3,
    /// empty buffers are always unpooled regardless of the caller's intent.
    pub fn pooled(
        bytes: impl Into<Bytes>,
        end_of_stream: bool,
        on_release: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return HttpData::unpooled(bytes, end_of_stream);
        }
        HttpData {
            bytes,
            pool: Some(PoolHandle::new(on_release)),
            end_of_stream,
        }
    }

    pub fn empty(end_of_stream: bool) -> Self {
        HttpData::unpooled(Bytes::new(), end_of_stream)
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn end_of_stream(&self) -> bool {
        self.end_of_stream
    }

    pub fn is_pooled(&self) -> bool {
        self.pool.is_some()
    }

    /// Current refcount; `1` for an unpooled buffer (it has nothing to
    /// release, so this is purely informational/test-facing).
    pub fn refcount(&self) -> usize {
        self.pool.as_ref().map(|p| p.refcount()).unwrap_or(1)
    }

    /// Hand a second owner a reference to the same pooled buffer, bumping
    /// the refcount. Both the original and the returned `HttpData` must be
    /// released independently.
    pub fn retain(&self) -> Self {
        if let Some(pool) = &self.pool {
            pool.retain();
        }
        HttpData {
            bytes: self.bytes.clone(),
            pool: self.pool.clone(),
            end_of_stream: self.end_of_stream,
        }
    }

    /// Release this consumer's hold on a pooled buffer. A no-op for
    /// unpooled buffers.
    pub fn release(self) {
        if let Some(pool) = &self.pool {
            pool.release();
        }
    }

    /// Build a copy as an unpooled buffer, as required when handing a
    /// pooled buffer to a subscriber that declined pooled buffers (spec
    /// §4.A "Pool option").
    pub fn to_unpooled_copy(&self) -> Self {
        HttpData::unpooled(self.bytes.clone(), self.end_of_stream)
    }
}
