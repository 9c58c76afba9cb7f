//! Endpoint group variants (spec §4.F).

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time;

use super::strategy::SelectionStrategy;
use super::Endpoint;
use crate::context::RequestContext;

/// An observable change to an endpoint group's membership, the same shape
/// `tower::discover::Change` uses for dynamic service discovery — kept as
/// a small local type here so the endpoint layer doesn't need the
/// `tower`/`channel` feature to compile.
#[derive(Debug, Clone)]
pub enum Change {
    Insert(Endpoint),
    Remove(Endpoint),
}

/// Common capability of every endpoint group variant (spec §4.F "Selection
/// protocol").
pub trait EndpointGroup: Send + Sync {
    /// Zero for groups that resolve immediately (e.g. [`StaticGroup`]).
    fn selection_timeout(&self) -> Duration;

    /// A snapshot of currently known endpoints.
    fn snapshot(&self) -> Vec<Endpoint>;

    /// Select an endpoint, following the three-step protocol from spec
    /// §4.F: immediate choice if non-empty, otherwise wait up to
    /// `min(selection_timeout, remaining_deadline)` for a non-empty
    /// snapshot, otherwise `None`. Context cancellation also yields `None`.
    fn select<'a>(
        &'a self,
        ctx: &'a RequestContext,
        strategy: &'a dyn SelectionStrategy,
    ) -> Pin<Box<dyn Future<Output = Option<Endpoint>> + Send + 'a>>;
}

async fn select_with_wait(
    ctx: &RequestContext,
    strategy: &dyn SelectionStrategy,
    selection_timeout: Duration,
    snapshot: impl Fn() -> Vec<Endpoint>,
    mut ready: watch::Receiver<()>,
) -> Option<Endpoint> {
    let current = snapshot();
    if !current.is_empty() {
        return strategy.choose(&current);
    }

    let wait = match ctx.remaining() {
        Some(remaining) if !selection_timeout.is_zero() => selection_timeout.min(remaining),
        Some(remaining) => remaining,
        None => selection_timeout,
    };

    let cancelled = ctx.cancellation_token();
    let deadline = if wait.is_zero() && selection_timeout.is_zero() {
        // selection_timeout_ms == 0 means "unlimited": wait only on cancel.
        None
    } else {
        Some(time::sleep(wait))
    };

    tokio::select! {
        _ = cancelled.cancelled() => None,
        _ = async { if let Some(d) = deadline { d.await } else { std::future::pending::<()>().await } } => None,
        changed = ready.changed() => {
            if changed.is_err() {
                return None;
            }
            let current = snapshot();
            if current.is_empty() { None } else { strategy.choose(&current) }
        }
    }
}

/// A fixed list. `select` is pure and immediate; selection timeout is
/// always zero.
#[derive(Debug, Clone)]
pub struct StaticGroup {
    endpoints: Vec<Endpoint>,
}

impl StaticGroup {
    pub fn new(endpoints: Vec<Endpoint>) -> Self {
        StaticGroup { endpoints }
    }
}

impl EndpointGroup for StaticGroup {
    fn selection_timeout(&self) -> Duration {
        Duration::ZERO
    }

    fn snapshot(&self) -> Vec<Endpoint> {
        self.endpoints.clone()
    }

    fn select<'a>(
        &'a self,
        _ctx: &'a RequestContext,
        strategy: &'a dyn SelectionStrategy,
    ) -> Pin<Box<dyn Future<Output = Option<Endpoint>> + Send + 'a>> {
        let choice = strategy.choose(&self.endpoints);
        Box::pin(async move { choice })
    }
}

struct DynamicInner {
    endpoints: Mutex<Vec<Endpoint>>,
    ready_tx: watch::Sender<()>,
}

/// A mutable list with a readiness signal that fires the first time the
/// list becomes non-empty, and on every subsequent membership change.
#[derive(Clone)]
pub struct DynamicGroup {
    inner: Arc<DynamicInner>,
    selection_timeout_ms: u64,
}

impl DynamicGroup {
    pub fn new(selection_timeout_ms: u64) -> Self {
        DynamicGroup {
            inner: Arc::new(DynamicInner {
                endpoints: Mutex::new(Vec::new()),
                ready_tx: watch::channel(()).0,
            }),
            selection_timeout_ms,
        }
    }

    pub fn apply(&self, change: Change) {
        {
            let mut endpoints = self.inner.endpoints.lock().unwrap();
            match change {
                Change::Insert(e) => {
                    if !endpoints.contains(&e) {
                        endpoints.push(e);
                    }
                }
                Change::Remove(e) => endpoints.retain(|existing| existing != &e),
            }
        }
        let _ = self.inner.ready_tx.send(());
    }
}

impl EndpointGroup for DynamicGroup {
    fn selection_timeout(&self) -> Duration {
        Duration::from_millis(self.selection_timeout_ms)
    }

    fn snapshot(&self) -> Vec<Endpoint> {
        self.inner.endpoints.lock().unwrap().clone()
    }

    fn select<'a>(
        &'a self,
        ctx: &'a RequestContext,
        strategy: &'a dyn SelectionStrategy,
    ) -> Pin<Box<dyn Future<Output = Option<Endpoint>> + Send + 'a>> {
        let ready = self.inner.ready_tx.subscribe();
        Box::pin(select_with_wait(
            ctx,
            strategy,
            self.selection_timeout(),
            || self.snapshot(),
            ready,
        ))
    }
}

/// Union of children; selection timeout is the **maximum** of children's.
pub struct CompositeGroup {
    children: Vec<Arc<dyn EndpointGroup>>,
}

impl CompositeGroup {
    pub fn new(children: Vec<Arc<dyn EndpointGroup>>) -> Self {
        CompositeGroup { children }
    }
}

impl EndpointGroup for CompositeGroup {
    fn selection_timeout(&self) -> Duration {
        self.children
            .iter()
            .map(|c| c.selection_timeout())
            .max()
            .unwrap_or(Duration::ZERO)
    }

    fn snapshot(&self) -> Vec<Endpoint> {
        self.children.iter().flat_map(|c| c.snapshot()).collect()
    }

    fn select<'a>(
        &'a self,
        ctx: &'a RequestContext,
        strategy: &'a dyn SelectionStrategy,
    ) -> Pin<Box<dyn Future<Output = Option<Endpoint>> + Send + 'a>> {
        Box::pin(async move {
            let current = self.snapshot();
            if !current.is_empty() {
                return strategy.choose(&current);
            }
            // None of the children are ready yet; race them and use whichever
            // resolves first, respecting the composite's own (max) timeout
            // via the context deadline that each child already observes.
            let futures: Vec<_> = self.children.iter().map(|c| c.select(ctx, strategy)).collect();
            let mut futures = futures;
            while !futures.is_empty() {
                let (result, _index, remaining) = futures_util::future::select_all(futures).await;
                if result.is_some() {
                    return result;
                }
                futures = remaining;
            }
            None
        })
    }
}

/// Primary + fallback; fallback is only consulted if the primary is empty
/// at selection time.
pub struct OrElseGroup {
    primary: Arc<dyn EndpointGroup>,
    fallback: Arc<dyn EndpointGroup>,
}

impl OrElseGroup {
    pub fn new(primary: Arc<dyn EndpointGroup>, fallback: Arc<dyn EndpointGroup>) -> Self {
        OrElseGroup { primary, fallback }
    }
}

impl EndpointGroup for OrElseGroup {
    fn selection_timeout(&self) -> Duration {
        self.primary.selection_timeout().max(self.fallback.selection_timeout())
    }

    fn snapshot(&self) -> Vec<Endpoint> {
        let primary = self.primary.snapshot();
        if primary.is_empty() {
            self.fallback.snapshot()
        } else {
            primary
        }
    }

    fn select<'a>(
        &'a self,
        ctx: &'a RequestContext,
        strategy: &'a dyn SelectionStrategy,
    ) -> Pin<Box<dyn Future<Output = Option<Endpoint>> + Send + 'a>> {
        Box::pin(async move {
            if !self.primary.snapshot().is_empty() {
                self.primary.select(ctx, strategy).await
            } else {
                self.fallback.select(ctx, strategy).await
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::strategy::RoundRobinStrategy;

    fn ep(host: &str) -> Endpoint {
        Endpoint::new(host, Some(80))
    }

    #[tokio::test]
    async fn static_group_selects_immediately() {
        let group = StaticGroup::new(vec![ep("a"), ep("b")]);
        let ctx = RequestContext::new();
        let strategy = RoundRobinStrategy::new();
        assert!(group.select(&ctx, &strategy).await.is_some());
        assert_eq!(group.selection_timeout(), Duration::ZERO);
    }

    #[tokio::test]
    async fn dynamic_group_waits_for_first_insert() {
        let group = DynamicGroup::new(1000);
        let group2 = group.clone();
        let ctx = RequestContext::new();
        let strategy = RoundRobinStrategy::new();

        let handle = tokio::spawn(async move { group2.select(&ctx, &strategy).await });
        tokio::task::yield_now().await;
        group.apply(Change::Insert(ep("a")));
        let selected = handle.await.unwrap();
        assert_eq!(selected, Some(ep("a")));
    }

    #[tokio::test]
    async fn dynamic_group_times_out_to_none() {
        let group = DynamicGroup::new(10);
        let ctx = RequestContext::new();
        let strategy = RoundRobinStrategy::new();
        assert_eq!(group.select(&ctx, &strategy).await, None);
    }

    #[tokio::test]
    async fn or_else_uses_fallback_only_when_primary_empty() {
        let primary = Arc::new(StaticGroup::new(vec![]));
        let fallback = Arc::new(StaticGroup::new(vec![ep("fallback")]));
        let group = OrElseGroup::new(primary, fallback);
        let ctx = RequestContext::new();
        let strategy = RoundRobinStrategy::new();
        assert_eq!(group.select(&ctx, &strategy).await, Some(ep("fallback")));
    }

    #[tokio::test]
    async fn composite_timeout_is_max_of_children() {
        let a = Arc::new(DynamicGroup::new(10));
        let b = Arc::new(DynamicGroup::new(500));
        let group = CompositeGroup::new(vec![a, b]);
        assert_eq!(group.selection_timeout(), Duration::from_millis(500));
    }
}
