//! Health-checked endpoint group (spec §4.F).

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::group::EndpointGroup;
use super::strategy::SelectionStrategy;
use super::Endpoint;
use crate::context::RequestContext;

/// Probes one endpoint and reports whether it is currently healthy.
/// Default probe semantics (spec §4.F): "HTTP GET of a health path,
/// 2xx is healthy" — modeled here as a trait so the actual HTTP call is an
/// external collaborator supplied by the caller.
#[async_trait::async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check(&self, endpoint: &Endpoint) -> bool;
}

struct Health {
    endpoint: Endpoint,
    healthy: AtomicBool,
}

/// Wraps a delegate group, polling each of its member endpoints with a
/// [`HealthProbe`] and exposing only the currently-healthy subset.
pub struct HealthCheckedGroup {
    delegate: Arc<dyn EndpointGroup>,
    probe: Arc<dyn HealthProbe>,
    probed: Mutex<Vec<Arc<Health>>>,
    ready_tx: watch::Sender<()>,
    initial_timeout: Duration,
    steady_timeout: Duration,
    became_ready: AtomicBool,
    interval: Duration,
    _tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl HealthCheckedGroup {
    /// `response_timeout` is added to the delegate's own selection timeout
    /// to get the default single-value timeout, per spec §4.F.
    pub fn new(
        delegate: Arc<dyn EndpointGroup>,
        probe: Arc<dyn HealthProbe>,
        response_timeout: Duration,
        probe_interval: Duration,
    ) -> Arc<Self> {
        let initial = delegate.selection_timeout() + response_timeout;
        Self::with_timeouts(delegate, probe, initial, initial, probe_interval)
    }

    /// Two-value form: `initial_timeout` applies until the first readiness
    /// completes, then `steady_timeout` applies from then on.
    pub fn with_timeouts(
        delegate: Arc<dyn EndpointGroup>,
        probe: Arc<dyn HealthProbe>,
        initial_timeout: Duration,
        steady_timeout: Duration,
        probe_interval: Duration,
    ) -> Arc<Self> {
        let group = Arc::new(HealthCheckedGroup {
            delegate,
            probe,
            probed: Mutex::new(Vec::new()),
            ready_tx: watch::channel(()).0,
            initial_timeout,
            steady_timeout,
            became_ready: AtomicBool::new(false),
            interval: probe_interval,
            _tasks: Mutex::new(Vec::new()),
        });
        group.clone().spawn_probes();
        group
    }

    fn spawn_probes(self: Arc<Self>) {
        let group = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                group.probe_once().await;
                tokio::time::sleep(group.interval).await;
            }
        });
        self._tasks.lock().unwrap().push(handle);
    }

    async fn probe_once(&self) {
        let members = self.delegate.snapshot();
        let mut probed = self.probed.lock().unwrap().clone();
        probed.retain(|h| members.contains(&h.endpoint));
        for endpoint in &members {
            if !probed.iter().any(|h| &h.endpoint == endpoint) {
                probed.push(Arc::new(Health {
                    endpoint: endpoint.clone(),
                    healthy: AtomicBool::new(false),
                }));
            }
        }
        for health in &probed {
            let healthy = self.probe.check(&health.endpoint).await;
            health.healthy.store(healthy, Ordering::Release);
        }
        let any_healthy = probed.iter().any(|h| h.healthy.load(Ordering::Acquire));
        *self.probed.lock().unwrap() = probed;
        if any_healthy {
            self.became_ready.store(true, Ordering::Release);
        }
        let _ = self.ready_tx.send(());
    }
}

impl EndpointGroup for HealthCheckedGroup {
    fn selection_timeout(&self) -> Duration {
        if self.became_ready.load(Ordering::Acquire) {
            self.steady_timeout
        } else {
            self.initial_timeout
        }
    }

    fn snapshot(&self) -> Vec<Endpoint> {
        self.probed
            .lock()
            .unwrap()
            .iter()
            .filter(|h| h.healthy.load(Ordering::Acquire))
            .map(|h| h.endpoint.clone())
            .collect()
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
            let mut ready = self.ready_tx.subscribe();
            let cancelled = ctx.cancellation_token();
            let wait = ctx.remaining().unwrap_or(self.selection_timeout()).min(self.selection_timeout());
            let sleep = tokio::time::sleep(wait);
            tokio::select! {
                _ = cancelled.cancelled() => None,
                _ = sleep => None,
                changed = ready.changed() => {
                    if changed.is_err() { return None; }
                    let current = self.snapshot();
                    if current.is_empty() { None } else { strategy.choose(&current) }
                }
            }
        })
    }
}

impl Drop for HealthCheckedGroup {
    fn drop(&mut self) {
        for handle in self._tasks.lock().unwrap().drain(..) {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::group::StaticGroup;
    use crate::endpoint::strategy::RoundRobinStrategy;
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;

    struct AllowList(StdMutex<HashSet<String>>);

    #[async_trait::async_trait]
    impl HealthProbe for AllowList {
        async fn check(&self, endpoint: &Endpoint) -> bool {
            self.0.lock().unwrap().contains(endpoint.host())
        }
    }

    #[tokio::test]
    async fn unhealthy_endpoints_are_excluded_from_snapshot() {
        let delegate = Arc::new(StaticGroup::new(vec![Endpoint::new("good", Some(80)), Endpoint::new("bad", Some(80))]));
        let mut allow = HashSet::new();
        allow.insert("good".to_string());
        let probe = Arc::new(AllowList(StdMutex::new(allow)));
        let group = HealthCheckedGroup::new(delegate, probe, Duration::from_millis(50), Duration::from_millis(5));

        let ctx = RequestContext::new();
        let strategy = RoundRobinStrategy::new();
        let selected = group.select(&ctx, &strategy).await;
        assert_eq!(selected, Some(Endpoint::new("good", Some(80))));
    }
}
