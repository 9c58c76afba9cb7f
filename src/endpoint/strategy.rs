//! Pluggable, deterministic endpoint selection strategies (spec §4.F).

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::Endpoint;

/// Chooses one endpoint from a non-empty snapshot. Must be deterministic
/// given the current endpoint list and the strategy's own selection state.
pub trait SelectionStrategy: Send + Sync {
    fn choose(&self, endpoints: &[Endpoint]) -> Option<Endpoint>;
}

#[derive(Default)]
pub struct RoundRobinStrategy {
    next: AtomicUsize,
}

impl RoundRobinStrategy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SelectionStrategy for RoundRobinStrategy {
    fn choose(&self, endpoints: &[Endpoint]) -> Option<Endpoint> {
        if endpoints.is_empty() {
            return None;
        }
        let i = self.next.fetch_add(1, Ordering::Relaxed) % endpoints.len();
        Some(endpoints[i].clone())
    }
}

#[derive(Default)]
pub struct WeightedRoundRobinStrategy {
    next: AtomicUsize,
}

impl WeightedRoundRobinStrategy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SelectionStrategy for WeightedRoundRobinStrategy {
    fn choose(&self, endpoints: &[Endpoint]) -> Option<Endpoint> {
        let total_weight: u32 = endpoints.iter().map(|e| e.weight().max(1)).sum();
        if total_weight == 0 {
            return None;
        }
        let i = self.next.fetch_add(1, Ordering::Relaxed) as u32 % total_weight;
        let mut cursor = 0u32;
        for endpoint in endpoints {
            cursor += endpoint.weight().max(1);
            if i < cursor {
                return Some(endpoint.clone());
            }
        }
        endpoints.last().cloned()
    }
}

/// Hashes a caller-supplied key to a stable endpoint, so repeated calls
/// with the same key land on the same endpoint while the list is stable.
pub struct StickyStrategy {
    key: Box<dyn Fn() -> u64 + Send + Sync>,
}

impl StickyStrategy {
    pub fn new(key: impl Fn() -> u64 + Send + Sync + 'static) -> Self {
        StickyStrategy { key: Box::new(key) }
    }

    pub fn from_hashable<K: Hash>(key_fn: impl Fn() -> K + Send + Sync + 'static) -> Self {
        StickyStrategy::new(move || {
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            key_fn().hash(&mut hasher);
            hasher.finish()
        })
    }
}

impl SelectionStrategy for StickyStrategy {
    fn choose(&self, endpoints: &[Endpoint]) -> Option<Endpoint> {
        if endpoints.is_empty() {
            return None;
        }
        let i = ((self.key)() as usize) % endpoints.len();
        Some(endpoints[i].clone())
    }
}

/// Weight for newly-seen endpoints increases linearly from zero over
/// `rampup_steps` selections, so a freshly inserted endpoint doesn't take
/// a full traffic share immediately.
pub struct RampUpStrategy {
    rampup_steps: u32,
    seen: Mutex<HashMap<Endpoint, u32>>,
    round_robin: RoundRobinStrategy,
}

impl RampUpStrategy {
    pub fn new(rampup_steps: u32) -> Self {
        RampUpStrategy {
            rampup_steps: rampup_steps.max(1),
            seen: Mutex::new(HashMap::new()),
            round_robin: RoundRobinStrategy::new(),
        }
    }
}

impl SelectionStrategy for RampUpStrategy {
    fn choose(&self, endpoints: &[Endpoint]) -> Option<Endpoint> {
        if endpoints.is_empty() {
            return None;
        }
        let weighted: Vec<Endpoint> = {
            let mut seen = self.seen.lock().unwrap();
            endpoints
                .iter()
                .map(|e| {
                    let step = seen.entry(e.clone()).or_insert(0);
                    *step = (*step + 1).min(self.rampup_steps);
                    let ramped_weight = (e.weight().max(1) * *step) / self.rampup_steps;
                    e.clone().with_weight(ramped_weight.max(1))
                })
                .collect()
        };
        self.round_robin.choose(&weighted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(host: &str) -> Endpoint {
        Endpoint::new(host, Some(80))
    }

    #[test]
    fn round_robin_cycles_through_all_endpoints() {
        let strategy = RoundRobinStrategy::new();
        let endpoints = vec![ep("a"), ep("b"), ep("c")];
        let chosen: Vec<_> = (0..6)
            .map(|_| strategy.choose(&endpoints).unwrap().host().to_string())
            .collect();
        assert_eq!(chosen, vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[test]
    fn sticky_is_stable_for_a_fixed_key() {
        let strategy = StickyStrategy::new(|| 42);
        let endpoints = vec![ep("a"), ep("b"), ep("c")];
        let first = strategy.choose(&endpoints);
        let second = strategy.choose(&endpoints);
        assert_eq!(first, second);
    }

    #[test]
    fn weighted_round_robin_favors_higher_weight() {
        let strategy = WeightedRoundRobinStrategy::new();
        let endpoints = vec![ep("a").with_weight(1), ep("b").with_weight(3)];
        let mut counts = HashMap::new();
        for _ in 0..8 {
            let chosen = strategy.choose(&endpoints).unwrap();
            *counts.entry(chosen.host().to_string()).or_insert(0) += 1;
        }
        assert!(counts["b"] > counts["a"]);
    }
}
