//! Configuration surface (spec §6, §10.3).
//!
//! Each subsystem gets a plain config struct with `with_*` consuming-self
//! builder methods, the same shape `tonic::transport::Endpoint` uses —
//! values are resolved once at construction and passed explicitly, never
//! read from a global.

use std::time::Duration;

/// Per-exchange knobs independent of any one decorator.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub response_timeout: Duration,
    pub selection_timeout: Duration,
}

impl Default for RequestOptions {
    fn default() -> Self {
        RequestOptions { response_timeout: Duration::from_secs(30), selection_timeout: Duration::from_secs(5) }
    }
}

impl RequestOptions {
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_selection_timeout(mut self, timeout: Duration) -> Self {
        self.selection_timeout = timeout;
        self
    }
}

/// Client factory knobs: what protocol to prefer and how to key pooled
/// connections (spec §4.E).
#[derive(Debug, Clone)]
pub struct ClientFactoryConfig {
    pub prefer_h2c_upgrade: bool,
    pub connect_timeout: Duration,
    pub pool_idle_timeout: Duration,
}

impl Default for ClientFactoryConfig {
    fn default() -> Self {
        ClientFactoryConfig {
            prefer_h2c_upgrade: true,
            connect_timeout: Duration::from_secs(10),
            pool_idle_timeout: Duration::from_secs(90),
        }
    }
}

impl ClientFactoryConfig {
    pub fn with_prefer_h2c_upgrade(mut self, prefer: bool) -> Self {
        self.prefer_h2c_upgrade = prefer;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.pool_idle_timeout = timeout;
        self
    }
}

/// Retry decorator config (spec §4.D.3); the limiter and endpoint source
/// themselves are supplied separately since they carry trait objects.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub jitter: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig { max_attempts: 1, jitter: Duration::ZERO }
    }
}

impl RetryConfig {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }
}

/// Circuit breaker decorator config (spec §4.D.2).
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub threshold_ratio: f64,
    pub min_requests: u32,
    pub open_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        CircuitBreakerConfig { threshold_ratio: 0.5, min_requests: 20, open_duration: Duration::from_secs(30) }
    }
}

impl CircuitBreakerConfig {
    pub fn with_threshold_ratio(mut self, ratio: f64) -> Self {
        self.threshold_ratio = ratio;
        self
    }

    pub fn with_min_requests(mut self, min_requests: u32) -> Self {
        self.min_requests = min_requests;
        self
    }

    pub fn with_open_duration(mut self, duration: Duration) -> Self {
        self.open_duration = duration;
        self
    }
}

/// Authorization decorator config (spec §4.D.1); authorizers themselves
/// are supplied separately as trait objects.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    pub enabled: bool,
}

impl AuthConfig {
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Content preview decorator config (spec §4.D.4).
#[derive(Debug, Clone)]
pub struct PreviewConfig {
    pub max_length: usize,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        PreviewConfig { max_length: 2048 }
    }
}

impl PreviewConfig {
    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }
}

/// DNS resolver config (spec §4.G, §6); mirrored from
/// [`crate::dns::ResolverConfig`] so callers building a full [`Config`]
/// don't need the `dns` feature enabled just to describe the knobs.
#[derive(Debug, Clone)]
pub struct DnsConfig {
    pub search_domains: Vec<String>,
    pub ndots: u32,
    pub query_timeout: Duration,
}

impl Default for DnsConfig {
    fn default() -> Self {
        DnsConfig { search_domains: Vec::new(), ndots: 1, query_timeout: Duration::from_secs(5) }
    }
}

impl DnsConfig {
    pub fn with_search_domains(mut self, search_domains: Vec<String>) -> Self {
        self.search_domains = search_domains;
        self
    }

    pub fn with_ndots(mut self, ndots: u32) -> Self {
        self.ndots = ndots;
        self
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }
}

/// Endpoint group selection config (spec §4.F).
#[derive(Debug, Clone)]
pub struct EndpointGroupConfig {
    pub selection_timeout: Duration,
    pub health_check_initial_timeout: Duration,
    pub health_check_steady_timeout: Duration,
    pub health_check_interval: Duration,
}

impl Default for EndpointGroupConfig {
    fn default() -> Self {
        EndpointGroupConfig {
            selection_timeout: Duration::from_secs(5),
            health_check_initial_timeout: Duration::from_secs(1),
            health_check_steady_timeout: Duration::from_secs(10),
            health_check_interval: Duration::from_secs(5),
        }
    }
}

impl EndpointGroupConfig {
    pub fn with_selection_timeout(mut self, timeout: Duration) -> Self {
        self.selection_timeout = timeout;
        self
    }

    pub fn with_health_check_timeouts(mut self, initial: Duration, steady: Duration) -> Self {
        self.health_check_initial_timeout = initial;
        self.health_check_steady_timeout = steady;
        self
    }

    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }
}

/// gRPC-style adaptive retry limiter config (spec §4.H); re-exported here
/// under the config surface for discoverability alongside the others.
pub use crate::retry_limiter::GrpcRetryLimiterConfig as GrpcRetryLimiterSettings;

/// Root config aggregating every subsystem, passed explicitly through
/// construction — no process-global state.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub request_options: RequestOptions,
    pub client_factory: ClientFactoryConfig,
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub auth: AuthConfig,
    pub preview: PreviewConfig,
    pub dns: DnsConfig,
    pub endpoint_group: EndpointGroupConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_compose_without_mutating_defaults_elsewhere() {
        let a = RequestOptions::default();
        let b = RequestOptions::default().with_response_timeout(Duration::from_secs(1));
        assert_ne!(a.response_timeout, b.response_timeout);
    }

    #[test]
    fn retry_config_never_allows_zero_attempts() {
        let cfg = RetryConfig::default().with_max_attempts(0);
        assert_eq!(cfg.max_attempts, 1);
    }
}
