//! gRPC-style adaptive scaled-integer token bucket retry limiter (spec §4.H).

use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};

use super::RetryLimiter;
use crate::context::RequestContext;

/// Internal scale factor so the bucket can track fractional `token_ratio`
/// increments (e.g. `0.8`) as an atomic integer.
const SCALE: i64 = 1000;

#[derive(Debug, Clone)]
pub struct GrpcRetryLimiterConfig {
    pub max_tokens: u32,
    pub threshold: u32,
    pub token_ratio: f64,
    pub retryable_statuses: HashSet<u32>,
}

impl GrpcRetryLimiterConfig {
    /// Validates the invariants from spec §4.H:
    /// `max_tokens > 0 ∧ token_ratio > 0 ∧ 0 < threshold ≤ max_tokens`;
    /// `retryable_statuses` non-empty.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.max_tokens == 0 {
            return Err("max_tokens must be > 0");
        }
        if self.token_ratio <= 0.0 {
            return Err("token_ratio must be > 0");
        }
        if self.threshold == 0 || self.threshold > self.max_tokens {
            return Err("threshold must be in (0, max_tokens]");
        }
        if self.retryable_statuses.is_empty() {
            return Err("retryable_statuses must be non-empty");
        }
        Ok(())
    }
}

pub struct GrpcRetryLimiter {
    config: GrpcRetryLimiterConfig,
    count: AtomicI64,
}

impl GrpcRetryLimiter {
    pub fn new(config: GrpcRetryLimiterConfig) -> Result<Self, &'static str> {
        config.validate()?;
        let initial = config.max_tokens as i64 * SCALE;
        Ok(GrpcRetryLimiter { config, count: AtomicI64::new(initial) })
    }

    fn clamp(&self, value: i64) -> i64 {
        value.clamp(0, self.config.max_tokens as i64 * SCALE)
    }

    /// Consult the observed `grpc-status` (trailers first, then headers) of
    /// the attempt that just completed. `None` means no status was
    /// observed (local exception, or neither trailers nor headers carried
    /// one) — in that case the bucket is left unchanged.
    pub fn on_attempt_completed(&self, grpc_status: Option<u32>) {
        let Some(status) = grpc_status else { return };
        let is_retryable = self.config.retryable_statuses.contains(&status);
        self.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(if is_retryable {
                    self.clamp(current - SCALE)
                } else {
                    self.clamp(current + (self.config.token_ratio * SCALE as f64) as i64)
                })
            })
            .ok();
    }

    pub fn tokens(&self) -> f64 {
        self.count.load(Ordering::Acquire) as f64 / SCALE as f64
    }
}

impl RetryLimiter for GrpcRetryLimiter {
    fn should_retry(&self, _ctx: &RequestContext, _attempt: u32) -> bool {
        self.count.load(Ordering::Acquire) > self.config.threshold as i64 * SCALE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(retryable: &[u32]) -> GrpcRetryLimiterConfig {
        GrpcRetryLimiterConfig {
            max_tokens: 10,
            threshold: 5,
            token_ratio: 0.8,
            retryable_statuses: retryable.iter().copied().collect(),
        }
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut cfg = config(&[14]);
        cfg.threshold = 0;
        assert!(GrpcRetryLimiter::new(cfg).is_err());
    }

    #[test]
    fn retryable_status_decrements_and_eventually_denies() {
        let limiter = GrpcRetryLimiter::new(config(&[14])).unwrap();
        let ctx = RequestContext::new();
        for _ in 0..5 {
            assert!(limiter.should_retry(&ctx, 1));
            limiter.on_attempt_completed(Some(14));
        }
        assert!(!limiter.should_retry(&ctx, 1));
    }

    #[test]
    fn non_retryable_status_increments_toward_max() {
        let limiter = GrpcRetryLimiter::new(config(&[14])).unwrap();
        limiter.on_attempt_completed(Some(14));
        limiter.on_attempt_completed(Some(14));
        let before = limiter.tokens();
        limiter.on_attempt_completed(Some(0)); // OK, not retryable
        assert!(limiter.tokens() > before);
    }

    #[test]
    fn no_observed_status_leaves_bucket_unchanged() {
        let limiter = GrpcRetryLimiter::new(config(&[14])).unwrap();
        let before = limiter.tokens();
        limiter.on_attempt_completed(None);
        assert_eq!(limiter.tokens(), before);
    }

    #[test]
    fn count_never_exceeds_max_tokens() {
        let limiter = GrpcRetryLimiter::new(config(&[14])).unwrap();
        for _ in 0..100 {
            limiter.on_attempt_completed(Some(0));
        }
        assert!(limiter.tokens() <= 10.0);
    }
}
