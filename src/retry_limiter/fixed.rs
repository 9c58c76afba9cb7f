//! Fixed-rate token bucket retry limiter (spec §4.H).

use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::RetryLimiter;
use crate::context::RequestContext;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket with rate `permits_per_sec`; `should_retry` succeeds iff a
/// permit is available *right now* — non-blocking, never queues.
///
/// Open question resolved here: a denial does not consume a token (only a
/// granted retry does), so a burst of denied callers doesn't starve the
/// bucket further once the rate recovers.
pub struct FixedRateLimiter {
    permits_per_sec: f64,
    max_tokens: f64,
    bucket: Mutex<Bucket>,
}

impl FixedRateLimiter {
    pub fn new(permits_per_sec: f64) -> Self {
        FixedRateLimiter {
            permits_per_sec,
            max_tokens: permits_per_sec.max(1.0),
            bucket: Mutex::new(Bucket { tokens: permits_per_sec.max(1.0), last_refill: Instant::now() }),
        }
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        bucket.tokens = (bucket.tokens + elapsed.as_secs_f64() * self.permits_per_sec).min(self.max_tokens);
        bucket.last_refill = now;
    }
}

impl RetryLimiter for FixedRateLimiter {
    fn should_retry(&self, _ctx: &RequestContext, _attempt: u32) -> bool {
        let mut bucket = self.bucket.lock().unwrap();
        self.refill(&mut bucket);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn denies_once_bucket_is_exhausted() {
        let limiter = FixedRateLimiter::new(2.0);
        let ctx = RequestContext::new();
        assert!(limiter.should_retry(&ctx, 1));
        assert!(limiter.should_retry(&ctx, 1));
        assert!(!limiter.should_retry(&ctx, 1));
    }

    #[tokio::test]
    async fn refills_over_time() {
        let limiter = FixedRateLimiter::new(1000.0);
        let ctx = RequestContext::new();
        for _ in 0..1000 {
            assert!(limiter.should_retry(&ctx, 1));
        }
        assert!(!limiter.should_retry(&ctx, 1));
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(limiter.should_retry(&ctx, 1));
    }

    #[tokio::test]
    async fn denial_does_not_consume_a_token() {
        let limiter = FixedRateLimiter::new(1.0);
        let ctx = RequestContext::new();
        assert!(limiter.should_retry(&ctx, 1));
        assert!(!limiter.should_retry(&ctx, 1));
        assert!(!limiter.should_retry(&ctx, 1));
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(limiter.should_retry(&ctx, 1));
    }
}
