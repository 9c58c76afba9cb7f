//! Retry limiters: a fixed-rate token bucket and a gRPC-style adaptive
//! scaled-integer token bucket (spec §4.H).

mod fixed;
mod grpc;

pub use fixed::FixedRateLimiter;
pub use grpc::{GrpcRetryLimiter, GrpcRetryLimiterConfig};

use crate::context::RequestContext;

/// Consulted by the retry decorator before scheduling another attempt
/// (spec §4.D.3): if it denies, no further attempt is scheduled regardless
/// of backoff.
pub trait RetryLimiter: Send + Sync {
    fn should_retry(&self, ctx: &RequestContext, attempt: u32) -> bool;
}
