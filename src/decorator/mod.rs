//! Decorators composing over the request pipeline (spec §4.D).
//!
//! Each submodule is an ordinary [`tower_layer::Layer`]; composition is
//! plain function composition, same as wrapping a `tonic` service stack.

pub mod auth;
pub mod circuit_breaker;
pub mod content_preview;
pub mod decoding;
pub mod metrics;
pub mod retry;
pub mod timeout;

pub use auth::{AuthDecision, AuthFailureHandler, AuthLayer, AuthService, Authorizer, DefaultDenyHandler};
pub use circuit_breaker::{
    BreakerFallback, BreakerState, CircuitBreakerLayer, CircuitBreakerService, DefaultOutcomeRule, OutcomeRule, SystemTicker, Ticker,
};
pub use content_preview::{ContentPreviewLayer, ContentPreviewService, NoopSanitizer, PreviewSanitizer};
pub use decoding::{DecodingLayer, DecodingService};
pub use metrics::{DefaultResultPredicate, LiteralPathPattern, MetricSink, MetricsLayer, MetricsService, PathPatternExtractor, RequestTags, ResultPredicate};
pub use retry::{Backoff, EndpointSource, FixedEndpoint, RetryLayer, RetryService, RngSource, ThreadRng};
pub use timeout::{bounded_selection, ResponseTimeoutLayer, ResponseTimeoutService};
