//! A reactive HTTP/1.1 and HTTP/2 micro-service runtime.
//!
//! The core of the crate is the request pipeline: an exchange flows
//! through a stack of [`tower_layer::Layer`] decorators (auth, circuit
//! breaker, retry, content preview, metrics, decoding, timeouts) wrapped
//! around a leaf [`pipeline::PipelineService`], with bodies modeled as
//! backpressured, pool-aware [`stream::BodyStream`]s. Endpoint resolution
//! (static, DNS, health-checked, composite groups) and the retry/throttle
//! limiters that gate repeated attempts compose the same way.
#![recursion_limit = "256"]

pub mod codec;
pub mod config;
pub mod context;
pub mod decorator;
pub mod dns;
pub mod endpoint;
#[doc(hidden)]
pub mod error;
pub mod log;
pub mod pipeline;
pub mod retry_limiter;
pub mod stream;

pub use config::Config;
pub use context::RequestContext;
pub use error::{ErrorKind, PipelineError};
pub use log::{LogBuilder, LogProperty, LogValue};
pub use pipeline::{PipelineService, Request, Response};
