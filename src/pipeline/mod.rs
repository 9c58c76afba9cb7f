//! The request/response shape decorators compose over (spec §4.C).

use std::sync::Arc;

use crate::context::RequestContext;
use crate::stream::{BodyStream, HttpHeaders};

/// One exchange's request half: the context it runs under, its headers,
/// and its body stream.
pub struct Request {
    pub context: Arc<RequestContext>,
    pub headers: HttpHeaders,
    pub body: BodyStream,
}

impl Request {
    pub fn new(context: Arc<RequestContext>, headers: HttpHeaders, body: BodyStream) -> Self {
        Request { context, headers, body }
    }
}

/// One exchange's response half.
pub struct Response {
    pub headers: HttpHeaders,
    pub body: BodyStream,
}

impl Response {
    pub fn new(headers: HttpHeaders, body: BodyStream) -> Self {
        Response { headers, body }
    }
}

/// The uniform capability every decorator and terminal handler presents
/// (spec §4.C: `serve(ctx, req) -> response`). A thin alias over
/// `tower_service::Service<Request>` so decorators are ordinary
/// `tower_layer::Layer` impls, the same composition model `tonic`'s
/// transport stack uses.
pub trait PipelineService: tower_service::Service<Request, Response = Response, Error = crate::error::PipelineError> {}

impl<S> PipelineService for S where S: tower_service::Service<Request, Response = Response, Error = crate::error::PipelineError> {}

pub type BoxFuture<'a, T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;
