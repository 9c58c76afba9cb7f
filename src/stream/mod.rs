//! The data model and reactive stream substrate (spec §3, §4.A).

mod body;
mod data;
mod headers;
mod object;

pub use body::{AlreadySubscribed, BodySender, BodyStream, Subscription, SubscriptionOptions};
pub use data::HttpData;
pub use headers::{HeaderKind, HttpHeaders, PseudoHeaders};
pub use object::{HttpObject, SequenceValidator, SequenceViolation};
