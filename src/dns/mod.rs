//! DNS resolution: RFC 1035 wire format, search-domain expansion, and a
//! TTL-respecting cache (spec §4.G, §6). Gated behind the `dns` feature
//! since the resolver itself needs `tokio`'s `net` I/O driver; the wire
//! codec, search expansion and cache are pure logic and always compiled.

pub mod cache;
pub mod message;
pub mod search;

#[cfg(feature = "dns")]
pub mod resolver;

pub use cache::DnsCache;
pub use message::{QuestionType, Record, RecordData};

#[cfg(feature = "dns")]
pub use resolver::{Resolver, ResolverConfig};
