//! HTTP codec layer: `content-encoding` decoding, the `100-continue` state
//! machine, the connection pool, protocol negotiation, and the wire
//! transport that drives them against live sockets (spec §4.E).

pub mod compression;
pub mod continuation;
pub mod pool;

#[cfg(any(feature = "server", feature = "channel"))]
pub mod body_adapter;
#[cfg(any(feature = "server", feature = "channel"))]
pub mod negotiate;

#[cfg(feature = "channel")]
pub mod client;
#[cfg(feature = "server")]
pub mod server;

pub use compression::{ContentDecoder, DecompressionError};
pub use continuation::{ContinuationError, ContinuationState, ExpectContinue};
pub use pool::{ConnectionKey, ConnectionPool, PoolListener, Protocol};

#[cfg(any(feature = "server", feature = "channel"))]
pub use negotiate::{NegotiationCache, ProtocolPreference};

#[cfg(feature = "channel")]
pub use client::HttpClient;
#[cfg(feature = "server")]
pub use server::{serve, serve_connection, HyperAdapter};
