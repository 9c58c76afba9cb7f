//! Connection pool keyed by `(protocol, authority, tls-context-id)` (spec §4.E).

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Negotiated wire protocol for a pooled connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Http1,
    H2c,
    Http2Tls,
}

/// An opaque identifier for a cached TLS context, keyed upstream by
/// `(cert chain id, trust roots id, client-auth)` (spec §4.E). TLS
/// certificate loading itself is an external collaborator out of this
/// crate's scope; we only need its identity to key pooled connections.
pub type TlsContextId = Option<u64>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub protocol: Protocol,
    pub authority: String,
    pub tls_context: TlsContextId,
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}://{}", self.protocol, self.authority)
    }
}

/// Observes pool open/close events, per spec §4.E ("Listeners observe
/// open/close").
pub trait PoolListener: Send + Sync {
    fn connection_opened(&self, _key: &ConnectionKey) {}
    fn connection_closed(&self, _key: &ConnectionKey) {}
}

struct Entry<C> {
    connections: Vec<C>,
    pin_close: bool,
}

/// A generic, thread-safe connection pool.
///
/// `C` is whatever the transport layer considers a reusable connection
/// handle (e.g. an `h2::client::SendRequest` or a hyper connection handle);
/// this module only owns the keying, reuse and eviction policy, matching
/// the spec's description of the pool as independent of the wire codec
/// itself.
pub struct ConnectionPool<C> {
    entries: Mutex<HashMap<ConnectionKey, Entry<C>>>,
    listeners: Vec<Arc<dyn PoolListener>>,
}

impl<C> Default for ConnectionPool<C> {
    fn default() -> Self {
        ConnectionPool {
            entries: Mutex::new(HashMap::new()),
            listeners: Vec::new(),
        }
    }
}

impl<C> ConnectionPool<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listener(mut self, listener: Arc<dyn PoolListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Take a pooled connection for `key`, if one is available and not
    /// pinned for close.
    pub fn acquire(&self, key: &ConnectionKey) -> Option<C> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.get_mut(key)?;
        if entry.pin_close {
            return None;
        }
        entry.connections.pop()
    }

    /// Insert a freshly established connection into the pool.
    pub fn insert(&self, key: ConnectionKey, connection: C) {
        {
            let mut entries = self.entries.lock().unwrap();
            entries
                .entry(key.clone())
                .or_insert_with(|| Entry {
                    connections: Vec::new(),
                    pin_close: false,
                })
                .connections
                .push(connection);
        }
        for listener in &self.listeners {
            listener.connection_opened(&key);
        }
    }

    /// Mark a key's connections for eviction because a response on them
    /// carried `Connection: close` (spec §4.E). The connection is actually
    /// dropped from the pool when the in-flight response completes, via
    /// [`ConnectionPool::evict`].
    pub fn pin_close(&self, key: &ConnectionKey) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(key) {
            entry.pin_close = true;
        }
    }

    /// Remove all connections for `key` from the pool, notifying listeners.
    pub fn evict(&self, key: &ConnectionKey) {
        let removed = {
            let mut entries = self.entries.lock().unwrap();
            entries.remove(key).is_some()
        };
        if removed {
            for listener in &self.listeners {
                listener.connection_closed(key);
            }
        }
    }

    pub fn len(&self, key: &ConnectionKey) -> usize {
        self.entries
            .lock()
            .unwrap()
            .get(key)
            .map(|e| e.connections.len())
            .unwrap_or(0)
    }

    pub fn is_pinned_for_close(&self, key: &ConnectionKey) -> bool {
        self.entries
            .lock()
            .unwrap()
            .get(key)
            .map(|e| e.pin_close)
            .unwrap_or(false)
    }
}
