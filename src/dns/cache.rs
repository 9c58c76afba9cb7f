//! TTL-respecting, per-question DNS cache with negative caching (spec §4.G).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::message::{QuestionType, Record};

#[derive(Clone)]
enum Entry {
    Positive { records: Vec<Record>, expires_at: Instant },
    Negative { expires_at: Instant },
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        match self {
            Entry::Positive { expires_at, .. } => now >= *expires_at,
            Entry::Negative { expires_at } => now >= *expires_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Key {
    name: String,
    qtype_code: u8,
}

fn qtype_code(qtype: QuestionType) -> u8 {
    match qtype {
        QuestionType::A => 0,
        QuestionType::Aaaa => 1,
        QuestionType::Srv => 2,
        QuestionType::Txt => 3,
    }
}

/// Default TTL applied to a negative (NXDOMAIN) answer, since RFC 1035
/// doesn't supply one the way a positive answer's TTL does.
const NEGATIVE_TTL: Duration = Duration::from_secs(30);

pub struct DnsCache {
    entries: Mutex<HashMap<Key, Entry>>,
}

impl DnsCache {
    pub fn new() -> Self {
        DnsCache { entries: Mutex::new(HashMap::new()) }
    }

    pub fn lookup(&self, name: &str, qtype: QuestionType) -> Option<Option<Vec<Record>>> {
        let key = Key { name: name.to_string(), qtype_code: qtype_code(qtype) };
        let mut entries = self.entries.lock().unwrap();
        match entries.get(&key) {
            Some(entry) if !entry.is_expired(Instant::now()) => match entry {
                Entry::Positive { records, .. } => Some(Some(records.clone())),
                Entry::Negative { .. } => Some(None),
            },
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    pub fn store_positive(&self, name: &str, qtype: QuestionType, records: Vec<Record>, ttl: Duration) {
        let key = Key { name: name.to_string(), qtype_code: qtype_code(qtype) };
        self.entries.lock().unwrap().insert(
            key,
            Entry::Positive { records, expires_at: Instant::now() + ttl },
        );
    }

    pub fn store_negative(&self, name: &str, qtype: QuestionType) {
        let key = Key { name: name.to_string(), qtype_code: qtype_code(qtype) };
        self.entries.lock().unwrap().insert(
            key,
            Entry::Negative { expires_at: Instant::now() + NEGATIVE_TTL },
        );
    }
}

impl Default for DnsCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::message::RecordData;
    use std::net::Ipv4Addr;

    fn record(ttl: u32) -> Record {
        Record { name: "example.com".into(), ttl, data: RecordData::A(Ipv4Addr::new(1, 2, 3, 4)) }
    }

    #[test]
    fn miss_then_store_then_hit() {
        let cache = DnsCache::new();
        assert!(cache.lookup("example.com", QuestionType::A).is_none());
        cache.store_positive("example.com", QuestionType::A, vec![record(60)], Duration::from_secs(60));
        let hit = cache.lookup("example.com", QuestionType::A).unwrap();
        assert!(hit.is_some());
    }

    #[test]
    fn expired_entries_are_treated_as_a_miss() {
        let cache = DnsCache::new();
        cache.store_positive("example.com", QuestionType::A, vec![record(0)], Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.lookup("example.com", QuestionType::A).is_none());
    }

    #[test]
    fn negative_cache_reports_nxdomain_as_some_none() {
        let cache = DnsCache::new();
        cache.store_negative("missing.example.com", QuestionType::A);
        let hit = cache.lookup("missing.example.com", QuestionType::A).unwrap();
        assert!(hit.is_none());
    }
}
