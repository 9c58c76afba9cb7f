//! UDP/TCP DNS resolution over RFC 1035 wire format (spec §4.G, §6).

use std::net::SocketAddr;
use std::time::Duration;

use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::cache::DnsCache;
use super::message::{decode_message, encode_query, with_tcp_length_prefix, Question, QuestionType, Record, RecordData};
use super::search::expand;
use crate::endpoint::Endpoint;
use crate::error::PipelineError;

/// `search_domains`, `ndots`, per-query timeout, and the name servers to
/// query — the DNS config surface enumerated in spec §6.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub search_domains: Vec<String>,
    pub ndots: u32,
    pub query_timeout: Duration,
    pub name_servers: Vec<SocketAddr>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        ResolverConfig {
            search_domains: Vec::new(),
            ndots: 1,
            query_timeout: Duration::from_secs(5),
            name_servers: Vec::new(),
        }
    }
}

pub struct Resolver {
    config: ResolverConfig,
    cache: DnsCache,
}

impl Resolver {
    pub fn new(config: ResolverConfig) -> Self {
        Resolver { config, cache: DnsCache::new() }
    }

    /// Resolve `host` to endpoints, expanding search domains and
    /// respecting `cancel`: a cancelled lookup completes with `Vec::new()`
    /// immediately, and any response that arrives afterward is parsed (to
    /// release its buffer) and then discarded rather than leaked.
    pub async fn resolve(
        &self,
        host: &str,
        qtype: QuestionType,
        cancel: &CancellationToken,
    ) -> Result<Vec<Endpoint>, PipelineError> {
        let candidates = expand(host, &self.config.search_domains, self.config.ndots);
        for candidate in candidates {
            if cancel.is_cancelled() {
                return Ok(Vec::new());
            }
            if let Some(cached) = self.cache.lookup(&candidate, qtype) {
                match cached {
                    Some(records) => return Ok(records_to_endpoints(&records)),
                    None => continue,
                }
            }
            match self.query_one(&candidate, qtype, cancel).await? {
                Some(records) if !records.is_empty() => {
                    let ttl = records.iter().map(|r| r.ttl).min().unwrap_or(0);
                    self.cache.store_positive(&candidate, qtype, records.clone(), Duration::from_secs(ttl as u64));
                    return Ok(records_to_endpoints(&records));
                }
                Some(_) => {
                    self.cache.store_negative(&candidate, qtype);
                }
                None => {}
            }
        }
        Ok(Vec::new())
    }

    /// `Some(records)` on a definitive answer (possibly empty = NXDOMAIN),
    /// `None` if the lookup was cancelled or every name server timed out.
    async fn query_one(
        &self,
        name: &str,
        qtype: QuestionType,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<Record>>, PipelineError> {
        if self.config.name_servers.is_empty() {
            return Ok(None);
        }
        let id: u16 = rand::thread_rng().gen();
        let questions = vec![Question { name: name.to_string(), qtype }];
        let wire = encode_query(id, &questions);

        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(PipelineError::from)?;

        for server in &self.config.name_servers {
            socket.send_to(&wire, server).await.map_err(PipelineError::from)?;
        }

        let mut buf = vec![0u8; 4096];
        let recv = time::timeout(self.config.query_timeout, socket.recv_from(&mut buf));

        let (len, from) = tokio::select! {
            _ = cancel.cancelled() => return Ok(None),
            result = recv => {
                match result {
                    Ok(Ok(received)) => received,
                    Ok(Err(e)) => return Err(PipelineError::from(e)),
                    Err(_timeout) => return Ok(None),
                }
            }
        };

        let message = decode_message(bytes::Bytes::copy_from_slice(&buf[..len]))
            .map_err(|e| PipelineError::protocol(e.to_string()))?;
        if message.id != id {
            return Ok(None);
        }
        if message.truncated {
            // RFC 1035 §4.2.1: a truncated UDP answer is retried in full
            // over TCP against the server that sent it, per spec §6.
            return self.query_over_tcp(from, id, &wire, cancel).await;
        }
        if message.rcode == 3 {
            return Ok(Some(Vec::new())); // NXDOMAIN
        }
        Ok(Some(message.answers))
    }

    /// Re-issue a length-prefixed query over TCP against `server`, used when
    /// the UDP response came back with the truncated (TC) bit set.
    async fn query_over_tcp(
        &self,
        server: SocketAddr,
        id: u16,
        wire: &[u8],
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<Record>>, PipelineError> {
        let attempt = async {
            let mut stream = TcpStream::connect(server).await.map_err(PipelineError::from)?;
            stream
                .write_all(&with_tcp_length_prefix(wire))
                .await
                .map_err(PipelineError::from)?;

            let mut len_buf = [0u8; 2];
            stream.read_exact(&mut len_buf).await.map_err(PipelineError::from)?;
            let len = u16::from_be_bytes(len_buf) as usize;

            let mut response = vec![0u8; len];
            stream.read_exact(&mut response).await.map_err(PipelineError::from)?;

            let message = decode_message(bytes::Bytes::from(response)).map_err(|e| PipelineError::protocol(e.to_string()))?;
            if message.id != id {
                return Ok(None);
            }
            if message.rcode == 3 {
                return Ok(Some(Vec::new())); // NXDOMAIN
            }
            Ok(Some(message.answers))
        };

        tokio::select! {
            _ = cancel.cancelled() => Ok(None),
            result = time::timeout(self.config.query_timeout, attempt) => match result {
                Ok(inner) => inner,
                Err(_timeout) => Ok(None),
            },
        }
    }
}

fn records_to_endpoints(records: &[Record]) -> Vec<Endpoint> {
    records
        .iter()
        .filter_map(|record| match &record.data {
            RecordData::A(ip) => Some(Endpoint::new(ip.to_string(), None)),
            RecordData::Aaaa(ip) => Some(Endpoint::new(ip.to_string(), None)),
            RecordData::Srv { port, target, .. } => Some(Endpoint::new(target.clone(), Some(*port))),
            RecordData::Txt(bytes) => parse_txt_endpoint(bytes),
            RecordData::Unknown => None,
        })
        .collect()
}

/// A TXT record whose payload starts with `endpoint=HOST[:PORT]`
/// contributes an endpoint (spec §6). Too-short/too-long TXT is ignored
/// with a warning; an unparseable `endpoint=...` value is ignored silently.
fn parse_txt_endpoint(bytes: &[u8]) -> Option<Endpoint> {
    const PREFIX: &[u8] = b"endpoint=";
    if bytes.len() < PREFIX.len() || bytes.len() > 255 {
        warn!(len = bytes.len(), "ignoring out-of-range TXT record");
        return None;
    }
    if !bytes.starts_with(PREFIX) {
        return None;
    }
    let value = std::str::from_utf8(&bytes[PREFIX.len()..]).ok()?;
    let mut parts = value.splitn(2, ':');
    let host = parts.next()?.to_string();
    if host.is_empty() {
        return None;
    }
    let port = match parts.next() {
        Some(p) => Some(p.parse::<u16>().ok()?),
        None => None,
    };
    Some(Endpoint::new(host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn txt_endpoint_with_port_parses() {
        let endpoint = parse_txt_endpoint(b"endpoint=svc.internal:9000").unwrap();
        assert_eq!(endpoint.host(), "svc.internal");
        assert_eq!(endpoint.port(), Some(9000));
    }

    #[test]
    fn txt_endpoint_without_port_parses() {
        let endpoint = parse_txt_endpoint(b"endpoint=svc.internal").unwrap();
        assert_eq!(endpoint.port(), None);
    }

    #[test]
    fn txt_without_endpoint_prefix_is_ignored() {
        assert!(parse_txt_endpoint(b"some-other-data").is_none());
    }

    #[test]
    fn txt_with_unparseable_port_is_ignored() {
        assert!(parse_txt_endpoint(b"endpoint=svc.internal:notaport").is_none());
    }

    #[test]
    fn oversized_txt_is_ignored() {
        let payload = vec![b'a'; 300];
        assert!(parse_txt_endpoint(&payload).is_none());
    }
}
