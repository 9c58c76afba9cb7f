//! Minimal RFC 1035 wire format: just enough to build A/AAAA/SRV/TXT
//! questions and parse matching answers (spec §4.G, §6).
//!
//! Hand-rolled rather than pulled from a DNS crate: the wire format this
//! crate needs is a small, fixed slice of RFC 1035 (no compression-pointer
//! writing, no DNSSEC, no zone transfer), and `bytes` already gives the
//! cursor/buffer primitives a parser like this wants.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use bytes::{Buf, BufMut, Bytes, BytesMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionType {
    A,
    Aaaa,
    Srv,
    Txt,
}

impl QuestionType {
    fn code(self) -> u16 {
        match self {
            QuestionType::A => 1,
            QuestionType::Aaaa => 28,
            QuestionType::Srv => 33,
            QuestionType::Txt => 16,
        }
    }

    fn from_code(code: u16) -> Option<Self> {
        match code {
            1 => Some(QuestionType::A),
            28 => Some(QuestionType::Aaaa),
            33 => Some(QuestionType::Srv),
            16 => Some(QuestionType::Txt),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Question {
    pub name: String,
    pub qtype: QuestionType,
}

#[derive(Debug, Clone)]
pub enum RecordData {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Srv { priority: u16, weight: u16, port: u16, target: String },
    Txt(Vec<u8>),
    Unknown,
}

#[derive(Debug, Clone)]
pub struct Record {
    pub name: String,
    pub ttl: u32,
    pub data: RecordData,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub id: u16,
    pub is_response: bool,
    pub truncated: bool,
    pub rcode: u8,
    pub questions: Vec<Question>,
    pub answers: Vec<Record>,
}

#[derive(Debug)]
pub enum WireError {
    Truncated,
    BadLabel,
    BadName,
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::Truncated => f.write_str("dns message truncated"),
            WireError::BadLabel => f.write_str("dns label exceeds 63 bytes"),
            WireError::BadName => f.write_str("dns name malformed"),
        }
    }
}
impl std::error::Error for WireError {}

fn write_name(buf: &mut BytesMut, name: &str) -> Result<(), WireError> {
    for label in name.trim_end_matches('.').split('.') {
        if label.is_empty() {
            continue;
        }
        if label.len() > 63 {
            return Err(WireError::BadLabel);
        }
        buf.put_u8(label.len() as u8);
        buf.put_slice(label.as_bytes());
    }
    buf.put_u8(0);
    Ok(())
}

/// Encode a query message with `questions`, each asking for its own type.
pub fn encode_query(id: u16, questions: &[Question]) -> Bytes {
    let mut buf = BytesMut::with_capacity(64);
    buf.put_u16(id);
    buf.put_u16(0x0100); // RD=1 (recursion desired)
    buf.put_u16(questions.len() as u16);
    buf.put_u16(0); // ANCOUNT
    buf.put_u16(0); // NSCOUNT
    buf.put_u16(0); // ARCOUNT
    for q in questions {
        write_name(&mut buf, &q.name).expect("caller validated names");
        buf.put_u16(q.qtype.code());
        buf.put_u16(1); // IN class
    }
    buf.freeze()
}

/// Parse a name starting at `pos`, following compression pointers.
/// Returns the decoded name and the offset just past the name in the
/// *original* (non-pointer) stream when no pointer was taken, or past the
/// first pointer when one was.
fn read_name(data: &[u8], start: usize) -> Result<(String, usize), WireError> {
    let mut labels = Vec::new();
    let mut pos = start;
    let mut jumped = false;
    let mut end_pos = start;
    let mut hops = 0;

    loop {
        hops += 1;
        if hops > 128 {
            return Err(WireError::BadName);
        }
        let len = *data.get(pos).ok_or(WireError::Truncated)?;
        if len == 0 {
            if !jumped {
                end_pos = pos + 1;
            }
            break;
        }
        if len & 0xC0 == 0xC0 {
            let hi = (len & 0x3F) as usize;
            let lo = *data.get(pos + 1).ok_or(WireError::Truncated)? as usize;
            if !jumped {
                end_pos = pos + 2;
            }
            pos = (hi << 8) | lo;
            jumped = true;
            continue;
        }
        let len = len as usize;
        let start_label = pos + 1;
        let end_label = start_label + len;
        let label = data.get(start_label..end_label).ok_or(WireError::Truncated)?;
        labels.push(String::from_utf8_lossy(label).into_owned());
        pos = end_label;
    }

    Ok((labels.join("."), end_pos))
}

fn decode_record(data: &[u8], pos: &mut usize) -> Result<Record, WireError> {
    let (name, next) = read_name(data, *pos)?;
    *pos = next;
    let rtype = read_u16(data, pos)?;
    let _class = read_u16(data, pos)?;
    let ttl = read_u32(data, pos)?;
    let rdlength = read_u16(data, pos)? as usize;
    let rdata_start = *pos;
    let rdata_end = rdata_start + rdlength;
    if rdata_end > data.len() {
        return Err(WireError::Truncated);
    }

    let parsed = match QuestionType::from_code(rtype) {
        Some(QuestionType::A) if rdlength == 4 => {
            RecordData::A(Ipv4Addr::new(data[rdata_start], data[rdata_start + 1], data[rdata_start + 2], data[rdata_start + 3]))
        }
        Some(QuestionType::Aaaa) if rdlength == 16 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&data[rdata_start..rdata_end]);
            RecordData::Aaaa(Ipv6Addr::from(octets))
        }
        Some(QuestionType::Srv) if rdlength >= 6 => {
            let priority = u16::from_be_bytes([data[rdata_start], data[rdata_start + 1]]);
            let weight = u16::from_be_bytes([data[rdata_start + 2], data[rdata_start + 3]]);
            let port = u16::from_be_bytes([data[rdata_start + 4], data[rdata_start + 5]]);
            let (target, _) = read_name(data, rdata_start + 6)?;
            RecordData::Srv { priority, weight, port, target }
        }
        Some(QuestionType::Txt) => {
            // One or more length-prefixed character-strings; concatenate.
            let mut out = Vec::with_capacity(rdlength);
            let mut cursor = rdata_start;
            while cursor < rdata_end {
                let len = data[cursor] as usize;
                cursor += 1;
                let end = cursor + len;
                if end > rdata_end {
                    break;
                }
                out.extend_from_slice(&data[cursor..end]);
                cursor = end;
            }
            RecordData::Txt(out)
        }
        _ => RecordData::Unknown,
    };

    *pos = rdata_end;
    Ok(Record { name, ttl, data: parsed })
}

fn read_u16(data: &[u8], pos: &mut usize) -> Result<u16, WireError> {
    let bytes = data.get(*pos..*pos + 2).ok_or(WireError::Truncated)?;
    *pos += 2;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn read_u32(data: &[u8], pos: &mut usize) -> Result<u32, WireError> {
    let bytes = data.get(*pos..*pos + 4).ok_or(WireError::Truncated)?;
    *pos += 4;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

pub fn decode_message(mut data: Bytes) -> Result<Message, WireError> {
    let raw = data.clone();
    if data.remaining() < 12 {
        return Err(WireError::Truncated);
    }
    let id = data.get_u16();
    let flags = data.get_u16();
    let qdcount = data.get_u16();
    let ancount = data.get_u16();
    let _nscount = data.get_u16();
    let _arcount = data.get_u16();

    let is_response = flags & 0x8000 != 0;
    let truncated = flags & 0x0200 != 0;
    let rcode = (flags & 0x000F) as u8;

    let mut pos = 12usize;
    let raw_ref = raw.as_ref();
    let mut questions = Vec::with_capacity(qdcount as usize);
    for _ in 0..qdcount {
        let (name, next) = read_name(raw_ref, pos)?;
        pos = next;
        let qtype = read_u16(raw_ref, &mut pos)?;
        let _qclass = read_u16(raw_ref, &mut pos)?;
        if let Some(qtype) = QuestionType::from_code(qtype) {
            questions.push(Question { name, qtype });
        }
    }

    let mut answers = Vec::with_capacity(ancount as usize);
    for _ in 0..ancount {
        answers.push(decode_record(raw_ref, &mut pos)?);
    }

    Ok(Message { id, is_response, truncated, rcode, questions, answers })
}

/// Prefix `message` with its big-endian u16 length, the framing RFC 1035
/// §4.2.2 requires for DNS-over-TCP (each TCP message is length-prefixed,
/// unlike the bare UDP datagram `encode_query` otherwise produces).
pub fn with_tcp_length_prefix(message: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(message.len() + 2);
    buf.put_u16(message.len() as u16);
    buf.put_slice(message);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_round_trips_through_encode_and_decode() {
        let questions = vec![Question { name: "example.com".to_string(), qtype: QuestionType::A }];
        let wire = encode_query(7, &questions);
        let decoded = decode_message(wire).unwrap();
        assert_eq!(decoded.id, 7);
        assert!(!decoded.is_response);
        assert_eq!(decoded.questions.len(), 1);
        assert_eq!(decoded.questions[0].name, "example.com");
    }

    fn build_response_with_a_record(name: &str, ip: Ipv4Addr, ttl: u32) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u16(7);
        buf.put_u16(0x8180); // response, recursion available, no error
        buf.put_u16(1);
        buf.put_u16(1);
        buf.put_u16(0);
        buf.put_u16(0);
        write_name(&mut buf, name).unwrap();
        buf.put_u16(QuestionType::A.code());
        buf.put_u16(1);
        write_name(&mut buf, name).unwrap();
        buf.put_u16(QuestionType::A.code());
        buf.put_u16(1);
        buf.put_u32(ttl);
        buf.put_u16(4);
        buf.put_slice(&ip.octets());
        buf.freeze()
    }

    #[test]
    fn a_record_response_decodes_address_and_ttl() {
        let wire = build_response_with_a_record("example.com", Ipv4Addr::new(93, 184, 216, 34), 300);
        let decoded = decode_message(wire).unwrap();
        assert!(decoded.is_response);
        assert_eq!(decoded.rcode, 0);
        assert_eq!(decoded.answers.len(), 1);
        match decoded.answers[0].data {
            RecordData::A(ip) => assert_eq!(ip, Ipv4Addr::new(93, 184, 216, 34)),
            _ => panic!("expected A record"),
        }
        assert_eq!(decoded.answers[0].ttl, 300);
    }

    #[test]
    fn txt_record_concatenates_character_strings() {
        let mut buf = BytesMut::new();
        buf.put_u16(1);
        buf.put_u16(0x8180);
        buf.put_u16(1);
        buf.put_u16(1);
        buf.put_u16(0);
        buf.put_u16(0);
        write_name(&mut buf, "example.com").unwrap();
        buf.put_u16(QuestionType::Txt.code());
        buf.put_u16(1);
        write_name(&mut buf, "example.com").unwrap();
        buf.put_u16(QuestionType::Txt.code());
        buf.put_u16(1);
        buf.put_u32(60);
        let payload = b"endpoint=svc.internal:9000";
        buf.put_u16(1 + payload.len() as u16);
        buf.put_u8(payload.len() as u8);
        buf.put_slice(payload);

        let decoded = decode_message(buf.freeze()).unwrap();
        match &decoded.answers[0].data {
            RecordData::Txt(bytes) => assert_eq!(bytes, payload),
            _ => panic!("expected TXT record"),
        }
    }

    #[test]
    fn truncated_bit_is_decoded() {
        let mut buf = BytesMut::new();
        buf.put_u16(9);
        buf.put_u16(0x8380); // response, truncated, recursion available
        buf.put_u16(0);
        buf.put_u16(0);
        buf.put_u16(0);
        buf.put_u16(0);
        let decoded = decode_message(buf.freeze()).unwrap();
        assert!(decoded.truncated);
    }

    #[test]
    fn tcp_length_prefix_matches_message_len() {
        let questions = vec![Question { name: "example.com".to_string(), qtype: QuestionType::A }];
        let wire = encode_query(7, &questions);
        let framed = with_tcp_length_prefix(&wire);
        assert_eq!(framed.len(), wire.len() + 2);
        let len = u16::from_be_bytes([framed[0], framed[1]]) as usize;
        assert_eq!(len, wire.len());
        assert_eq!(&framed[2..], &wire[..]);
    }
}
