//! `HttpObject`: the tagged variant flowing through a body stream (spec §3).

use super::data::HttpData;
use super::headers::HttpHeaders;

/// One item of a response/request stream.
///
/// A legal stream is `Headers (Data*) Trailers? EOS`, with an optional
/// `100 Continue` headers object preceding the final response headers.
#[derive(Debug)]
pub enum HttpObject {
    Headers(HttpHeaders),
    Data(HttpData),
    Trailers(HttpHeaders),
}

impl HttpObject {
    pub fn is_headers(&self) -> bool {
        matches!(self, HttpObject::Headers(_))
    }

    pub fn is_informational(&self) -> bool {
        matches!(self, HttpObject::Headers(h) if h.status().map(|s| s.is_informational()).unwrap_or(false))
    }

    pub fn is_trailers(&self) -> bool {
        matches!(self, HttpObject::Trailers(_))
    }

    pub fn as_data(&self) -> Option<&HttpData> {
        match self {
            HttpObject::Data(d) => Some(d),
            _ => None,
        }
    }
}

/// Validates the sequencing invariant from spec §3: at most one terminal
/// `Trailers` OR a trailing `Data{eos}`, never both, and `Headers` only
/// ever appears first (optionally preceded by 1xx informational headers).
#[derive(Debug, Default)]
pub struct SequenceValidator {
    seen_final_headers: bool,
    terminated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceViolation {
    DataOrTrailersBeforeHeaders,
    ObjectAfterTerminal,
}

impl SequenceValidator {
    pub fn observe(&mut self, object: &HttpObject) -> Result<(), SequenceViolation> {
        if self.terminated {
            return Err(SequenceViolation::ObjectAfterTerminal);
        }
        match object {
            HttpObject::Headers(h) => {
                if h.status().map(|s| s.is_informational()).unwrap_or(false) {
                    // 1xx informational headers may repeat before the final headers.
                } else {
                    if self.seen_final_headers {
                        return Err(SequenceViolation::ObjectAfterTerminal);
                    }
                    self.seen_final_headers = true;
                }
            }
            HttpObject::Data(d) => {
                if !self.seen_final_headers {
                    return Err(SequenceViolation::DataOrTrailersBeforeHeaders);
                }
                if d.end_of_stream() {
                    self.terminated = true;
                }
            }
            HttpObject::Trailers(_) => {
                if !self.seen_final_headers {
                    return Err(SequenceViolation::DataOrTrailersBeforeHeaders);
                }
                self.terminated = true;
            }
        }
        Ok(())
    }
}
