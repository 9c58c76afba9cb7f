//! `HttpHeaders`: an ordered multimap with pseudo-headers ordered first
//! (spec §3).

use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};

/// Which kind of `HttpHeaders` this is, governing the set-once vs.
/// accumulating discipline from spec §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderKind {
    Request,
    Response,
    Trailers,
}

/// The five pseudo-headers from spec §3, kept distinct from regular fields
/// so they can always be serialized before them.
#[derive(Debug, Clone, Default)]
pub struct PseudoHeaders {
    pub status: Option<StatusCode>,
    pub method: Option<Method>,
    pub path: Option<String>,
    pub scheme: Option<String>,
    pub authority: Option<String>,
}

/// An ordered multimap of lowercased header name to value, with
/// pseudo-headers (`:status`, `:method`, `:path`, `:scheme`, `:authority`)
/// kept separate and always ordered first.
///
/// Request/response headers are set-once: calling [`HttpHeaders::insert`] a
/// second time for the same name replaces the prior value. Trailers
/// accumulate: [`HttpHeaders::insert`] always appends.
#[derive(Debug, Clone)]
pub struct HttpHeaders {
    kind: HeaderKind,
    pseudo: PseudoHeaders,
    fields: HeaderMap,
}

impl HttpHeaders {
    pub fn request(method: Method, path: impl Into<String>) -> Self {
        HttpHeaders {
            kind: HeaderKind::Request,
            pseudo: PseudoHeaders {
                method: Some(method),
                path: Some(path.into()),
                ..Default::default()
            },
            fields: HeaderMap::new(),
        }
    }

    pub fn response(status: StatusCode) -> Self {
        HttpHeaders {
            kind: HeaderKind::Response,
            pseudo: PseudoHeaders {
                status: Some(status),
                ..Default::default()
            },
            fields: HeaderMap::new(),
        }
    }

    pub fn trailers() -> Self {
        HttpHeaders {
            kind: HeaderKind::Trailers,
            pseudo: PseudoHeaders::default(),
            fields: HeaderMap::new(),
        }
    }

    pub fn kind(&self) -> HeaderKind {
        self.kind
    }

    pub fn pseudo(&self) -> &PseudoHeaders {
        &self.pseudo
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.pseudo.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.pseudo.status = Some(status);
    }

    pub fn set_scheme(&mut self, scheme: impl Into<String>) {
        self.pseudo.scheme = Some(scheme.into());
    }

    pub fn set_authority(&mut self, authority: impl Into<String>) {
        self.pseudo.authority = Some(authority.into());
    }

    /// Set (request/response) or append (trailers) a header field.
    pub fn insert(&mut self, name: HeaderName, value: HeaderValue) {
        match self.kind {
            HeaderKind::Trailers => {
                self.fields.append(name, value);
            }
            HeaderKind::Request | HeaderKind::Response => {
                self.fields.insert(name, value);
            }
        }
    }

    /// Always appends, regardless of kind; used when a field is genuinely
    /// multi-valued (e.g. `Set-Cookie`).
    pub fn append(&mut self, name: HeaderName, value: HeaderValue) {
        self.fields.append(name, value);
    }

    pub fn get(&self, name: impl http::header::AsHeaderName) -> Option<&HeaderValue> {
        self.fields.get(name)
    }

    pub fn get_all(&self, name: HeaderName) -> impl Iterator<Item = &HeaderValue> {
        self.fields.get_all(name).iter()
    }

    pub fn contains(&self, name: impl http::header::AsHeaderName) -> bool {
        self.fields.contains_key(name)
    }

    pub fn fields(&self) -> &HeaderMap {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut HeaderMap {
        &mut self.fields
    }

    /// Build a plain `http::HeaderMap` with pseudo-headers first, matching
    /// the invariant from spec §3.
    pub fn to_wire_order(&self) -> Vec<(String, HeaderValue)> {
        let mut out = Vec::with_capacity(self.fields.len() + 5);
        if let Some(method) = &self.pseudo.method {
            out.push((
                ":method".to_string(),
                HeaderValue::from_str(method.as_str()).unwrap(),
            ));
        }
        if let Some(scheme) = &self.pseudo.scheme {
            out.push((":scheme".to_string(), HeaderValue::from_str(scheme).unwrap()));
        }
        if let Some(authority) = &self.pseudo.authority {
            out.push((
                ":authority".to_string(),
                HeaderValue::from_str(authority).unwrap(),
            ));
        }
        if let Some(path) = &self.pseudo.path {
            out.push((":path".to_string(), HeaderValue::from_str(path).unwrap()));
        }
        if let Some(status) = self.pseudo.status {
            out.push((
                ":status".to_string(),
                HeaderValue::from_str(status.as_str()).unwrap(),
            ));
        }
        for (name, value) in self.fields.iter() {
            out.push((name.as_str().to_string(), value.clone()));
        }
        out
    }
}
