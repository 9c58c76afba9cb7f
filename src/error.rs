//! Crate-wide error type.
//!
//! [`PipelineError`] plays the role `tonic::Status` plays for gRPC: a single,
//! cheaply cloneable enum that every layer of the pipeline converts its
//! failures into, carrying enough context for the retry/circuit-breaker
//! decorators to make a decision without needing to downcast.

use std::fmt;
use std::sync::Arc;

/// The kind of failure that occurred, per spec §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad framing, unsupported encoding, invalid headers.
    Protocol,
    /// Response, write, connection acquire, endpoint selection, or DNS timeout.
    Timeout,
    /// User cancel or shutdown.
    Cancelled,
    /// Auth rejected; carries the failure handler's output.
    Unauthorized,
    /// Circuit open, retry denied, admission denied.
    Rejected,
    /// The request was never committed to the wire; safe to retry.
    Unprocessed,
    /// Peer closed, RST, or GOAWAY.
    PeerError,
    /// Misconfiguration.
    InvalidArgument,
    /// An explicit H2C requirement wasn't met by the remote, or an
    /// opportunistic upgrade attempt failed (spec §4.E).
    ProtocolNegotiation,
}

impl ErrorKind {
    /// Whether this kind is retried by default absent an explicit rule.
    pub fn retryable_by_default(self) -> bool {
        matches!(self, ErrorKind::Unprocessed)
    }

    /// The HTTP status a server maps this kind to, per spec §7.
    pub fn http_status(self) -> http::StatusCode {
        match self {
            ErrorKind::Timeout => http::StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Rejected => http::StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::InvalidArgument => http::StatusCode::BAD_REQUEST,
            ErrorKind::Unauthorized => http::StatusCode::UNAUTHORIZED,
            ErrorKind::Protocol => http::StatusCode::BAD_REQUEST,
            ErrorKind::PeerError => http::StatusCode::BAD_GATEWAY,
            ErrorKind::ProtocolNegotiation => http::StatusCode::HTTP_VERSION_NOT_SUPPORTED,
            ErrorKind::Cancelled | ErrorKind::Unprocessed => {
                http::StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// The crate's error type, threaded through the log's terminal future and
/// the response stream's error signal (spec §7).
#[derive(Clone)]
pub struct PipelineError {
    kind: ErrorKind,
    message: String,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl PipelineError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        PipelineError {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        PipelineError {
            kind,
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Protocol, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Rejected, message)
    }

    pub fn unprocessed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unprocessed, message)
    }

    pub fn peer_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PeerError, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    /// A required or attempted protocol negotiation didn't land on
    /// `expected` (spec §4.E), e.g. `protocol_negotiation("H2C", "HTTP/1.1")`.
    pub fn protocol_negotiation(expected: impl fmt::Display, actual: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::ProtocolNegotiation,
            format!("expected {expected}, actual {actual}"),
        )
    }

    /// Peel a retry-boundary-crossing error down to its root cause for rule
    /// evaluation, per spec §7 ("peeled to their root cause... but preserved
    /// fully in the log").
    pub fn root_cause(&self) -> &(dyn std::error::Error + 'static) {
        let mut current: &(dyn std::error::Error + 'static) = self;
        while let Some(source) = current.source() {
            current = source;
        }
        current
    }
}

impl fmt::Debug for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineError")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .finish()
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|s| s.as_ref() as _)
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::with_source(ErrorKind::PeerError, err.to_string(), err)
    }
}

#[cfg(feature = "server")]
impl From<h2::Error> for PipelineError {
    fn from(err: h2::Error) -> Self {
        let kind = if err.is_go_away() || err.is_reset() {
            ErrorKind::PeerError
        } else {
            ErrorKind::Protocol
        };
        PipelineError::with_source(kind, err.to_string(), err)
    }
}

#[cfg(any(feature = "server", feature = "channel"))]
impl From<hyper::Error> for PipelineError {
    fn from(err: hyper::Error) -> Self {
        PipelineError::with_source(ErrorKind::PeerError, err.to_string(), err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_cause_peels_nested_sources() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let wrapped = PipelineError::with_source(ErrorKind::PeerError, "peer closed", io);
        assert_eq!(wrapped.root_cause().to_string(), "boom");
    }

    #[test]
    fn unprocessed_is_retried_by_default() {
        assert!(ErrorKind::Unprocessed.retryable_by_default());
        assert!(!ErrorKind::Protocol.retryable_by_default());
    }

    #[test]
    fn status_mapping_matches_spec() {
        assert_eq!(
            ErrorKind::Timeout.http_status(),
            http::StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ErrorKind::Rejected.http_status(),
            http::StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ErrorKind::InvalidArgument.http_status(),
            http::StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ErrorKind::ProtocolNegotiation.http_status(),
            http::StatusCode::HTTP_VERSION_NOT_SUPPORTED
        );
    }

    #[test]
    fn protocol_negotiation_message_names_both_sides() {
        let err = PipelineError::protocol_negotiation("H2C", "HTTP/1.1");
        assert_eq!(err.kind(), ErrorKind::ProtocolNegotiation);
        assert!(err.message().contains("H2C"));
        assert!(err.message().contains("HTTP/1.1"));
    }
}
